//! Stop control
//!
//! The stop intent is forwarded to Upstream best-effort, but local cleanup
//! never waits on its verdict: the consumer is cancelled, the transcript is
//! scrubbed of incomplete messages, and the endpoint answers as soon as local
//! cleanup is done. The terminal event is emitted once the Upstream call
//! resolves, carrying `timeout_stopped` when it timed out.

use log::{info, warn};

use chat_core::events::{CompletionType, PushEvent, PushEventKind};
use chat_core::room::Room;
use upstream_client::UpstreamError;

use crate::server::AppState;

pub struct StopOutcome {
    pub cleanup_completed: bool,
}

pub async fn stop_chat(
    state: AppState,
    user_id: String,
    session_id: String,
    chat_id: Option<String>,
    instance_id: Option<String>,
) -> StopOutcome {
    // Resolve the live chat from the active-stream table when the caller did
    // not pin one, then take the entry so the coordinator exits quietly
    let active = state.streams.remove(&user_id, &session_id).await;
    let chat_id = chat_id
        .or_else(|| active.as_ref().map(|a| a.chat_id.clone()))
        .unwrap_or_default();
    let instance_id = instance_id.or_else(|| active.and_then(|a| a.instance_id));

    let cancelled = state
        .consumers
        .cancel_for(&user_id, &session_id, Some(&chat_id))
        .await
        || state.consumers.cancel_for(&user_id, &session_id, None).await;
    info!(
        "Stop for chat {chat_id} in session {session_id}: consumer cancelled = {cancelled}"
    );

    // A late Bus delivery must not resurrect orphan content
    if chat_id.is_empty() {
        state
            .transcripts
            .scrub_all_incomplete(&user_id, &session_id)
            .await;
    } else {
        state
            .transcripts
            .scrub_incomplete(&user_id, &session_id, &chat_id)
            .await;
    }

    // The terminal event waits for Upstream's verdict; the room stays open so
    // late deliveries can still be routed and discarded client-side
    tokio::spawn(async move {
        let completion_type = match state
            .upstream
            .stop_chat(
                &user_id,
                &session_id,
                Some(&chat_id).filter(|c| !c.is_empty()).map(|c| c.as_str()),
                instance_id.as_deref(),
            )
            .await
        {
            Ok(()) => CompletionType::UserStopped,
            Err(UpstreamError::Timeout) => {
                warn!("Upstream stop timed out for session {session_id}; local cleanup already done");
                CompletionType::TimeoutStopped
            }
            Err(err) => {
                warn!("Upstream stop failed for session {session_id}: {err}; local cleanup already done");
                CompletionType::UserStopped
            }
        };

        let room = Room::new(&user_id, &session_id, &chat_id);
        let complete = PushEvent::complete(
            completion_type,
            0,
            None,
            &session_id,
            &chat_id,
            instance_id.as_deref(),
        );
        state.fanout.broadcast_prefix(&room.prefix(), complete).await;

        let cleanup = PushEvent::new(
            PushEventKind::CleanupGeneration {
                user_id: user_id.clone(),
                session_id: session_id.clone(),
                chat_id: chat_id.clone(),
                instance_id: instance_id.clone(),
                reason: "stopped".to_string(),
            },
            None,
            &session_id,
            &chat_id,
            instance_id.as_deref(),
        );
        state.fanout.broadcast_prefix(&room.prefix(), cleanup).await;
    });

    StopOutcome {
        cleanup_completed: true,
    }
}
