//! Session-index and history re-sync
//!
//! Upstream holds the canonical latest-10 session list and the canonical
//! titles; it publishes both onto the Bus when asked over HTTP. The Bus
//! consumer is always started before the HTTP trigger so the reply cannot be
//! missed, and the merged list is returned to the client before the in-memory
//! catalog is updated in a detached task.

use log::{info, warn};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::timeout;

use bus_client::{session_history_queue, session_index_queue, BusMessage, SessionIndexEntry};
use chat_core::message::{ChatMessage, MessageRole, MessageType};
use session_manager::{MergedSession, UpstreamSessionEntry};

use crate::error::{AppError, Result};
use crate::server::AppState;

/// Pseudo session ids for non-chat consumer slots
const INDEX_SLOT: &str = "__session_index";
const HISTORY_SLOT: &str = "__session_history";

/// FIFO re-sync: consumer first, HTTP trigger second, bounded wait for the
/// authoritative list, merge with Upstream-title precedence.
pub async fn fifo_resync(state: &AppState, user_id: &str) -> Result<Vec<MergedSession>> {
    let entries = fetch_index_entries(state, user_id).await?;

    match entries {
        Some(entries) => {
            let upstream: Vec<UpstreamSessionEntry> = entries
                .into_iter()
                .map(|e| UpstreamSessionEntry {
                    session_id: e.session_id,
                    title: e.title,
                    created_at: e
                        .created_at
                        .and_then(|raw| raw.parse().ok()),
                })
                .collect();

            let merged = state.catalog.merge_preview(user_id, &upstream).await;

            // The client sees the merged list first; the catalog catches up
            // in the background
            let catalog = state.catalog.clone();
            let user = user_id.to_string();
            tokio::spawn(async move {
                catalog.merge_upstream(&user, &upstream).await;
            });

            Ok(merged)
        }
        None => {
            info!("No session index arrived for user {user_id}; serving local catalog");
            Ok(state.catalog.merge_preview(user_id, &[]).await)
        }
    }
}

async fn fetch_index_entries(
    state: &AppState,
    user_id: &str,
) -> Result<Option<Vec<SessionIndexEntry>>> {
    let (bus_tx, mut bus_rx) = mpsc::channel::<Value>(16);
    let tag = state.consumers.next_tag("sync", INDEX_SLOT, "0");
    state
        .consumers
        .acquire(
            &session_index_queue(user_id),
            user_id,
            INDEX_SLOT,
            tag,
            bus_tx,
        )
        .await
        .map_err(AppError::from)?;

    if let Err(err) = state.upstream.request_session_names(user_id).await {
        warn!("Upstream session_name trigger failed: {err}");
    }

    let entries = timeout(state.config.bus_sync_wait, async {
        while let Some(value) = bus_rx.recv().await {
            if let BusMessage::SessionIndex(entries) = BusMessage::decode(&value) {
                return Some(entries);
            }
        }
        None
    })
    .await
    .unwrap_or(None);

    state.consumers.cancel(user_id, INDEX_SLOT).await;
    Ok(entries)
}

/// Trigger a re-sync without blocking the caller
pub fn resync_detached(state: AppState, user_id: String) {
    tokio::spawn(async move {
        if let Err(err) = fifo_resync(&state, &user_id).await {
            warn!("Detached session re-sync failed for {user_id}: {err}");
        }
    });
}

/// Transcript for a session: memory-first, then Upstream + Bus on demand
pub async fn session_history(
    state: &AppState,
    user_id: &str,
    session_id: &str,
) -> Result<Vec<ChatMessage>> {
    if !state.transcripts.is_empty(user_id, session_id).await {
        return Ok(state.transcripts.snapshot(user_id, session_id).await);
    }

    let (bus_tx, mut bus_rx) = mpsc::channel::<Value>(16);
    let tag = state.consumers.next_tag("sync", HISTORY_SLOT, session_id);
    state
        .consumers
        .acquire(
            &session_history_queue(user_id, session_id),
            user_id,
            HISTORY_SLOT,
            tag,
            bus_tx,
        )
        .await
        .map_err(AppError::from)?;

    if let Err(err) = state
        .upstream
        .request_session_history(user_id, session_id)
        .await
    {
        warn!("Upstream sessionhistory trigger failed: {err}");
    }

    let messages = timeout(state.config.bus_sync_wait, async {
        while let Some(value) = bus_rx.recv().await {
            if let Some(messages) = decode_history(&value, user_id, session_id) {
                return Some(messages);
            }
        }
        None
    })
    .await
    .unwrap_or(None);

    state.consumers.cancel(user_id, HISTORY_SLOT).await;

    match messages {
        Some(messages) => {
            for message in &messages {
                state.transcripts.append(message.clone()).await;
            }
            Ok(messages)
        }
        None => Ok(Vec::new()),
    }
}

/// History payload shapes: `{messages: [...]}` or a direct array, entries
/// `{role, content, chat_id?, thinking_content?}`
fn decode_history(value: &Value, user_id: &str, session_id: &str) -> Option<Vec<ChatMessage>> {
    let items = value
        .get("messages")
        .and_then(Value::as_array)
        .or_else(|| value.as_array())?;

    let mut messages = Vec::with_capacity(items.len());
    for item in items {
        let role = match item.get("role").and_then(Value::as_str) {
            Some("user") => MessageRole::User,
            Some("assistant") => MessageRole::Assistant,
            _ => return None,
        };
        let content = item.get("content").and_then(Value::as_str)?.to_string();
        let chat_id = match item.get("chat_id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };

        let mut message = match role {
            MessageRole::User => {
                ChatMessage::user_prompt(user_id, session_id, &chat_id, content, None)
            }
            MessageRole::Assistant => {
                let mut msg = ChatMessage::assistant_partial(user_id, session_id, &chat_id);
                msg.content = content;
                msg
            }
        };
        message.is_complete = true;
        if role == MessageRole::Assistant {
            message.message_type = MessageType::CompleteResponse;
        }
        if let Some(thinking) = item.get("thinking_content").and_then(Value::as_str) {
            message.thinking_content = Some(thinking.to_string());
            message.has_thinking = true;
        }
        messages.push(message);
    }
    Some(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_wrapped_history() {
        let value = json!({
            "messages": [
                {"role": "user", "content": "hi", "chat_id": "1"},
                {"role": "assistant", "content": "hello", "chat_id": 1, "thinking_content": "hm"}
            ]
        });
        let messages = decode_history(&value, "u1", "19").unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.is_complete));
        assert_eq!(messages[1].thinking_content.as_deref(), Some("hm"));
        assert_eq!(messages[1].chat_id, "1");
    }

    #[test]
    fn rejects_unknown_roles() {
        let value = json!([{"role": "system", "content": "x"}]);
        assert!(decode_history(&value, "u1", "19").is_none());
    }
}
