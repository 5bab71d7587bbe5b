//! Streaming coordinator
//!
//! Drives one chat from prompt to completion: replays history, records the
//! prompt, triggers Upstream over HTTP, consumes the Bus token stream through
//! the thinking parser, and delivers filtered events to the client and the
//! chat's room. The consumer is acquired before the HTTP trigger so no racing
//! message can be missed.

use std::time::Instant;

use log::{info, warn};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use bus_client::{chat_queue, BusMessage};
use chat_core::events::{CompletionType, PushEvent, PushEventKind};
use chat_core::message::ChatMessage;
use chat_core::model_profile::ModelProfile;
use chat_core::room::Room;
use chat_core::session::Session;
use upstream_client::{ChatFlags, ChatReply, ChatRequest, UpstreamError};

use crate::error::{AppError, Result};
use crate::server::AppState;
use crate::services::session_sync;
use crate::services::thinking_parser::{ParserOutput, ThinkingParser};

const EVENT_BUFFER: usize = 100;
const BUS_BUFFER: usize = 256;
const TICK_MILLIS: u64 = 25;

#[derive(Debug, Clone)]
pub struct StreamChatArgs {
    pub user_id: String,
    pub session_id: String,
    pub chat_id: String,
    pub instance_id: Option<String>,
    pub model_id: Option<String>,
    pub prompt: String,
    pub flags: ChatFlags,
    pub temp_file_paths: Vec<String>,
}

/// Why the stream loop closed
enum CloseReason {
    Done,
    Timeout,
    UpstreamError,
}

/// Start a chat stream. Returns the event receiver feeding the HTTP response;
/// the same events are broadcast to the chat's room.
pub async fn stream_chat(
    state: AppState,
    args: StreamChatArgs,
) -> Result<mpsc::Receiver<PushEvent>> {
    state.registry.require_current().await?;

    let chat_count = state
        .transcripts
        .chat_count(&args.user_id, &args.session_id)
        .await;
    if chat_count >= state.config.chat_limit {
        return Err(AppError::LimitReached(args.session_id.clone()));
    }

    let room = Room::new(&args.user_id, &args.session_id, &args.chat_id)
        .with_instance(args.instance_id.as_deref());
    let (tx, rx) = mpsc::channel::<PushEvent>(EVENT_BUFFER);

    // Replay precedes everything live for this chat
    replay_history(&state, &args, &tx).await;

    let temp_file_name = args
        .temp_file_paths
        .first()
        .map(|path| path.rsplit('/').next().unwrap_or(path).to_string());
    state
        .transcripts
        .append(ChatMessage::user_prompt(
            &args.user_id,
            &args.session_id,
            &args.chat_id,
            args.prompt.clone(),
            temp_file_name,
        ))
        .await;

    upsert_session(&state, &args).await;

    state
        .streams
        .register(
            &args.user_id,
            &args.session_id,
            &args.chat_id,
            args.instance_id.as_deref(),
        )
        .await;

    // Consumer first, then the producer trigger
    let (bus_tx, bus_rx) = mpsc::channel(BUS_BUFFER);
    let conn_id = args
        .instance_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
    let tag = state
        .consumers
        .next_tag(&conn_id, &args.session_id, &args.chat_id);
    if let Err(err) = state
        .consumers
        .acquire(
            &chat_queue(&args.user_id),
            &args.user_id,
            &args.session_id,
            tag,
            bus_tx,
        )
        .await
    {
        warn!("Bus consumer acquire failed: {err}");
        let error_event = PushEvent::error(
            err.to_string(),
            Some("UNAVAILABLE".to_string()),
            &args.session_id,
            &args.chat_id,
            args.instance_id.as_deref(),
        );
        let complete = PushEvent::complete(
            CompletionType::Done,
            0,
            Some("bus_unavailable".to_string()),
            &args.session_id,
            &args.chat_id,
            args.instance_id.as_deref(),
        );
        state.streams.remove(&args.user_id, &args.session_id).await;
        let _ = tx.send(error_event).await;
        let _ = tx.send(complete).await;
        return Ok(rx);
    }

    let (reply_tx, reply_rx) = oneshot::channel();
    spawn_producer_trigger(&state, &args, &room, reply_tx);

    let profile = ModelProfile::for_model(args.model_id.as_deref().unwrap_or_default());
    tokio::spawn(run_stream_loop(
        state, args, room, profile, bus_rx, reply_rx, tx,
    ));

    Ok(rx)
}

async fn replay_history(state: &AppState, args: &StreamChatArgs, tx: &mpsc::Sender<PushEvent>) {
    let history = state
        .transcripts
        .snapshot(&args.user_id, &args.session_id)
        .await;

    let _ = tx
        .send(PushEvent::new(
            PushEventKind::HistoryStart,
            None,
            &args.session_id,
            &args.chat_id,
            args.instance_id.as_deref(),
        ))
        .await;
    for message in history {
        let _ = tx
            .send(PushEvent::new(
                PushEventKind::History {
                    role: message.role,
                    temp_file_name: message.temp_file_name.clone(),
                },
                Some(message.content.clone()),
                &args.session_id,
                &message.chat_id,
                args.instance_id.as_deref(),
            ))
            .await;
    }
    let _ = tx
        .send(PushEvent::new(
            PushEventKind::HistoryEnd,
            None,
            &args.session_id,
            &args.chat_id,
            args.instance_id.as_deref(),
        ))
        .await;
}

async fn upsert_session(state: &AppState, args: &StreamChatArgs) {
    let total_chats = state
        .transcripts
        .chat_count(&args.user_id, &args.session_id)
        .await as u32;

    let mut session = match state.catalog.get(&args.user_id, &args.session_id).await {
        Some(existing) => existing,
        None => Session::new_local(&args.session_id, &args.user_id),
    };
    session.current_chat_id = args.chat_id.clone();
    session.total_chats = total_chats;

    let outcome = state.catalog.upsert(session).await;
    if outcome.window_warning {
        info!(
            "Session window full for user {}; next insert will evict",
            args.user_id
        );
    }
    if let Some(evicted) = outcome.evicted {
        state
            .transcripts
            .drop_session(&evicted.owner_user_id, &evicted.id)
            .await;
        state
            .catalog
            .drop_chat_counter(&evicted.owner_user_id, &evicted.id)
            .await;
    }
}

fn spawn_producer_trigger(
    state: &AppState,
    args: &StreamChatArgs,
    room: &Room,
    reply_tx: oneshot::Sender<std::result::Result<ChatReply, UpstreamError>>,
) {
    let upstream = state.upstream.clone();
    let mut flags = args.flags.clone();
    flags.first_chat_flag = args.chat_id == "1";
    if !args.temp_file_paths.is_empty() {
        flags.temp_file_flag = true;
    }

    let request = ChatRequest {
        user_id: args.user_id.clone(),
        chat_id: args.chat_id.clone(),
        session_id: args.session_id.clone(),
        llm_model_id: args.model_id.clone().unwrap_or_default(),
        flags,
        prompt: args.prompt.clone(),
        temp_file_paths: args.temp_file_paths.clone(),
        room_id: room.fingerprint(),
    };

    tokio::spawn(async move {
        let result = upstream.send_chat(&request).await;
        let _ = reply_tx.send(result);
    });
}

#[allow(clippy::too_many_lines)]
async fn run_stream_loop(
    state: AppState,
    args: StreamChatArgs,
    room: Room,
    profile: ModelProfile,
    mut bus_rx: mpsc::Receiver<serde_json::Value>,
    mut reply_rx: oneshot::Receiver<std::result::Result<ChatReply, UpstreamError>>,
    tx: mpsc::Sender<PushEvent>,
) {
    let config = state.config.clone();
    let started = Instant::now();
    let mut last_activity = Instant::now();
    let mut parser = ThinkingParser::new(profile);

    let mut first_message_seen = false;
    let mut reply_done = false;
    let mut upstream_reply: Option<ChatReply> = None;
    let mut upstream_error_at: Option<Instant> = None;
    let mut token_number: u64 = 0;
    let mut content_tokens: u64 = 0;

    let mut tick = tokio::time::interval(std::time::Duration::from_millis(TICK_MILLIS));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let close = loop {
        tokio::select! {
            maybe = bus_rx.recv() => {
                match maybe {
                    Some(value) => {
                        let message = BusMessage::decode(&value);
                        // Mismatched chat ids belong to a prior chat on the
                        // shared queue and are dropped silently
                        if let Some(chat_id) = message.chat_id() {
                            if chat_id != args.chat_id {
                                continue;
                            }
                        }
                        match message {
                            BusMessage::Token { data, .. } => {
                                first_message_seen = true;
                                last_activity = Instant::now();
                                handle_token(
                                    &state, &args, &room, &tx, &mut parser, &data,
                                    &mut token_number, &mut content_tokens,
                                ).await;
                            }
                            BusMessage::Content { content, .. } => {
                                first_message_seen = true;
                                last_activity = Instant::now();
                                handle_token(
                                    &state, &args, &room, &tx, &mut parser, &content,
                                    &mut token_number, &mut content_tokens,
                                ).await;
                            }
                            BusMessage::Done => break CloseReason::Done,
                            BusMessage::SessionIndex(_) | BusMessage::Other(_) => {}
                        }
                    }
                    None => {
                        // Consumer cancelled underneath us: a stop or a rapid
                        // resubmission owns completion signalling now
                        info!(
                            "Consumer for chat {} closed externally; exiting quietly",
                            args.chat_id
                        );
                        return;
                    }
                }
            }
            reply = &mut reply_rx, if !reply_done => {
                reply_done = true;
                match reply {
                    Ok(Ok(parsed)) => {
                        handle_upstream_reply(&state, &args, &parsed).await;
                        upstream_reply = Some(parsed);
                    }
                    Ok(Err(UpstreamError::Timeout)) | Ok(Err(UpstreamError::BadReply(_))) => {
                        // The Bus may still deliver from Upstream's background
                        // worker; keep waiting on the idle gates
                        warn!("Upstream chat call gave no completion signal for chat {}", args.chat_id);
                    }
                    Ok(Err(err)) => {
                        warn!("Upstream chat call failed for chat {}: {err}", args.chat_id);
                        upstream_error_at = Some(Instant::now());
                        emit(&state, &room, &tx, PushEvent::error(
                            err.to_string(),
                            Some("UPSTREAM".to_string()),
                            &args.session_id,
                            &args.chat_id,
                            args.instance_id.as_deref(),
                        )).await;
                    }
                    Err(_) => {
                        upstream_error_at = Some(Instant::now());
                    }
                }
            }
            _ = tick.tick() => {
                let idle = last_activity.elapsed();
                if started.elapsed() >= config.global_deadline {
                    break CloseReason::Timeout;
                }
                if let Some(error_at) = upstream_error_at {
                    if error_at.elapsed() >= config.error_drain {
                        break CloseReason::UpstreamError;
                    }
                    continue;
                }
                match &upstream_reply {
                    Some(reply) if reply.is_complete => {
                        let gate = if first_message_seen {
                            config.quiescence_complete
                        } else {
                            config.idle_before_first_complete
                        };
                        if idle >= gate {
                            break CloseReason::Done;
                        }
                    }
                    Some(_) => {
                        let gate = if first_message_seen {
                            config.quiescence
                        } else {
                            config.idle_before_first
                        };
                        if idle >= gate {
                            break CloseReason::Timeout;
                        }
                    }
                    None => {
                        if idle >= config.quiescence {
                            break CloseReason::Timeout;
                        }
                    }
                }
            }
        }
    };

    finish_stream(
        state,
        args,
        room,
        parser,
        tx,
        close,
        first_message_seen,
        content_tokens,
        token_number,
    )
    .await;
}

#[allow(clippy::too_many_arguments)]
async fn handle_token(
    state: &AppState,
    args: &StreamChatArgs,
    room: &Room,
    tx: &mpsc::Sender<PushEvent>,
    parser: &mut ThinkingParser,
    token: &str,
    token_number: &mut u64,
    content_tokens: &mut u64,
) {
    for output in parser.feed(token) {
        apply_parser_output(state, args, room, tx, output, token_number, content_tokens).await;
    }
}

async fn apply_parser_output(
    state: &AppState,
    args: &StreamChatArgs,
    room: &Room,
    tx: &mpsc::Sender<PushEvent>,
    output: ParserOutput,
    token_number: &mut u64,
    content_tokens: &mut u64,
) {
    match output {
        ParserOutput::Stream {
            text,
            message_id,
            is_pending_thinking,
        } => {
            *token_number += 1;
            if !is_pending_thinking {
                *content_tokens += 1;
                state
                    .transcripts
                    .append_assistant_token(&args.user_id, &args.session_id, &args.chat_id, &text)
                    .await;
            }
            let event = PushEvent::new(
                PushEventKind::Stream {
                    token_number: Some(*token_number),
                    message_id: message_id.map(|id| id.to_string()),
                    is_pending_thinking: is_pending_thinking.then_some(true),
                },
                Some(text),
                &args.session_id,
                &args.chat_id,
                args.instance_id.as_deref(),
            );
            emit(state, room, tx, event).await;
        }
        ParserOutput::MoveToThinking {
            content,
            message_id,
            pending_tokens,
        } => {
            state
                .transcripts
                .set_thinking(&args.user_id, &args.session_id, &args.chat_id, &content)
                .await;
            let event = PushEvent::new(
                PushEventKind::MoveToThinking {
                    message_id: message_id.to_string(),
                    pending_tokens,
                },
                Some(content),
                &args.session_id,
                &args.chat_id,
                args.instance_id.as_deref(),
            );
            emit(state, room, tx, event).await;
        }
        ParserOutput::ThinkingComplete => {
            let event = PushEvent::new(
                PushEventKind::ThinkingComplete,
                None,
                &args.session_id,
                &args.chat_id,
                args.instance_id.as_deref(),
            );
            emit(state, room, tx, event).await;
        }
    }
}

/// First-chat reconciliation: Upstream's generated name overwrites the local
/// title, and a detached re-sync keeps the FIFO order consistent. The chat
/// response never blocks on it.
async fn handle_upstream_reply(state: &AppState, args: &StreamChatArgs, reply: &ChatReply) {
    if args.chat_id != "1" {
        return;
    }
    if let Some(name) = &reply.session_name {
        state
            .catalog
            .set_title(
                &args.user_id,
                &args.session_id,
                name,
                chat_core::session::SessionSource::LocalUpdatedFromUpstream,
            )
            .await;
        session_sync::resync_detached(state.clone(), args.user_id.clone());
    }
}

#[allow(clippy::too_many_arguments)]
async fn finish_stream(
    state: AppState,
    args: StreamChatArgs,
    room: Room,
    mut parser: ThinkingParser,
    tx: mpsc::Sender<PushEvent>,
    close: CloseReason,
    first_message_seen: bool,
    mut content_tokens: u64,
    mut token_number: u64,
) {
    for output in parser.finish() {
        apply_parser_output(
            &state,
            &args,
            &room,
            &tx,
            output,
            &mut token_number,
            &mut content_tokens,
        )
        .await;
    }

    // Completion signalling belongs to this coordinator only while its
    // active-stream entry is still in place
    let owns_completion = state
        .streams
        .remove_for_chat(&args.user_id, &args.session_id, &args.chat_id)
        .await;
    if !owns_completion {
        info!(
            "Chat {} lost its streaming slot before completion; skipping terminal event",
            args.chat_id
        );
        return;
    }

    state
        .consumers
        .cancel(&args.user_id, &args.session_id)
        .await;

    let delivered_content = first_message_seen && content_tokens > 0;
    let reason = match close {
        CloseReason::Done => None,
        CloseReason::Timeout => Some("timeout".to_string()),
        CloseReason::UpstreamError => Some("upstream_error".to_string()),
    };

    if delivered_content || matches!(close, CloseReason::Done) {
        // Tokens inside an unterminated thinking region stayed in the main
        // lane; they belong to the answer content now and count toward the
        // chat's token total
        if let Some(unclosed) = parser.unclosed_thinking().map(str::to_string) {
            state
                .transcripts
                .append_assistant_token(&args.user_id, &args.session_id, &args.chat_id, &unclosed)
                .await;
            content_tokens += 1;
        }
        state
            .transcripts
            .finalize_chat(&args.user_id, &args.session_id, &args.chat_id, content_tokens)
            .await;
    } else {
        // Nothing was delivered; leave no incomplete tail behind
        state
            .transcripts
            .scrub_incomplete(&args.user_id, &args.session_id, &args.chat_id)
            .await;
    }

    let complete = PushEvent::complete(
        CompletionType::Done,
        content_tokens,
        reason,
        &args.session_id,
        &args.chat_id,
        args.instance_id.as_deref(),
    );
    emit(&state, &room, &tx, complete).await;

    // Trigger B: the first chat completing re-syncs the session index so the
    // next history open observes Upstream's FIFO order
    if matches!(close, CloseReason::Done) && args.chat_id == "1" {
        session_sync::resync_detached(state.clone(), args.user_id.clone());
    }
}

async fn emit(state: &AppState, room: &Room, tx: &mpsc::Sender<PushEvent>, event: PushEvent) {
    state.fanout.broadcast(&room.fingerprint(), event.clone()).await;
    if tx.send(event).await.is_err() {
        // Client dropped the HTTP stream; room delivery continues
        log::debug!("Chat stream receiver dropped for room {}", room.fingerprint());
    }
}
