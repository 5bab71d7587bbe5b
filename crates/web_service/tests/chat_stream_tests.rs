//! Streaming coordinator integration tests
//!
//! These run the full chat pipeline against an in-process Bus and a mock
//! Upstream: prompt submission, Bus token delivery through the thinking
//! parser, completion signalling, stop control, and chat isolation.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use bus_client::{chat_queue, BusConnection, MemoryBus};
use chat_core::events::{CompletionType, PushEvent, PushEventKind};
use chat_core::message::MessageRole;
use chat_core::OrchestratorConfig;
use session_manager::BoundUser;
use upstream_client::{ChatFlags, UpstreamClient, UpstreamConfig};
use web_service::services::streaming_coordinator::{self, StreamChatArgs};
use web_service::services::stop_service;
use web_service::AppState;

fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        idle_before_first_complete: Duration::from_millis(200),
        idle_before_first: Duration::from_millis(300),
        quiescence_complete: Duration::from_millis(300),
        quiescence: Duration::from_millis(400),
        error_drain: Duration::from_millis(200),
        global_deadline: Duration::from_secs(10),
        bus_sync_wait: Duration::from_millis(500),
        ..OrchestratorConfig::default()
    }
}

async fn test_state(upstream_uri: &str) -> (AppState, Arc<MemoryBus>) {
    let mut upstream_config = UpstreamConfig::new(upstream_uri);
    upstream_config.chat_deadline = Duration::from_secs(2);
    upstream_config.stop_deadline = Duration::from_millis(200);
    upstream_config.metadata_deadline = Duration::from_millis(500);

    let bus = Arc::new(MemoryBus::new());
    let state = AppState::new(
        test_config(),
        Arc::new(UpstreamClient::new(upstream_config)),
        bus.clone() as Arc<dyn BusConnection>,
    );
    state
        .registry
        .bind(BoundUser {
            user_id: "u1".to_string(),
            last_upstream_session_id: 0,
            personalized_files: vec![],
        })
        .await;
    (state, bus)
}

async fn mock_upstream_ok() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": {"is_complete": true, "content": ""}
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/session_name"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .mount(&server)
        .await;
    server
}

fn args(session_id: &str, chat_id: &str, model_id: Option<&str>) -> StreamChatArgs {
    StreamChatArgs {
        user_id: "u1".to_string(),
        session_id: session_id.to_string(),
        chat_id: chat_id.to_string(),
        instance_id: None,
        model_id: model_id.map(str::to_string),
        prompt: "hi".to_string(),
        flags: ChatFlags::default(),
        temp_file_paths: vec![],
    }
}

async fn collect_until_terminal(
    mut rx: mpsc::Receiver<PushEvent>,
    deadline: Duration,
) -> Vec<PushEvent> {
    let mut events = Vec::new();
    let _ = tokio::time::timeout(deadline, async {
        while let Some(event) = rx.recv().await {
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
    })
    .await;
    events
}

fn event_types(events: &[PushEvent]) -> Vec<String> {
    events
        .iter()
        .map(|e| {
            serde_json::to_value(e).unwrap()["type"]
                .as_str()
                .unwrap()
                .to_string()
        })
        .collect()
}

async fn publish_tokens(bus: &MemoryBus, chat_id: &str, tokens: &[&str]) {
    for token in tokens {
        bus.publish(
            &chat_queue("u1"),
            json!({"type": "token", "data": token, "chat_id": chat_id}),
        )
        .await
        .unwrap();
    }
}

async fn publish_done(bus: &MemoryBus) {
    bus.publish(&chat_queue("u1"), json!({"type": "status", "token": "done"}))
        .await
        .unwrap();
}

#[tokio::test]
async fn normal_chat_non_thinking_model() {
    let server = mock_upstream_ok().await;
    let (state, bus) = test_state(&server.uri()).await;

    let rx = streaming_coordinator::stream_chat(state.clone(), args("19", "1", None))
        .await
        .unwrap();

    publish_tokens(&bus, "1", &["Hel", "lo", " world"]).await;
    publish_done(&bus).await;

    let events = collect_until_terminal(rx, Duration::from_secs(3)).await;
    let types = event_types(&events);
    assert_eq!(
        types,
        vec!["history_start", "history_end", "stream", "stream", "stream", "complete"]
    );

    let stream_text: String = events
        .iter()
        .filter(|e| matches!(e.kind, PushEventKind::Stream { .. }))
        .filter_map(|e| e.content.clone())
        .collect();
    assert_eq!(stream_text, "Hello world");

    match &events.last().unwrap().kind {
        PushEventKind::Complete {
            completion_type,
            total_tokens,
            reason,
        } => {
            assert_eq!(*completion_type, CompletionType::Done);
            assert_eq!(*total_tokens, 3);
            assert!(reason.is_none());
        }
        other => panic!("expected complete, got {other:?}"),
    }

    let transcript = state.transcripts.snapshot("u1", "19").await;
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[0].role, MessageRole::User);
    assert_eq!(transcript[0].content, "hi");
    assert!(transcript[0].is_complete);
    assert_eq!(transcript[1].content, "Hello world");
    assert!(transcript[1].is_complete);
    assert_eq!(transcript[1].token_count, 3);

    // Terminal cleanup frees the streaming slot and the consumer
    assert!(state.streams.get("u1", "19").await.is_none());
    assert!(!state.consumers.has_consumer("u1", "19").await);
}

#[tokio::test]
async fn thinking_model_retroactive_move() {
    let server = mock_upstream_ok().await;
    let (state, bus) = test_state(&server.uri()).await;

    let rx = streaming_coordinator::stream_chat(
        state.clone(),
        args("19", "1", Some("deepseek-r1")),
    )
    .await
    .unwrap();

    publish_tokens(&bus, "1", &["<think>", "why", "?", "</think>", "Because"]).await;
    publish_done(&bus).await;

    let events = collect_until_terminal(rx, Duration::from_secs(3)).await;
    let types = event_types(&events);
    assert_eq!(
        types,
        vec![
            "history_start",
            "history_end",
            "stream",
            "stream",
            "move_to_thinking",
            "thinking_complete",
            "stream",
            "complete"
        ]
    );

    // The optimistic phase tags both thinking tokens
    for event in &events[2..4] {
        match &event.kind {
            PushEventKind::Stream {
                message_id,
                is_pending_thinking,
                ..
            } => {
                assert!(message_id.is_some());
                assert_eq!(*is_pending_thinking, Some(true));
            }
            other => panic!("expected pending stream, got {other:?}"),
        }
    }

    match &events[4].kind {
        PushEventKind::MoveToThinking { pending_tokens, .. } => {
            assert_eq!(pending_tokens, &["why", "?"]);
            assert_eq!(events[4].content.as_deref(), Some("why?"));
        }
        other => panic!("expected move_to_thinking, got {other:?}"),
    }

    let transcript = state.transcripts.snapshot("u1", "19").await;
    let assistant = transcript
        .iter()
        .find(|m| m.role == MessageRole::Assistant)
        .unwrap();
    assert_eq!(assistant.content, "Because");
    assert_eq!(assistant.thinking_content.as_deref(), Some("why?"));
    assert!(assistant.has_thinking);
}

#[tokio::test]
async fn empty_thinking_pair_is_invisible() {
    let server = mock_upstream_ok().await;
    let (state, bus) = test_state(&server.uri()).await;

    let rx = streaming_coordinator::stream_chat(
        state.clone(),
        args("19", "1", Some("deepseek-r1")),
    )
    .await
    .unwrap();

    publish_tokens(&bus, "1", &["<think>", "</think>", "Hi"]).await;
    publish_done(&bus).await;

    let events = collect_until_terminal(rx, Duration::from_secs(3)).await;
    let types = event_types(&events);
    assert_eq!(
        types,
        vec!["history_start", "history_end", "stream", "complete"]
    );
    assert_eq!(events[2].content.as_deref(), Some("Hi"));
}

#[tokio::test]
async fn unterminated_thinking_is_counted_as_answer_content() {
    let server = mock_upstream_ok().await;
    let (state, bus) = test_state(&server.uri()).await;

    let rx = streaming_coordinator::stream_chat(
        state.clone(),
        args("19", "1", Some("deepseek-r1")),
    )
    .await
    .unwrap();

    // The thinking region never closes before the completion signal
    publish_tokens(&bus, "1", &["<think>", "half a thought"]).await;
    publish_done(&bus).await;

    let events = collect_until_terminal(rx, Duration::from_secs(3)).await;
    assert!(
        !events.iter().any(|e| matches!(
            e.kind,
            PushEventKind::MoveToThinking { .. } | PushEventKind::ThinkingComplete
        )),
        "no relocation fires for an unclosed region"
    );

    let total_tokens = match &events.last().unwrap().kind {
        PushEventKind::Complete { total_tokens, .. } => *total_tokens,
        other => panic!("expected complete, got {other:?}"),
    };

    // The optimistically streamed text lands in the answer content, and the
    // persisted and reported counts agree with it
    let transcript = state.transcripts.snapshot("u1", "19").await;
    let assistant = transcript
        .iter()
        .find(|m| m.role == MessageRole::Assistant)
        .unwrap();
    assert_eq!(assistant.content, "half a thought");
    assert!(assistant.thinking_content.is_none());
    assert!(assistant.is_complete);
    assert_eq!(assistant.token_count, 1);
    assert_eq!(total_tokens, 1);
}

#[tokio::test]
async fn tokens_for_other_chats_are_ignored() {
    let server = mock_upstream_ok().await;
    let (state, bus) = test_state(&server.uri()).await;

    let rx = streaming_coordinator::stream_chat(state.clone(), args("19", "1", None))
        .await
        .unwrap();

    // A stale delivery from a prior chat shares the queue
    publish_tokens(&bus, "9", &["stale"]).await;
    publish_tokens(&bus, "1", &["fresh"]).await;
    publish_done(&bus).await;

    let events = collect_until_terminal(rx, Duration::from_secs(3)).await;
    let stream_text: String = events
        .iter()
        .filter(|e| matches!(e.kind, PushEventKind::Stream { .. }))
        .filter_map(|e| e.content.clone())
        .collect();
    assert_eq!(stream_text, "fresh");

    let transcript = state.transcripts.snapshot("u1", "19").await;
    let assistant = transcript
        .iter()
        .find(|m| m.role == MessageRole::Assistant)
        .unwrap();
    assert_eq!(assistant.content, "fresh");
}

#[tokio::test]
async fn replay_precedes_live_events() {
    let server = mock_upstream_ok().await;
    let (state, bus) = test_state(&server.uri()).await;

    // First chat completes normally
    let rx = streaming_coordinator::stream_chat(state.clone(), args("19", "1", None))
        .await
        .unwrap();
    publish_tokens(&bus, "1", &["first"]).await;
    publish_done(&bus).await;
    collect_until_terminal(rx, Duration::from_secs(3)).await;

    // Second chat replays the finished exchange before streaming
    let rx = streaming_coordinator::stream_chat(state.clone(), args("19", "2", None))
        .await
        .unwrap();
    publish_tokens(&bus, "2", &["second"]).await;
    publish_done(&bus).await;

    let events = collect_until_terminal(rx, Duration::from_secs(3)).await;
    let types = event_types(&events);
    assert_eq!(
        types,
        vec![
            "history_start",
            "history",
            "history",
            "history_end",
            "stream",
            "complete"
        ]
    );
    match &events[1].kind {
        PushEventKind::History { role, .. } => assert_eq!(*role, MessageRole::User),
        other => panic!("expected history, got {other:?}"),
    }
}

#[tokio::test]
async fn silent_upstream_times_out_and_scrubs() {
    let server = MockServer::start().await;
    // Upstream accepts the chat but never reports complete, and nothing
    // arrives on the Bus
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": {"is_complete": false, "content": ""}
        })))
        .mount(&server)
        .await;

    let (state, _bus) = test_state(&server.uri()).await;
    let rx = streaming_coordinator::stream_chat(state.clone(), args("19", "1", None))
        .await
        .unwrap();

    let events = collect_until_terminal(rx, Duration::from_secs(5)).await;
    match &events.last().unwrap().kind {
        PushEventKind::Complete { reason, .. } => {
            assert_eq!(reason.as_deref(), Some("timeout"));
        }
        other => panic!("expected complete, got {other:?}"),
    }

    // No incomplete tail survives a timeout close
    let transcript = state.transcripts.snapshot("u1", "19").await;
    assert!(transcript.iter().all(|m| m.is_complete));
}

#[tokio::test]
async fn upstream_http_error_drains_then_closes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(504).set_body_string("gateway timeout"))
        .mount(&server)
        .await;

    let (state, _bus) = test_state(&server.uri()).await;
    let rx = streaming_coordinator::stream_chat(state.clone(), args("19", "1", None))
        .await
        .unwrap();

    let events = collect_until_terminal(rx, Duration::from_secs(5)).await;
    let types = event_types(&events);
    assert!(types.contains(&"error".to_string()));
    assert_eq!(types.last().unwrap(), "complete");
}

#[tokio::test]
async fn unauthenticated_chat_is_rejected() {
    let server = mock_upstream_ok().await;
    let (state, _bus) = test_state(&server.uri()).await;
    state.registry.clear().await;

    let err = streaming_coordinator::stream_chat(state, args("19", "1", None))
        .await
        .unwrap_err();
    assert!(matches!(err, web_service::error::AppError::Unauthenticated));
}

#[tokio::test]
async fn chat_limit_is_enforced() {
    let server = mock_upstream_ok().await;
    let (state, _bus) = test_state(&server.uri()).await;

    for chat in 1..=15 {
        state
            .transcripts
            .append(chat_core::message::ChatMessage::user_prompt(
                "u1",
                "19",
                &chat.to_string(),
                "prompt".to_string(),
                None,
            ))
            .await;
    }

    let err = streaming_coordinator::stream_chat(state, args("19", "16", None))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        web_service::error::AppError::LimitReached(_)
    ));
}

#[tokio::test]
async fn stop_cleans_up_despite_upstream_timeout() {
    let server = MockServer::start().await;
    // The chat call hangs and the stop call exceeds its deadline
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/stop"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    let (state, bus) = test_state(&server.uri()).await;

    let _rx = streaming_coordinator::stream_chat(state.clone(), args("19", "2", None))
        .await
        .unwrap();
    publish_tokens(&bus, "2", &["partial answer"]).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut room_rx = state.fanout.subscribe("chat_u1_19_2").await;

    let outcome = stop_service::stop_chat(
        state.clone(),
        "u1".to_string(),
        "19".to_string(),
        None,
        None,
    )
    .await;
    assert!(outcome.cleanup_completed);

    // Local cleanup does not wait for Upstream
    assert!(!state.consumers.has_consumer("u1", "19").await);
    let transcript = state.transcripts.snapshot("u1", "19").await;
    assert!(
        transcript.iter().all(|m| m.is_complete),
        "incomplete messages scrubbed, found {transcript:?}"
    );

    // The terminal event arrives once the Upstream stop times out
    let complete = tokio::time::timeout(Duration::from_secs(3), room_rx.recv())
        .await
        .expect("terminal event within stop deadline")
        .expect("room open");
    match complete.kind {
        PushEventKind::Complete {
            completion_type, ..
        } => assert_eq!(completion_type, CompletionType::TimeoutStopped),
        other => panic!("expected complete, got {other:?}"),
    }

    let cleanup = tokio::time::timeout(Duration::from_secs(1), room_rx.recv())
        .await
        .expect("cleanup hint follows")
        .expect("room open");
    assert!(matches!(
        cleanup.kind,
        PushEventKind::CleanupGeneration { .. }
    ));
}

#[tokio::test]
async fn resubmission_replaces_prior_consumer() {
    let server = mock_upstream_ok().await;
    let (state, bus) = test_state(&server.uri()).await;

    let rx1 = streaming_coordinator::stream_chat(state.clone(), args("19", "1", None))
        .await
        .unwrap();
    // Second submission for the same slot takes over before any token flows
    let rx2 = streaming_coordinator::stream_chat(state.clone(), args("19", "1", None))
        .await
        .unwrap();

    publish_tokens(&bus, "1", &["token"]).await;
    publish_done(&bus).await;

    let second = collect_until_terminal(rx2, Duration::from_secs(3)).await;
    assert_eq!(event_types(&second).last().unwrap(), "complete");

    // The first coordinator exits without a terminal event of its own
    let first = collect_until_terminal(rx1, Duration::from_millis(500)).await;
    assert!(
        !first.iter().any(PushEvent::is_terminal),
        "replaced stream must not double-complete"
    );
}
