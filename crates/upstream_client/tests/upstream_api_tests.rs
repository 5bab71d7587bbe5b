//! Upstream client tests against a mock HTTP server

use std::time::Duration;

use serde_json::json;
use upstream_client::{ChatFlags, ChatRequest, UpstreamClient, UpstreamConfig, UpstreamError};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn chat_request() -> ChatRequest {
    ChatRequest {
        user_id: "u1".to_string(),
        chat_id: "1".to_string(),
        session_id: "19".to_string(),
        llm_model_id: "deepseek-r1".to_string(),
        flags: ChatFlags {
            first_chat_flag: true,
            ..Default::default()
        },
        prompt: "hi".to_string(),
        temp_file_paths: vec![],
        room_id: "chat_u1_19_1".to_string(),
    }
}

fn client_for(server: &MockServer) -> UpstreamClient {
    UpstreamClient::new(UpstreamConfig::new(server.uri()))
}

#[tokio::test]
async fn send_chat_parses_wrapped_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .and(body_partial_json(json!({"first_chat_flag": true})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": {"is_complete": "True", "content": "ok", "SESSION_NAME": "Crash triage"}
        })))
        .mount(&server)
        .await;

    let reply = client_for(&server).send_chat(&chat_request()).await.unwrap();
    assert!(reply.is_complete);
    assert_eq!(reply.session_name.as_deref(), Some("Crash triage"));
}

#[tokio::test]
async fn send_chat_surfaces_http_error_with_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(504).set_body_string("gateway timeout"))
        .mount(&server)
        .await;

    let err = client_for(&server).send_chat(&chat_request()).await.unwrap_err();
    match err {
        UpstreamError::Status { status, body } => {
            assert_eq!(status.as_u16(), 504);
            assert_eq!(body, "gateway timeout");
        }
        other => panic!("expected Status error, got {other:?}"),
    }
}

#[tokio::test]
async fn send_chat_reports_bad_reply_for_unparseable_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = client_for(&server).send_chat(&chat_request()).await.unwrap_err();
    assert!(matches!(err, UpstreamError::BadReply(_)));
}

#[tokio::test]
async fn timeouts_map_to_timeout_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/session_name"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let mut config = UpstreamConfig::new(server.uri());
    config.metadata_deadline = Duration::from_millis(100);
    let client = UpstreamClient::new(config);

    let err = client.request_session_names("u1").await.unwrap_err();
    assert!(matches!(err, UpstreamError::Timeout));
}

#[tokio::test]
async fn stop_failure_is_a_value_not_a_panic() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/stop"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let result = client_for(&server)
        .stop_chat("u1", "19", Some("2"), None)
        .await;
    assert!(result.is_err());
}
