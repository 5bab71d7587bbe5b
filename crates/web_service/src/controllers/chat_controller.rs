use actix_web::{web, HttpResponse};
use bytes::Bytes;
use log::info;

use crate::dto::ChatStreamRequest;
use crate::error::{AppError, Result};
use crate::server::AppState;
use crate::services::streaming_coordinator::{self, StreamChatArgs};

/// Initiate a chat. The response body is one JSON object per line, mirroring
/// the events delivered to the chat's room.
pub async fn chat(
    req: web::Json<ChatStreamRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let req = req.into_inner();
    validate(&req)?;

    info!(
        "Chat request: user {} session {} chat {}",
        req.user_id, req.session_id, req.chat_id
    );

    let mut rx = streaming_coordinator::stream_chat(
        state.get_ref().clone(),
        StreamChatArgs {
            user_id: req.user_id,
            session_id: req.session_id,
            chat_id: req.chat_id,
            instance_id: req.instance_id,
            model_id: req.model_id,
            prompt: req.prompt,
            flags: req.flags,
            temp_file_paths: req.temp_file_paths,
        },
    )
    .await?;

    Ok(HttpResponse::Ok()
        .content_type("application/x-ndjson")
        .streaming(async_stream::stream! {
            while let Some(event) = rx.recv().await {
                let mut line = serde_json::to_vec(&event).unwrap_or_default();
                line.push(b'\n');
                yield Ok::<_, actix_web::Error>(Bytes::from(line));
            }
        }))
}

fn validate(req: &ChatStreamRequest) -> Result<()> {
    if req.user_id.is_empty() {
        return Err(AppError::Validation("user_id is required".to_string()));
    }
    if req.session_id.is_empty() {
        return Err(AppError::Validation("session_id is required".to_string()));
    }
    if req.chat_id.is_empty() {
        return Err(AppError::Validation("chat_id is required".to_string()));
    }
    if req.prompt.is_empty() {
        return Err(AppError::Validation("prompt is required".to_string()));
    }
    Ok(())
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/chat").route(web::post().to(chat)));
}
