use actix_web::{web, HttpResponse};
use log::{info, warn};

use chat_core::session::Session;

use crate::dto::{
    DeletedSession, NewSessionRequest, NewSessionResponse, NextChatIdRequest, NextChatIdResponse,
    SessionCountQuery, SessionCountResponse, SessionHistoryRequest, SessionHistoryResponse,
    SessionNameRequest, WindowManagement,
};
use crate::error::{AppError, Result};
use crate::server::AppState;
use crate::services::session_sync;

/// "Chat history": FIFO re-sync against Upstream, merged list back to the
/// client. A catalog that already holds Upstream entries is served from
/// memory.
pub async fn session_name(
    req: web::Json<SessionNameRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let req = req.into_inner();
    if req.user_id.is_empty() {
        return Err(AppError::Validation("user_id is required".to_string()));
    }

    if state.catalog.has_upstream_entries(&req.user_id).await {
        let sessions = state.catalog.merge_preview(&req.user_id, &[]).await;
        return Ok(HttpResponse::Ok().json(sessions));
    }

    let merged = session_sync::fifo_resync(state.get_ref(), &req.user_id).await?;
    Ok(HttpResponse::Ok().json(merged))
}

pub async fn session_history(
    req: web::Json<SessionHistoryRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let req = req.into_inner();
    if req.user_id.is_empty() || req.session_id.is_empty() {
        return Err(AppError::Validation(
            "user_id and session_id are required".to_string(),
        ));
    }

    let messages =
        session_sync::session_history(state.get_ref(), &req.user_id, &req.session_id).await?;
    Ok(HttpResponse::Ok().json(SessionHistoryResponse {
        session_id: req.session_id,
        messages: messages.into_iter().map(Into::into).collect(),
    }))
}

/// Mint a new local session id. The response carries the sliding-window
/// outcome so clients can reflect the eviction.
pub async fn new_session(
    req: web::Json<NewSessionRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let req = req.into_inner();
    if req.user_id.is_empty() {
        return Err(AppError::Validation("user_id is required".to_string()));
    }

    let cursor = state
        .registry
        .current()
        .await
        .filter(|u| u.user_id == req.user_id)
        .map(|u| u.last_upstream_session_id)
        .unwrap_or(0);

    let session_id = state.catalog.next_local_id(&req.user_id, cursor).await;
    let outcome = state
        .catalog
        .upsert(Session::new_local(&session_id, &req.user_id))
        .await;

    let mut window_management = WindowManagement::default();
    if outcome.window_warning {
        window_management.warning =
            Some("session window full; the next session will evict the oldest".to_string());
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
        info!(
            "Session {} evicted while minting {} for user {}",
            evicted.id, session_id, req.user_id
        );
        window_management.deleted_session = Some(DeletedSession {
            session_id: evicted.id,
            title: evicted.title,
        });
    }

    Ok(HttpResponse::Ok().json(NewSessionResponse {
        session_id,
        window_management,
    }))
}

/// Delete locally and on Upstream. The local delete always succeeds; the
/// Upstream delete is best-effort.
pub async fn delete_session(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let session_id = path.into_inner();
    let user = state.registry.require_current().await?;

    let deleted = state.catalog.delete(&user.user_id, &session_id).await;
    state
        .transcripts
        .drop_session(&user.user_id, &session_id)
        .await;
    state
        .catalog
        .drop_chat_counter(&user.user_id, &session_id)
        .await;

    if let Err(err) = state
        .upstream
        .delete_session(&user.user_id, &session_id)
        .await
    {
        warn!("Upstream delete for session {session_id} failed: {err}");
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "deleted_locally": deleted,
    })))
}

pub async fn next_chat_id(
    req: web::Json<NextChatIdRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let req = req.into_inner();
    if req.user_id.is_empty() || req.session_id.is_empty() {
        return Err(AppError::Validation(
            "user_id and session_id are required".to_string(),
        ));
    }
    let chat_id = state
        .catalog
        .next_chat_id(&req.user_id, &req.session_id)
        .await;
    Ok(HttpResponse::Ok().json(NextChatIdResponse { chat_id }))
}

pub async fn session_count(
    query: web::Query<SessionCountQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let count = state.catalog.count(&query.user_id).await;
    Ok(HttpResponse::Ok().json(SessionCountResponse { count }))
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/sessionName").route(web::post().to(session_name)))
        .service(web::resource("/sessionhistory").route(web::post().to(session_history)))
        .service(web::resource("/chatsession").route(web::post().to(new_session)))
        .service(web::resource("/deletesession/{id}").route(web::delete().to(delete_session)))
        .service(web::resource("/nextchatid").route(web::post().to(next_chat_id)))
        .service(web::resource("/sessioncount").route(web::get().to(session_count)));
}
