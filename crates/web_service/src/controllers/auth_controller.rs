use actix_web::{web, HttpResponse};
use log::info;

use session_manager::BoundUser;

use crate::dto::LoginRequest;
use crate::error::{AppError, Result};
use crate::server::AppState;

/// Bind the current user. Upstream has already verified credentials and
/// minted the token; this records the session cursor and personalized files.
pub async fn login(
    req: web::Json<LoginRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let req = req.into_inner();
    if req.user_id.is_empty() {
        return Err(AppError::Validation("user_id is required".to_string()));
    }

    state
        .catalog
        .reseed(&req.user_id, req.last_upstream_session_id)
        .await;
    state
        .registry
        .bind(BoundUser {
            user_id: req.user_id.clone(),
            last_upstream_session_id: req.last_upstream_session_id,
            personalized_files: req.personalized_files,
        })
        .await;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true })))
}

/// Total flush: catalogs, transcripts, counters, consumers, push
/// subscriptions, and the bound user are all zeroed.
pub async fn logout(state: web::Data<AppState>) -> Result<HttpResponse> {
    info!("Logout: flushing all process state");
    state.flush_all().await;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true })))
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/login").route(web::post().to(login)))
        .service(web::resource("/logout").route(web::post().to(logout)));
}
