use actix_web::{web, HttpResponse};

use crate::dto::{StopRequest, StopResponse};
use crate::error::{AppError, Result};
use crate::server::AppState;
use crate::services::stop_service;

/// Stop a running generation. Always answers success once local cleanup is
/// done, whatever Upstream says.
pub async fn stop(
    req: web::Json<StopRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let req = req.into_inner();
    if req.user_id.is_empty() || req.session_id.is_empty() {
        return Err(AppError::Validation(
            "user_id and session_id are required".to_string(),
        ));
    }

    let outcome = stop_service::stop_chat(
        state.get_ref().clone(),
        req.user_id,
        req.session_id,
        req.chat_id,
        req.instance_id,
    )
    .await;

    Ok(HttpResponse::Ok().json(StopResponse {
        success: true,
        cleanup_completed: outcome.cleanup_completed,
    }))
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/stop").route(web::post().to(stop)));
}
