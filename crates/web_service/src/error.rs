use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

use bus_client::BusError;
use session_manager::SessionError;
use upstream_client::UpstreamError;

pub type Result<T, E = AppError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("No user is bound to this process")]
    Unauthenticated,

    #[error("Chat limit reached for session {0}")]
    LimitReached(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound => AppError::NotFound("session".to_string()),
            SessionError::Unauthenticated => AppError::Unauthenticated,
            SessionError::LimitReached(session) => AppError::LimitReached(session),
            SessionError::Validation(msg) => AppError::Validation(msg),
        }
    }
}

impl From<BusError> for AppError {
    fn from(err: BusError) -> Self {
        AppError::Unavailable(err.to_string())
    }
}

impl From<UpstreamError> for AppError {
    fn from(err: UpstreamError) -> Self {
        AppError::Unavailable(err.to_string())
    }
}

#[derive(Serialize)]
struct JsonError {
    message: String,
    r#type: String,
}

#[derive(Serialize)]
struct JsonErrorWrapper {
    error: JsonError,
}

impl AppError {
    fn error_type(&self) -> &'static str {
        match self {
            AppError::Unauthenticated => "auth_error",
            AppError::LimitReached(_) => "limit_error",
            AppError::Validation(_) => "validation_error",
            AppError::Unavailable(_) => "unavailable_error",
            AppError::NotFound(_) => "not_found",
            AppError::Internal(_) => "api_error",
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::LimitReached(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();
        let error_response = JsonErrorWrapper {
            error: JsonError {
                message: self.to_string(),
                r#type: self.error_type().to_string(),
            },
        };
        HttpResponse::build(status_code).json(error_response)
    }
}
