use thiserror::Error;

pub type Result<T, E = SessionError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not found")]
    NotFound,

    #[error("No user is bound to this process")]
    Unauthenticated,

    #[error("Chat limit reached for session {0}")]
    LimitReached(String),

    #[error("Validation error: {0}")]
    Validation(String),
}
