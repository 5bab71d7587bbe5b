use thiserror::Error;

pub type Result<T, E = BusError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Bus unavailable: {0}")]
    Unavailable(String),

    #[error("Bus channel closed")]
    Closed,
}
