use thiserror::Error;

pub type Result<T, E = UpstreamError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Upstream request failed: {0}")]
    Http(reqwest::Error),

    #[error("Upstream returned HTTP {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Upstream request timed out")]
    Timeout,

    #[error("Upstream reply could not be parsed: {0}")]
    BadReply(String),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UpstreamError::Timeout
        } else {
            UpstreamError::Http(err)
        }
    }
}
