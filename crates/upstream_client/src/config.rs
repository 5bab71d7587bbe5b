//! Upstream client configuration

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    /// Deadline for metadata calls (session_name, counters, delete)
    pub metadata_deadline: Duration,
    /// Deadline for session-history calls
    pub history_deadline: Duration,
    /// Deadline for the chat submission
    pub chat_deadline: Duration,
    /// Deadline for the stop call
    pub stop_deadline: Duration,
}

impl UpstreamConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            metadata_deadline: Duration::from_secs(10),
            history_deadline: Duration::from_secs(15),
            chat_deadline: Duration::from_secs(30),
            stop_deadline: Duration::from_secs(100),
        }
    }
}
