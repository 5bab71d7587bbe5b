//! Configuration for the orchestrator
//!
//! Supports loading configuration from environment variables with fallback to defaults.

use std::time::Duration;

/// Orchestrator configuration, loaded once at startup
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Base URL of the Upstream inference service
    pub upstream_base_url: String,
    /// Port the HTTP server binds to
    pub port: u16,

    /// Idle gate before the first Bus message when Upstream already reported complete
    pub idle_before_first_complete: Duration,
    /// Idle gate before the first Bus message when Upstream did not report complete
    pub idle_before_first: Duration,
    /// Quiescence gate after the first Bus message when Upstream reported complete
    pub quiescence_complete: Duration,
    /// Quiescence gate after the first Bus message otherwise
    pub quiescence: Duration,
    /// Drain window after an Upstream HTTP error
    pub error_drain: Duration,
    /// Global per-chat safety cap
    pub global_deadline: Duration,

    /// Upstream HTTP deadline for metadata calls (session_name, counters)
    pub upstream_metadata_deadline: Duration,
    /// Upstream HTTP deadline for session-history calls
    pub upstream_history_deadline: Duration,
    /// Upstream HTTP deadline for the chat call
    pub upstream_chat_deadline: Duration,
    /// Upstream HTTP deadline for the stop call
    pub upstream_stop_deadline: Duration,

    /// Bounded wait for a Bus payload during session-index / history re-sync
    pub bus_sync_wait: Duration,

    /// Maximum sessions kept per user before eviction
    pub session_window: usize,
    /// Maximum prompts accepted per session
    pub chat_limit: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            upstream_base_url: "http://127.0.0.1:9000".to_string(),
            port: 8080,
            idle_before_first_complete: Duration::from_millis(300),
            idle_before_first: Duration::from_millis(1000),
            quiescence_complete: Duration::from_millis(1500),
            quiescence: Duration::from_millis(5000),
            error_drain: Duration::from_millis(2000),
            global_deadline: Duration::from_secs(60),
            upstream_metadata_deadline: Duration::from_secs(10),
            upstream_history_deadline: Duration::from_secs(15),
            upstream_chat_deadline: Duration::from_secs(30),
            upstream_stop_deadline: Duration::from_secs(100),
            bus_sync_wait: Duration::from_secs(3),
            session_window: 10,
            chat_limit: 15,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl OrchestratorConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `UPSTREAM_BASE_URL`: Upstream service base URL (default: http://127.0.0.1:9000)
    /// - `APP_PORT`: HTTP bind port (default: 8080)
    /// - `CHAT_GLOBAL_DEADLINE_SECS`: per-chat safety cap (default: 60)
    /// - `SESSION_WINDOW`: sessions kept per user (default: 10)
    /// - `SESSION_CHAT_LIMIT`: prompts accepted per session (default: 15)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            upstream_base_url: std::env::var("UPSTREAM_BASE_URL")
                .unwrap_or(defaults.upstream_base_url),
            port: env_parse("APP_PORT", defaults.port),
            global_deadline: Duration::from_secs(env_parse(
                "CHAT_GLOBAL_DEADLINE_SECS",
                defaults.global_deadline.as_secs(),
            )),
            session_window: env_parse("SESSION_WINDOW", defaults.session_window),
            chat_limit: env_parse("SESSION_CHAT_LIMIT", defaults.chat_limit),
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_streaming_gates() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.idle_before_first_complete.as_millis(), 300);
        assert_eq!(config.quiescence_complete.as_millis(), 1500);
        assert_eq!(config.quiescence.as_millis(), 5000);
        assert_eq!(config.upstream_stop_deadline.as_secs(), 100);
        assert_eq!(config.session_window, 10);
        assert_eq!(config.chat_limit, 15);
    }
}
