//! upstream_client - HTTP client for the Upstream inference service
//!
//! Upstream accepts chat submissions over HTTP and delivers tokens through the
//! Bus; this client covers the HTTP side only. Every call carries its own
//! deadline, and failures are returned as values so callers can decide whether
//! the Bus fallthrough still applies.

pub mod client;
pub mod config;
pub mod error;
pub mod models;

pub use client::UpstreamClient;
pub use config::UpstreamConfig;
pub use error::UpstreamError;
pub use models::{ChatFlags, ChatReply, ChatRequest};
