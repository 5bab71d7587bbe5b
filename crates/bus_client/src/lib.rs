//! bus_client - Bus connection, payload decoding, consumer lifecycle
//!
//! The Bus is a broker with named queues and at-least-once delivery. Tokens
//! for all chats of a user share one queue, disambiguated by `chat_id`. The
//! `ConsumerManager` guarantees at most one live consumer per
//! `(user, session)` streaming slot and frees slots unconditionally on
//! cancellation.

pub mod connection;
pub mod consumer;
pub mod error;
pub mod message;

pub use connection::{BusConnection, BusSubscription, MemoryBus};
pub use consumer::ConsumerManager;
pub use error::BusError;
pub use message::{BusMessage, SessionIndexEntry};

/// Token/status queue for a user's chats
pub fn chat_queue(user_id: &str) -> String {
    format!("chat_stream_{user_id}")
}

/// Upstream-published latest-N session list
pub fn session_index_queue(user_id: &str) -> String {
    format!("session_index_{user_id}")
}

/// Full transcript for a specific session on demand
pub fn session_history_queue(user_id: &str, session_id: &str) -> String {
    format!("session_history_{user_id}_{session_id}")
}
