//! chat_core - Core types for the streaming chat orchestrator
//!
//! This crate provides the foundational types used across all orchestrator crates:
//! - `message` - Chat messages and transcript entries
//! - `session` - Session metadata and sources
//! - `model_profile` - Per-model thinking-tag protocol
//! - `events` - Push-channel event envelope
//! - `room` - Room fingerprints for push addressing
//! - `config` - Orchestrator configuration

pub mod config;
pub mod events;
pub mod message;
pub mod model_profile;
pub mod room;
pub mod session;

// Re-export commonly used types
pub use config::OrchestratorConfig;
pub use events::{CompletionType, PushEvent, PushEventKind};
pub use message::{ChatMessage, MessageRole, MessageType};
pub use model_profile::ModelProfile;
pub use room::Room;
pub use session::{Session, SessionSource};
