//! Session Manager - session catalog, transcript store, current-user registry
//!
//! All state is process memory. Logout is the authoritative reset: `flush`
//! clears every catalog, transcript, counter, and the bound user.

pub mod catalog;
pub mod error;
pub mod registry;
pub mod transcript;

pub use catalog::{MergedSession, SessionCatalog, UpsertOutcome, UpstreamSessionEntry};
pub use error::{Result, SessionError};
pub use registry::{BoundUser, UserRegistry};
pub use transcript::TranscriptStore;
