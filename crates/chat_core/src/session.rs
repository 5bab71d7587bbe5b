//! Session metadata
//!
//! Session ids are monotonic decimal strings. Ordering comparisons parse to
//! integers so that "9" < "10" holds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where the catalog learned about a session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionSource {
    /// Minted locally, Upstream has not named it yet
    Local,
    /// Reported by Upstream's session index
    Upstream,
    /// Minted locally, title later overwritten by Upstream
    LocalUpdatedFromUpstream,
}

/// One catalog entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub title: String,
    pub owner_user_id: String,
    pub current_chat_id: String,
    pub total_chats: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub source: SessionSource,
}

impl Session {
    pub fn new_local(id: &str, owner_user_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            title: format!("Chat Session {id}"),
            owner_user_id: owner_user_id.to_string(),
            current_chat_id: "1".to_string(),
            total_chats: 0,
            created_at: now,
            updated_at: now,
            source: SessionSource::Local,
        }
    }

    /// Numeric value of the decimal id, for window ordering
    pub fn numeric_id(&self) -> u64 {
        parse_session_id(&self.id)
    }
}

/// Parse a decimal session id; malformed ids sort first so they are evicted first
pub fn parse_session_id(id: &str) -> u64 {
    id.parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_ordering_beats_lexicographic() {
        assert!(parse_session_id("9") < parse_session_id("10"));
        assert_eq!(parse_session_id("not-a-number"), 0);
    }

    #[test]
    fn new_local_session_defaults() {
        let session = Session::new_local("15", "u1");
        assert_eq!(session.title, "Chat Session 15");
        assert_eq!(session.source, SessionSource::Local);
        assert_eq!(session.current_chat_id, "1");
    }
}
