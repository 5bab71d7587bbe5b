//! Active-stream table
//!
//! One entry per `(user, session)` with an open streaming chat. The stop path
//! resolves chat and instance ids from here, and removing the entry tells the
//! coordinator its consumer loss was intentional.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct ActiveStream {
    pub chat_id: String,
    pub instance_id: Option<String>,
    pub started_at: DateTime<Utc>,
}

#[derive(Clone, Default)]
pub struct ActiveStreamTable {
    entries: Arc<RwLock<HashMap<(String, String), ActiveStream>>>,
}

impl ActiveStreamTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        user_id: &str,
        session_id: &str,
        chat_id: &str,
        instance_id: Option<&str>,
    ) {
        self.entries.write().await.insert(
            (user_id.to_string(), session_id.to_string()),
            ActiveStream {
                chat_id: chat_id.to_string(),
                instance_id: instance_id.map(str::to_string),
                started_at: Utc::now(),
            },
        );
    }

    pub async fn get(&self, user_id: &str, session_id: &str) -> Option<ActiveStream> {
        self.entries
            .read()
            .await
            .get(&(user_id.to_string(), session_id.to_string()))
            .cloned()
    }

    /// Remove the entry only if it still belongs to the given chat
    pub async fn remove_for_chat(&self, user_id: &str, session_id: &str, chat_id: &str) -> bool {
        let key = (user_id.to_string(), session_id.to_string());
        let mut entries = self.entries.write().await;
        if entries.get(&key).is_some_and(|e| e.chat_id == chat_id) {
            entries.remove(&key);
            true
        } else {
            false
        }
    }

    pub async fn remove(&self, user_id: &str, session_id: &str) -> Option<ActiveStream> {
        self.entries
            .write()
            .await
            .remove(&(user_id.to_string(), session_id.to_string()))
    }

    pub async fn flush(&self) {
        self.entries.write().await.clear();
    }
}
