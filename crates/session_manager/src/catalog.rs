//! Session catalog
//!
//! Per-user sliding window of at most `window` sessions. On overflow the
//! session with the numerically smallest id is evicted. Local session ids are
//! minted strictly above both the Upstream cursor recorded at login and any id
//! minted before.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use chat_core::session::{parse_session_id, Session, SessionSource};

/// Result of inserting or updating a session
#[derive(Debug, Default)]
pub struct UpsertOutcome {
    /// The insert filled the window; the next insert will evict
    pub window_warning: bool,
    /// Session evicted to make room, with its id for associated-state cleanup
    pub evicted: Option<Session>,
}

/// One entry of an Upstream session-index payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamSessionEntry {
    pub session_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// A catalog entry annotated with where its title came from
#[derive(Debug, Clone, Serialize)]
pub struct MergedSession {
    #[serde(flatten)]
    pub session: Session,
    pub title_source: String,
}

#[derive(Clone)]
pub struct SessionCatalog {
    sessions: Arc<RwLock<HashMap<String, Vec<Session>>>>,
    /// Per-user local session id counter
    counters: Arc<RwLock<HashMap<String, u64>>>,
    /// Per-(user, session) chat id counter
    chat_counters: Arc<RwLock<HashMap<(String, String), u64>>>,
    window: usize,
}

impl SessionCatalog {
    pub fn new(window: usize) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            counters: Arc::new(RwLock::new(HashMap::new())),
            chat_counters: Arc::new(RwLock::new(HashMap::new())),
            window,
        }
    }

    /// Reseed the local id counter at login
    pub async fn reseed(&self, user_id: &str, last_upstream_session_id: u64) {
        self.counters
            .write()
            .await
            .insert(user_id.to_string(), last_upstream_session_id);
    }

    /// Mint the next local session id: `max(upstream cursor, counter) + 1`
    pub async fn next_local_id(&self, user_id: &str, last_upstream_session_id: u64) -> String {
        let mut counters = self.counters.write().await;
        let counter = counters.entry(user_id.to_string()).or_insert(0);
        let next = (*counter).max(last_upstream_session_id) + 1;
        *counter = next;
        next.to_string()
    }

    /// Next chat id within a session, starting at "1"
    pub async fn next_chat_id(&self, user_id: &str, session_id: &str) -> String {
        let mut counters = self.chat_counters.write().await;
        let counter = counters
            .entry((user_id.to_string(), session_id.to_string()))
            .or_insert(0);
        *counter += 1;
        counter.to_string()
    }

    /// Insert a new session or update an existing one
    ///
    /// New sessions go to the front. The sliding window is applied before the
    /// insert, so the catalog never exceeds `window` entries per user.
    pub async fn upsert(&self, session: Session) -> UpsertOutcome {
        let mut sessions = self.sessions.write().await;
        let list = sessions.entry(session.owner_user_id.clone()).or_default();
        let mut outcome = UpsertOutcome::default();

        if let Some(existing) = list.iter_mut().find(|s| s.id == session.id) {
            existing.updated_at = Utc::now();
            existing.current_chat_id = session.current_chat_id;
            existing.total_chats = existing.total_chats.max(session.total_chats);
            return outcome;
        }

        if list.len() >= self.window {
            if let Some(pos) = smallest_id_position(list) {
                let evicted = list.remove(pos);
                log::info!(
                    "Evicting session {} for user {} (window {})",
                    evicted.id,
                    evicted.owner_user_id,
                    self.window
                );
                outcome.evicted = Some(evicted);
            }
        }

        list.insert(0, session);
        outcome.window_warning = list.len() == self.window;
        outcome
    }

    pub async fn get(&self, user_id: &str, session_id: &str) -> Option<Session> {
        self.sessions
            .read()
            .await
            .get(user_id)
            .and_then(|list| list.iter().find(|s| s.id == session_id).cloned())
    }

    pub async fn set_title(
        &self,
        user_id: &str,
        session_id: &str,
        title: &str,
        source: SessionSource,
    ) -> bool {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions
            .get_mut(user_id)
            .and_then(|list| list.iter_mut().find(|s| s.id == session_id))
        {
            session.title = title.to_string();
            session.source = source;
            session.updated_at = Utc::now();
            true
        } else {
            false
        }
    }

    pub async fn delete(&self, user_id: &str, session_id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        if let Some(list) = sessions.get_mut(user_id) {
            let before = list.len();
            list.retain(|s| s.id != session_id);
            return list.len() < before;
        }
        false
    }

    pub async fn count(&self, user_id: &str) -> usize {
        self.sessions
            .read()
            .await
            .get(user_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Sessions for a user, sorted by id descending
    pub async fn snapshot(&self, user_id: &str) -> Vec<Session> {
        let mut list = self
            .sessions
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default();
        list.sort_by(|a, b| b.numeric_id().cmp(&a.numeric_id()));
        list
    }

    /// A catalog holding at least one Upstream-sourced entry is served from
    /// memory; local-only means the user has never opened history since login.
    pub async fn has_upstream_entries(&self, user_id: &str) -> bool {
        self.sessions
            .read()
            .await
            .get(user_id)
            .map(|list| {
                list.iter().any(|s| {
                    matches!(
                        s.source,
                        SessionSource::Upstream | SessionSource::LocalUpdatedFromUpstream
                    )
                })
            })
            .unwrap_or(false)
    }

    /// Merge the catalog with an Upstream session-index payload, without
    /// mutating. The Upstream title always wins for a shared id.
    pub async fn merge_preview(
        &self,
        user_id: &str,
        entries: &[UpstreamSessionEntry],
    ) -> Vec<MergedSession> {
        let local = self.snapshot(user_id).await;
        merge(user_id, local, entries)
    }

    /// Apply an Upstream session-index payload to the catalog
    pub async fn merge_upstream(&self, user_id: &str, entries: &[UpstreamSessionEntry]) {
        let merged = {
            let local = self
                .sessions
                .read()
                .await
                .get(user_id)
                .cloned()
                .unwrap_or_default();
            merge(user_id, local, entries)
        };

        let mut list: Vec<Session> = merged.into_iter().map(|m| m.session).collect();
        list.truncate(self.window);
        self.sessions
            .write()
            .await
            .insert(user_id.to_string(), list);
    }

    /// Logout reset
    pub async fn flush(&self) {
        self.sessions.write().await.clear();
        self.counters.write().await.clear();
        self.chat_counters.write().await.clear();
    }

    /// Eviction support: drop the chat counter tied to a session
    pub async fn drop_chat_counter(&self, user_id: &str, session_id: &str) {
        self.chat_counters
            .write()
            .await
            .remove(&(user_id.to_string(), session_id.to_string()));
    }
}

fn smallest_id_position(list: &[Session]) -> Option<usize> {
    list.iter()
        .enumerate()
        .min_by_key(|(_, s)| s.numeric_id())
        .map(|(pos, _)| pos)
}

fn merge(
    user_id: &str,
    local: Vec<Session>,
    entries: &[UpstreamSessionEntry],
) -> Vec<MergedSession> {
    let mut merged: Vec<MergedSession> = Vec::new();

    for entry in entries {
        let session = match local.iter().find(|s| s.id == entry.session_id) {
            Some(existing) => {
                let mut session = existing.clone();
                session.title = entry.title.clone();
                session.source = match existing.source {
                    SessionSource::Upstream => SessionSource::Upstream,
                    _ => SessionSource::LocalUpdatedFromUpstream,
                };
                session.updated_at = Utc::now();
                session
            }
            None => {
                let now = Utc::now();
                Session {
                    id: entry.session_id.clone(),
                    title: entry.title.clone(),
                    owner_user_id: user_id.to_string(),
                    current_chat_id: "1".to_string(),
                    total_chats: 0,
                    created_at: entry.created_at.unwrap_or(now),
                    updated_at: now,
                    source: SessionSource::Upstream,
                }
            }
        };
        merged.push(MergedSession {
            session,
            title_source: "rabbitmq".to_string(),
        });
    }

    // Sessions absent from the payload keep their titles and provenance
    for session in local {
        if !merged.iter().any(|m| m.session.id == session.id) {
            let title_source = match session.source {
                SessionSource::Local => "local",
                SessionSource::Upstream | SessionSource::LocalUpdatedFromUpstream => "rabbitmq",
            };
            merged.push(MergedSession {
                session,
                title_source: title_source.to_string(),
            });
        }
    }

    merged.sort_by(|a, b| {
        parse_session_id(&b.session.id).cmp(&parse_session_id(&a.session.id))
    });
    merged
}
