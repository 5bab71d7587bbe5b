//! Current-user registry
//!
//! One user is bound per process at login and cleared at logout. The registry
//! is injected into application state so user context flows through a value,
//! never a mutable global.

use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{Result, SessionError};

/// The user bound at login
#[derive(Debug, Clone)]
pub struct BoundUser {
    pub user_id: String,
    /// Highest Upstream session id observed at login; local minting starts above it
    pub last_upstream_session_id: u64,
    pub personalized_files: Vec<String>,
}

#[derive(Clone, Default)]
pub struct UserRegistry {
    inner: Arc<RwLock<Option<BoundUser>>>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn bind(&self, user: BoundUser) {
        log::info!(
            "Binding user {} (last upstream session {})",
            user.user_id,
            user.last_upstream_session_id
        );
        *self.inner.write().await = Some(user);
    }

    pub async fn current(&self) -> Option<BoundUser> {
        self.inner.read().await.clone()
    }

    /// The bound user, or `Unauthenticated` when nobody is logged in
    pub async fn require_current(&self) -> Result<BoundUser> {
        self.current().await.ok_or(SessionError::Unauthenticated)
    }

    pub async fn clear(&self) {
        *self.inner.write().await = None;
    }
}
