//! Consumer lifecycle manager
//!
//! At most one live consumer exists per `(user, session)` streaming slot.
//! Acquiring a slot cancels any prior occupant before subscribing, so a rapid
//! resubmission can never leave two pumps racing on the same queue.
//! Cancellation stops the pump task only; the underlying connection stays
//! open.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::connection::BusConnection;
use crate::error::{BusError, Result};

type SlotKey = (String, String);

struct ActiveConsumer {
    tag: String,
    cancel: CancellationToken,
}

pub struct ConsumerManager {
    bus: Arc<dyn BusConnection>,
    slots: Arc<RwLock<HashMap<SlotKey, ActiveConsumer>>>,
    epoch: AtomicU64,
}

impl ConsumerManager {
    pub fn new(bus: Arc<dyn BusConnection>) -> Self {
        Self {
            bus,
            slots: Arc::new(RwLock::new(HashMap::new())),
            epoch: AtomicU64::new(1),
        }
    }

    /// Consumer tag: `socket_{conn}_{session_id}_{chat_id}_{epoch}`
    pub fn next_tag(&self, conn: &str, session_id: &str, chat_id: &str) -> String {
        let epoch = self.epoch.fetch_add(1, Ordering::Relaxed);
        format!("socket_{conn}_{session_id}_{chat_id}_{epoch}")
    }

    /// Subscribe to `queue` and pump payloads into `forward` until cancelled.
    ///
    /// The subscription is created before the caller triggers Upstream, so no
    /// racing message can be missed.
    pub async fn acquire(
        &self,
        queue: &str,
        user_id: &str,
        session_id: &str,
        tag: String,
        forward: mpsc::Sender<Value>,
    ) -> Result<()> {
        if !self.bus.is_usable().await {
            return Err(BusError::Unavailable("bus connection not usable".to_string()));
        }

        let key: SlotKey = (user_id.to_string(), session_id.to_string());

        // Evict the prior occupant before subscribing
        if let Some(previous) = self.slots.write().await.remove(&key) {
            log::info!(
                "Replacing consumer {} for slot {}/{}",
                previous.tag,
                user_id,
                session_id
            );
            previous.cancel.cancel();
        }

        let mut subscription = self.bus.subscribe(queue).await?;
        let cancel = CancellationToken::new();
        let pump_cancel = cancel.clone();
        let pump_tag = tag.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = pump_cancel.cancelled() => {
                        log::debug!("Consumer {pump_tag} cancelled");
                        break;
                    }
                    payload = subscription.recv() => {
                        match payload {
                            Some(value) => {
                                if forward.send(value).await.is_err() {
                                    log::debug!("Consumer {pump_tag} handler dropped");
                                    break;
                                }
                            }
                            None => {
                                log::debug!("Consumer {pump_tag} queue closed");
                                break;
                            }
                        }
                    }
                }
            }
        });

        self.slots
            .write()
            .await
            .insert(key, ActiveConsumer { tag, cancel });
        Ok(())
    }

    /// Cancel the consumer occupying a slot. The slot is freed
    /// unconditionally.
    pub async fn cancel(&self, user_id: &str, session_id: &str) -> bool {
        let key: SlotKey = (user_id.to_string(), session_id.to_string());
        match self.slots.write().await.remove(&key) {
            Some(consumer) => {
                consumer.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel the first live consumer whose tag matches the identifiers.
    ///
    /// The tag embeds session and chat ids, so a stop scoped to a chat only
    /// cancels the consumer actually serving it.
    pub async fn cancel_for(
        &self,
        user_id: &str,
        session_id: &str,
        chat_id: Option<&str>,
    ) -> bool {
        let mut slots = self.slots.write().await;
        let needle = match chat_id {
            Some(chat) => format!("_{session_id}_{chat}_"),
            None => format!("_{session_id}_"),
        };

        let key = slots
            .iter()
            .find(|((user, _), consumer)| user == user_id && consumer.tag.contains(&needle))
            .map(|(key, _)| key.clone());

        match key {
            Some(key) => {
                if let Some(consumer) = slots.remove(&key) {
                    log::info!("Cancelled consumer {}", consumer.tag);
                    consumer.cancel.cancel();
                }
                true
            }
            None => false,
        }
    }

    pub async fn has_consumer(&self, user_id: &str, session_id: &str) -> bool {
        self.slots
            .read()
            .await
            .contains_key(&(user_id.to_string(), session_id.to_string()))
    }

    pub async fn active_count(&self) -> usize {
        self.slots.read().await.len()
    }

    /// Logout reset: cancel everything, free every slot
    pub async fn force_cleanup_all(&self) {
        let mut slots = self.slots.write().await;
        for (_, consumer) in slots.drain() {
            consumer.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{MemoryBus, UnusableBus};
    use serde_json::json;
    use std::time::Duration;

    fn manager_with_bus() -> (ConsumerManager, Arc<MemoryBus>) {
        let bus = Arc::new(MemoryBus::new());
        (ConsumerManager::new(bus.clone()), bus)
    }

    #[tokio::test]
    async fn acquire_pumps_messages_to_handler() {
        let (manager, bus) = manager_with_bus();
        let (tx, mut rx) = mpsc::channel(8);
        let tag = manager.next_tag("c1", "19", "1");
        manager.acquire("q", "u1", "19", tag, tx).await.unwrap();

        bus.publish("q", json!({"data": "tok"})).await.unwrap();
        let payload = rx.recv().await.unwrap();
        assert_eq!(payload["data"], "tok");
    }

    #[tokio::test]
    async fn second_acquire_replaces_first() {
        let (manager, bus) = manager_with_bus();
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);

        let tag1 = manager.next_tag("c1", "19", "1");
        manager.acquire("q", "u1", "19", tag1, tx1).await.unwrap();
        let tag2 = manager.next_tag("c1", "19", "2");
        manager.acquire("q", "u1", "19", tag2, tx2).await.unwrap();

        assert_eq!(manager.active_count().await, 1);

        // Give the replaced pump a beat to wind down
        tokio::time::sleep(Duration::from_millis(20)).await;
        bus.publish("q", json!({"data": "tok"})).await.unwrap();

        assert_eq!(rx2.recv().await.unwrap()["data"], "tok");
        assert!(rx1.recv().await.is_none(), "replaced consumer stays silent");
    }

    #[tokio::test]
    async fn cancel_for_matches_by_tag() {
        let (manager, _bus) = manager_with_bus();
        let (tx, _rx) = mpsc::channel(8);
        let tag = manager.next_tag("c1", "19", "2");
        manager.acquire("q", "u1", "19", tag, tx).await.unwrap();

        assert!(!manager.cancel_for("u1", "19", Some("9")).await);
        assert!(manager.cancel_for("u1", "19", Some("2")).await);
        assert!(!manager.has_consumer("u1", "19").await);
    }

    #[tokio::test]
    async fn cancel_for_without_chat_matches_session() {
        let (manager, _bus) = manager_with_bus();
        let (tx, _rx) = mpsc::channel(8);
        let tag = manager.next_tag("c1", "19", "2");
        manager.acquire("q", "u1", "19", tag, tx).await.unwrap();

        assert!(!manager.cancel_for("u2", "19", None).await, "wrong user");
        assert!(manager.cancel_for("u1", "19", None).await);
    }

    #[tokio::test]
    async fn unusable_bus_fails_acquire() {
        let manager = ConsumerManager::new(Arc::new(UnusableBus));
        let (tx, _rx) = mpsc::channel(8);
        let err = manager
            .acquire("q", "u1", "19", "socket_c1_19_1_1".to_string(), tx)
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Unavailable(_)));
    }

    #[tokio::test]
    async fn force_cleanup_frees_all_slots() {
        let (manager, _bus) = manager_with_bus();
        for session in ["18", "19"] {
            let (tx, _rx) = mpsc::channel(8);
            let tag = manager.next_tag("c1", session, "1");
            manager.acquire("q", "u1", session, tag, tx).await.unwrap();
        }
        assert_eq!(manager.active_count().await, 2);
        manager.force_cleanup_all().await;
        assert_eq!(manager.active_count().await, 0);
    }
}
