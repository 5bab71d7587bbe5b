//! Push fanout
//!
//! Room-addressed delivery to clients. Rooms are fingerprints
//! `chat_{user}_{session}_{chat}[_{instance}]`; prefix broadcast covers every
//! instance of a chat when the stop path does not know which resubmission is
//! live.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use chat_core::events::PushEvent;

const ROOM_BUFFER: usize = 64;

#[derive(Clone, Default)]
pub struct PushFanout {
    /// Map of room fingerprint -> list of subscriber senders
    subscribers: Arc<RwLock<HashMap<String, Vec<mpsc::Sender<PushEvent>>>>>,
}

impl PushFanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events for a room
    pub async fn subscribe(&self, room: &str) -> mpsc::Receiver<PushEvent> {
        let (tx, rx) = mpsc::channel::<PushEvent>(ROOM_BUFFER);

        let mut subscribers = self.subscribers.write().await;
        subscribers.entry(room.to_string()).or_default().push(tx);

        tracing::debug!(
            room = %room,
            subscriber_count = subscribers.get(room).map(|v| v.len()).unwrap_or(0),
            "New push subscriber added"
        );

        rx
    }

    /// Broadcast an event to all subscribers of a room
    pub async fn broadcast(&self, room: &str, event: PushEvent) {
        let mut subscribers = self.subscribers.write().await;

        if let Some(senders) = subscribers.get_mut(room) {
            // Remove disconnected clients and send to active ones
            senders.retain(|sender| sender.try_send(event.clone()).is_ok());
            if senders.is_empty() {
                subscribers.remove(room);
            }
        }
    }

    /// Broadcast to every room sharing a fingerprint prefix, covering all
    /// instance ids of a chat
    pub async fn broadcast_prefix(&self, prefix: &str, event: PushEvent) {
        let mut subscribers = self.subscribers.write().await;
        let mut emptied = Vec::new();

        for (room, senders) in subscribers.iter_mut() {
            if room.starts_with(prefix) {
                senders.retain(|sender| sender.try_send(event.clone()).is_ok());
                if senders.is_empty() {
                    emptied.push(room.clone());
                }
            }
        }
        for room in emptied {
            subscribers.remove(&room);
        }
    }

    pub async fn subscriber_count(&self, room: &str) -> usize {
        self.subscribers
            .read()
            .await
            .get(room)
            .map(|v| v.len())
            .unwrap_or(0)
    }

    /// Logout reset: drop every subscription
    pub async fn flush(&self) {
        self.subscribers.write().await.clear();
    }
}
