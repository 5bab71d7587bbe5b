//! Bus connection abstraction
//!
//! One process-wide connection serves both consume and publish. Dropping a
//! subscription detaches its queue binding only; the connection itself stays
//! open for Upstream publishing elsewhere.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};

use crate::error::{BusError, Result};

const SUBSCRIPTION_BUFFER: usize = 256;

/// A live queue binding. Receives every payload published to the queue from
/// the moment of subscription.
pub struct BusSubscription {
    queue: String,
    rx: mpsc::Receiver<Value>,
}

impl BusSubscription {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }
}

#[async_trait]
pub trait BusConnection: Send + Sync {
    async fn publish(&self, queue: &str, payload: Value) -> Result<()>;
    async fn subscribe(&self, queue: &str) -> Result<BusSubscription>;
    async fn is_usable(&self) -> bool;
}

/// In-process broker with named queues
///
/// Publishing fans out to every live subscriber of the queue; dead senders
/// are pruned as they are found. Delivery is at-least-once from the consumer's
/// perspective: a payload published with no subscriber is dropped, matching a
/// broker queue nobody has bound yet.
#[derive(Clone, Default)]
pub struct MemoryBus {
    queues: Arc<RwLock<HashMap<String, Vec<mpsc::Sender<Value>>>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscriber_count(&self, queue: &str) -> usize {
        self.queues
            .read()
            .await
            .get(queue)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl BusConnection for MemoryBus {
    async fn publish(&self, queue: &str, payload: Value) -> Result<()> {
        let mut queues = self.queues.write().await;
        if let Some(senders) = queues.get_mut(queue) {
            senders.retain(|sender| sender.try_send(payload.clone()).is_ok());
            if senders.is_empty() {
                queues.remove(queue);
            }
        }
        Ok(())
    }

    async fn subscribe(&self, queue: &str) -> Result<BusSubscription> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.queues
            .write()
            .await
            .entry(queue.to_string())
            .or_default()
            .push(tx);
        log::debug!("New subscriber on queue {queue}");
        Ok(BusSubscription {
            queue: queue.to_string(),
            rx,
        })
    }

    async fn is_usable(&self) -> bool {
        true
    }
}

/// A connection that refuses everything, for exercising UNAVAILABLE paths
#[derive(Clone, Default)]
pub struct UnusableBus;

#[async_trait]
impl BusConnection for UnusableBus {
    async fn publish(&self, _queue: &str, _payload: Value) -> Result<()> {
        Err(BusError::Unavailable("connection down".to_string()))
    }

    async fn subscribe(&self, _queue: &str) -> Result<BusSubscription> {
        Err(BusError::Unavailable("connection down".to_string()))
    }

    async fn is_usable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_reaches_every_subscriber() {
        let bus = MemoryBus::new();
        let mut first = bus.subscribe("q").await.unwrap();
        let mut second = bus.subscribe("q").await.unwrap();

        bus.publish("q", json!({"data": "x"})).await.unwrap();

        assert_eq!(first.recv().await.unwrap()["data"], "x");
        assert_eq!(second.recv().await.unwrap()["data"], "x");
    }

    #[tokio::test]
    async fn dropped_subscription_is_pruned_on_publish() {
        let bus = MemoryBus::new();
        let sub = bus.subscribe("q").await.unwrap();
        assert_eq!(bus.subscriber_count("q").await, 1);

        drop(sub);
        bus.publish("q", json!({})).await.unwrap();
        assert_eq!(bus.subscriber_count("q").await, 0);
    }

    #[tokio::test]
    async fn queues_are_isolated() {
        let bus = MemoryBus::new();
        let mut a = bus.subscribe("a").await.unwrap();
        let _b = bus.subscribe("b").await.unwrap();

        bus.publish("b", json!({"data": "for b"})).await.unwrap();
        bus.publish("a", json!({"data": "for a"})).await.unwrap();

        assert_eq!(a.recv().await.unwrap()["data"], "for a");
    }
}
