//! In-process message bus.
//!
//! One bounded mpsc channel per topic. Delayed messages (the lag topic) are
//! parked on a timer task and delivered when the delay elapses. Consumers are
//! plain `Receiver`s; each stage drains its topic with its own worker pool.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use super::{BusMessage, MessageBus, Topic};
use crate::types::{Error, Result};

/// Default per-topic channel capacity.
const DEFAULT_CAPACITY: usize = 256;

/// In-process bus backed by per-topic mpsc channels.
#[derive(Debug)]
pub struct MemoryBus {
    capacity: usize,
    senders: Mutex<HashMap<String, mpsc::Sender<BusMessage>>>,
}

impl MemoryBus {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            senders: Mutex::new(HashMap::new()),
        })
    }

    /// Open (or attach to) a topic and return its receiver.
    ///
    /// Each topic supports a single consumer group: calling `subscribe`
    /// again replaces the previous receiver's channel, so wire consumers
    /// once at startup.
    pub async fn subscribe(&self, topic: Topic) -> mpsc::Receiver<BusMessage> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.senders.lock().await.insert(topic.name(), tx);
        rx
    }

    async fn sender_for(&self, topic: &Topic) -> Option<mpsc::Sender<BusMessage>> {
        self.senders.lock().await.get(&topic.name()).cloned()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, topic: Topic, message: BusMessage) -> Result<()> {
        let Some(sender) = self.sender_for(&topic).await else {
            // No consumer wired; the message has nowhere to go. At-least-once
            // means we must not pretend it was delivered.
            tracing::debug!(topic = %topic, "no subscriber for topic; dropping");
            return Ok(());
        };

        match message.attributes.delay {
            Some(delay) if !delay.is_zero() => {
                // Honor the delay attribute off the publisher's critical path.
                let topic_name = topic.name();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if sender.send(message).await.is_err() {
                        tracing::warn!(topic = %topic_name, "delayed delivery found topic closed");
                    }
                });
                Ok(())
            }
            _ => sender
                .send(message)
                .await
                .map_err(|_| Error::internal(format!("topic {topic} closed"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn message() -> BusMessage {
        BusMessage {
            attributes: Default::default(),
            payload: serde_json::json!({"n": 1}),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = MemoryBus::new();
        let mut rx = bus.subscribe(Topic::Raw).await;

        bus.publish(Topic::Raw, message()).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.payload["n"], 1);
    }

    #[tokio::test]
    async fn test_publish_without_subscriber_is_dropped() {
        let bus = MemoryBus::new();
        assert!(bus.publish(Topic::Enriched, message()).await.is_ok());
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let bus = MemoryBus::new();
        let mut raw = bus.subscribe(Topic::Raw).await;
        let mut enriched = bus.subscribe(Topic::Enriched).await;

        bus.publish(Topic::Raw, message()).await.unwrap();

        assert!(raw.recv().await.is_some());
        assert!(enriched.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_delivery_honors_delay() {
        let bus = MemoryBus::new();
        let mut rx = bus.subscribe(Topic::Lag).await;

        let msg = message().with_delay(Duration::from_secs(60));
        bus.publish(Topic::Lag, msg).await.unwrap();

        // Nothing before the delay elapses.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());

        // Delivered after.
        tokio::time::sleep(Duration::from_secs(31)).await;
        tokio::task::yield_now().await;
        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .ok()
            .flatten();
        assert!(received.is_some());
    }
}
