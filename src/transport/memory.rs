//! In-process bus with one broadcast channel per topic

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};

use super::{Subscription, Transport, TOPIC_CAPACITY};
use crate::error::Result;
use crate::protocol::Envelope;

/// Shared in-memory bus; clones publish to the same topics
#[derive(Clone, Default)]
pub struct MemoryBus {
    topics: Arc<RwLock<HashMap<String, broadcast::Sender<Envelope>>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Active topics and their subscriber counts, sorted by name
    pub async fn topics(&self) -> Vec<(String, usize)> {
        let topics = self.topics.read().await;
        let mut list: Vec<(String, usize)> = topics
            .iter()
            .map(|(name, tx)| (name.clone(), tx.receiver_count()))
            .collect();
        list.sort();
        list
    }

    pub async fn subscriber_count(&self, topic: &str) -> usize {
        let topics = self.topics.read().await;
        topics.get(topic).map_or(0, |tx| tx.receiver_count())
    }
}

#[async_trait]
impl Transport for MemoryBus {
    async fn publish(&self, topic: &str, envelope: Envelope) -> Result<()> {
        let topics = self.topics.read().await;
        match topics.get(topic) {
            // No receivers is fine: fire and forget
            Some(tx) => {
                let _ = tx.send(envelope);
            }
            None => {
                tracing::trace!(topic = %topic, "publish to topic without subscribers");
            }
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription> {
        let mut topics = self.topics.write().await;
        let tx = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0);
        Ok(Subscription::new(topic, tx.subscribe()))
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        let mut topics = self.topics.write().await;
        if topics.get(topic).is_some_and(|tx| tx.receiver_count() == 0) {
            topics.remove(topic);
            tracing::debug!(topic = %topic, "topic torn down");
        }
        Ok(())
    }
}
