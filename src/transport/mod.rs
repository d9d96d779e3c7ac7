//! Message bus abstraction
//!
//! Delivery is best effort: publishing to a topic nobody listens on is not an
//! error, slow subscribers may miss messages, and nothing is ordered across
//! topics. The protocol tolerates all of that.

pub mod memory;
pub mod relay_client;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::protocol::{Envelope, Outbound};

pub use memory::MemoryBus;
pub use relay_client::RelayTransport;

/// Buffered messages per topic before slow subscribers start lagging
pub const TOPIC_CAPACITY: usize = 256;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, topic: &str, envelope: Envelope) -> Result<()>;

    async fn subscribe(&self, topic: &str) -> Result<Subscription>;

    /// Tear the topic down once no local subscription remains
    async fn unsubscribe(&self, topic: &str) -> Result<()>;
}

/// Publish a batch, logging failures instead of stopping at the first one
pub async fn flush(transport: &dyn Transport, outbox: Vec<Outbound>) -> usize {
    let mut sent = 0;
    for Outbound { topic, envelope } in outbox {
        let kind = envelope.kind;
        match transport.publish(&topic, envelope).await {
            Ok(()) => sent += 1,
            Err(e) => {
                tracing::warn!(topic = %topic, kind = kind.as_str(), "publish failed: {}", e)
            }
        }
    }
    sent
}

/// A live subscription to one topic
pub struct Subscription {
    topic: String,
    receiver: broadcast::Receiver<Envelope>,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, receiver: broadcast::Receiver<Envelope>) -> Self {
        Self {
            topic: topic.into(),
            receiver,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next envelope, or `None` once the topic is torn down
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) => return Some(envelope),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(topic = %self.topic, skipped, "subscriber lagged, messages lost");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant used by tests and drains
    pub fn try_recv(&mut self) -> Option<Envelope> {
        loop {
            match self.receiver.try_recv() {
                Ok(envelope) => return Some(envelope),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
