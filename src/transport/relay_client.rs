//! Transport over a relay server's WebSocket

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::{Subscription, Transport, TOPIC_CAPACITY};
use crate::error::{FleetError, Result};
use crate::protocol::Envelope;
use crate::relay::{ClientFrame, ServerFrame};

const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Local fan-out for one relay topic
struct TopicEntry {
    tx: broadcast::Sender<Envelope>,
    /// Set once the relay confirmed the subscription
    acked: bool,
    /// Subscribers waiting for that confirmation
    waiters: Vec<oneshot::Sender<()>>,
}

type Topics = Arc<RwLock<HashMap<String, TopicEntry>>>;

/// Relay client; clones share one connection
#[derive(Clone)]
pub struct RelayTransport {
    tx: mpsc::Sender<ClientFrame>,
    topics: Topics,
    subscribe_timeout: Duration,
}

impl RelayTransport {
    /// Connect to a relay at `ws://host:port/ws`
    pub async fn connect(url: &str) -> Result<Self> {
        tracing::info!("Connecting to relay {}", url);

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| FleetError::Transport(format!("connect {}: {}", url, e)))?;
        let (mut write, mut read) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<ClientFrame>(TOPIC_CAPACITY);
        let topics: Topics = Arc::new(RwLock::new(HashMap::new()));

        let task_topics = topics.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(frame) = out_rx.recv() => {
                        let text = match serde_json::to_string(&frame) {
                            Ok(text) => text,
                            Err(e) => {
                                tracing::error!("Failed to encode frame: {}", e);
                                continue;
                            }
                        };
                        if write.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(result) = read.next() => {
                        match result {
                            Ok(Message::Text(text)) => {
                                match serde_json::from_str::<ServerFrame>(&text) {
                                    Ok(frame) => dispatch(frame, &task_topics).await,
                                    Err(e) => {
                                        tracing::warn!("Failed to parse frame: {} - {}", e, text);
                                    }
                                }
                            }
                            Ok(Message::Close(_)) => break,
                            Err(e) => {
                                tracing::error!("WebSocket error: {}", e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    else => break,
                }
            }
            // Closing every local topic ends all subscriptions and pending waits
            task_topics.write().await.clear();
            tracing::info!("Relay connection closed");
        });

        Ok(Self {
            tx: out_tx,
            topics,
            subscribe_timeout: SUBSCRIBE_TIMEOUT,
        })
    }

    /// How long `subscribe` waits for the relay to confirm a topic
    pub fn with_subscribe_timeout(mut self, timeout: Duration) -> Self {
        self.subscribe_timeout = timeout;
        self
    }

    /// Forget a topic the relay never confirmed; its waiters fail with it
    async fn discard_pending(&self, topic: &str) {
        let mut topics = self.topics.write().await;
        if topics.get(topic).is_some_and(|entry| !entry.acked) {
            topics.remove(topic);
        }
    }

    async fn send(&self, frame: ClientFrame) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| FleetError::Transport("relay connection closed".into()))
    }
}

async fn dispatch(frame: ServerFrame, topics: &Topics) {
    match frame {
        ServerFrame::Deliver { topic, envelope } => {
            let topics = topics.read().await;
            if let Some(entry) = topics.get(&topic) {
                let _ = entry.tx.send(envelope);
            }
        }
        ServerFrame::Subscribed { topic } => {
            let mut topics = topics.write().await;
            if let Some(entry) = topics.get_mut(&topic) {
                entry.acked = true;
                for waiter in entry.waiters.drain(..) {
                    let _ = waiter.send(());
                }
            }
        }
        ServerFrame::Error { message } => {
            tracing::warn!("Relay error: {}", message);
        }
    }
}

#[async_trait]
impl Transport for RelayTransport {
    async fn publish(&self, topic: &str, envelope: Envelope) -> Result<()> {
        self.send(ClientFrame::Publish {
            topic: topic.to_string(),
            envelope,
        })
        .await
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let (receiver, first) = {
            let mut topics = self.topics.write().await;
            match topics.get_mut(topic) {
                Some(entry) if entry.acked => {
                    return Ok(Subscription::new(topic, entry.tx.subscribe()));
                }
                // Someone else sent the Subscribe; wait for the same ack
                Some(entry) => {
                    entry.waiters.push(ack_tx);
                    (entry.tx.subscribe(), false)
                }
                None => {
                    let (tx, rx) = broadcast::channel(TOPIC_CAPACITY);
                    topics.insert(
                        topic.to_string(),
                        TopicEntry {
                            tx,
                            acked: false,
                            waiters: vec![ack_tx],
                        },
                    );
                    (rx, true)
                }
            }
        };

        if first {
            let sent = self
                .send(ClientFrame::Subscribe {
                    topic: topic.to_string(),
                })
                .await;
            if let Err(e) = sent {
                self.discard_pending(topic).await;
                return Err(e);
            }
        }

        match tokio::time::timeout(self.subscribe_timeout, ack_rx).await {
            Ok(Ok(())) => Ok(Subscription::new(topic, receiver)),
            Ok(Err(_)) | Err(_) => {
                if first {
                    self.discard_pending(topic).await;
                }
                Err(FleetError::Transport(format!(
                    "relay did not confirm subscription to {}",
                    topic
                )))
            }
        }
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        let remove = {
            let mut topics = self.topics.write().await;
            let unused = topics
                .get(topic)
                .is_some_and(|entry| entry.acked && entry.tx.receiver_count() == 0);
            if unused {
                topics.remove(topic);
            }
            unused
        };
        if remove {
            self.send(ClientFrame::Unsubscribe {
                topic: topic.to_string(),
            })
            .await?;
        }
        Ok(())
    }
}
