//! Relay server: axum WebSocket handler plus a small HTTP surface

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

use super::frame::{ClientFrame, ServerFrame};
use crate::error::{FleetError, Result};
use crate::protocol::Envelope;
use crate::transport::TOPIC_CAPACITY;

/// Topics shared by every relay connection
#[derive(Default)]
pub struct RelayState {
    topics: RwLock<HashMap<String, broadcast::Sender<Envelope>>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicInfo {
    pub topic: String,
    pub subscribers: usize,
}

impl RelayState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    async fn subscribe(&self, topic: &str) -> broadcast::Receiver<Envelope> {
        let mut topics = self.topics.write().await;
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe()
    }

    async fn publish(&self, topic: &str, envelope: Envelope) -> usize {
        let topics = self.topics.read().await;
        topics
            .get(topic)
            .and_then(|tx| tx.send(envelope).ok())
            .unwrap_or(0)
    }

    async fn prune(&self, topic: &str) {
        let mut topics = self.topics.write().await;
        if topics.get(topic).is_some_and(|tx| tx.receiver_count() == 0) {
            topics.remove(topic);
        }
    }

    pub async fn topic_info(&self) -> Vec<TopicInfo> {
        let topics = self.topics.read().await;
        let mut list: Vec<TopicInfo> = topics
            .iter()
            .map(|(topic, tx)| TopicInfo {
                topic: topic.clone(),
                subscribers: tx.receiver_count(),
            })
            .collect();
        list.sort_by(|a, b| a.topic.cmp(&b.topic));
        list
    }
}

/// Router exposing `/health`, `/topics`, `/topics/:topic` and `/ws`
pub fn router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/topics", get(list_topics))
        .route("/topics/:topic", get(get_topic))
        .route("/ws", get(handler))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn list_topics(State(state): State<Arc<RelayState>>) -> Json<Vec<TopicInfo>> {
    Json(state.topic_info().await)
}

async fn get_topic(
    State(state): State<Arc<RelayState>>,
    Path(topic): Path<String>,
) -> Result<Json<TopicInfo>> {
    state
        .topic_info()
        .await
        .into_iter()
        .find(|info| info.topic == topic)
        .map(Json)
        .ok_or(FleetError::UnknownTopic(topic))
}

/// WebSocket handler
pub async fn handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<RelayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let (mut sender, mut receiver) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerFrame>(TOPIC_CAPACITY);

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("Failed to encode frame: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut forwarders: HashMap<String, JoinHandle<()>> = HashMap::new();

    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("WebSocket error: {}", e);
                break;
            }
        };

        let frame: ClientFrame = match serde_json::from_str(&msg) {
            Ok(frame) => frame,
            Err(e) => {
                let error = ServerFrame::Error {
                    message: format!("Invalid frame: {}", e),
                };
                if out_tx.send(error).await.is_err() {
                    break;
                }
                continue;
            }
        };

        match frame {
            ClientFrame::Subscribe { topic } => {
                if !forwarders.contains_key(&topic) {
                    let rx = state.subscribe(&topic).await;
                    let forwarder = spawn_forwarder(topic.clone(), rx, out_tx.clone());
                    forwarders.insert(topic.clone(), forwarder);
                    tracing::debug!(topic = %topic, "relay subscription added");
                }
                if out_tx.send(ServerFrame::Subscribed { topic }).await.is_err() {
                    break;
                }
            }
            ClientFrame::Unsubscribe { topic } => {
                if let Some(forwarder) = forwarders.remove(&topic) {
                    forwarder.abort();
                    let _ = forwarder.await;
                    state.prune(&topic).await;
                }
            }
            ClientFrame::Publish { topic, envelope } => {
                let delivered = state.publish(&topic, envelope).await;
                tracing::trace!(topic = %topic, delivered, "relayed envelope");
            }
        }
    }

    for (topic, forwarder) in forwarders {
        forwarder.abort();
        let _ = forwarder.await;
        state.prune(&topic).await;
    }
    writer.abort();
}

fn spawn_forwarder(
    topic: String,
    rx: broadcast::Receiver<Envelope>,
    out_tx: mpsc::Sender<ServerFrame>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stream = BroadcastStream::new(rx);
        while let Some(item) = stream.next().await {
            match item {
                Ok(envelope) => {
                    let frame = ServerFrame::Deliver {
                        topic: topic.clone(),
                        envelope,
                    };
                    if out_tx.send(frame).await.is_err() {
                        break;
                    }
                }
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!(topic = %topic, skipped, "relay connection lagged");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health() {
        let app = router(RelayState::new());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_topic_is_404() {
        let app = router(RelayState::new());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/topics/w1.status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_state_publish_and_prune() {
        let state = RelayState::new();
        let mut rx = state.subscribe("mission.poll").await;

        let delivered = state
            .publish("mission.poll", Envelope::poll("boss", "m1"))
            .await;
        assert_eq!(delivered, 1);
        assert_eq!(rx.recv().await.unwrap().mission_id, "m1");

        assert_eq!(
            state.topic_info().await,
            vec![TopicInfo {
                topic: "mission.poll".into(),
                subscribers: 1
            }]
        );

        drop(rx);
        state.prune("mission.poll").await;
        assert!(state.topic_info().await.is_empty());
        assert_eq!(state.publish("mission.poll", Envelope::poll("boss", "m1")).await, 0);
    }
}
