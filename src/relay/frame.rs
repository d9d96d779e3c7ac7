//! Frames exchanged between relay clients and the relay server

use serde::{Deserialize, Serialize};

use crate::protocol::Envelope;

/// Client -> server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe { topic: String },
    Unsubscribe { topic: String },
    Publish { topic: String, envelope: Envelope },
}

/// Server -> client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Subscription is live; deliveries for the topic follow
    Subscribed { topic: String },
    Deliver { topic: String, envelope: Envelope },
    Error { message: String },
}
