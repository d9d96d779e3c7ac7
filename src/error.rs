//! Error types for mission delegation

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Invalid mission: {0}")]
    InvalidMission(String),

    #[error("No respondent for mission {mission_id} after {waited_ms}ms")]
    NoRespondent { mission_id: String, waited_ms: u64 },

    #[error("Mission build error: {0}")]
    MissionBuild(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FleetError {
    /// Whether the error ends a handshake round on the delegator side
    pub fn abandons_round(&self) -> bool {
        matches!(
            self,
            FleetError::InvalidMission(_) | FleetError::NoRespondent { .. }
        )
    }
}

impl IntoResponse for FleetError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            FleetError::InvalidMission(e) => (StatusCode::BAD_REQUEST, e.clone()),
            FleetError::NoRespondent { .. } => (StatusCode::GATEWAY_TIMEOUT, self.to_string()),
            FleetError::MissionBuild(e) => (StatusCode::UNPROCESSABLE_ENTITY, e.clone()),
            FleetError::Transport(e) => {
                tracing::error!("Transport error: {}", e);
                (StatusCode::BAD_GATEWAY, format!("Transport error: {}", e))
            }
            FleetError::UnknownTopic(e) => (StatusCode::NOT_FOUND, e.clone()),
            FleetError::Serialization(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            FleetError::Config(e) | FleetError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.clone())
            }
        };

        (status, message).into_response()
    }
}

pub type Result<T> = std::result::Result<T, FleetError>;
