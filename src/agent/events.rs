//! Events broadcast by agent runners to local observers

use serde::Serialize;

use crate::protocol::MissionStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A delegator polled the fleet
    RoundStarted {
        delegator_id: String,
        mission_id: String,
    },
    /// A delegator accepted a claim and sent the mission body
    WorkerBound {
        delegator_id: String,
        mission_id: String,
        worker_id: String,
    },
    /// A delegator received a status from its claimant
    StatusObserved {
        mission_id: String,
        worker_id: String,
        status: MissionStatus,
    },
    /// The claimant reached a terminal status
    RoundCompleted {
        mission_id: String,
        worker_id: String,
        status: MissionStatus,
    },
    /// The round ended without a worker
    RoundAbandoned { mission_id: String, reason: String },
    /// A worker claimed a polled mission
    ClaimPublished {
        worker_id: String,
        mission_id: String,
    },
    /// A worker built the mission and started executing
    MissionAccepted {
        worker_id: String,
        mission_id: String,
    },
    /// A worker could not build the mission
    MissionRejected {
        worker_id: String,
        mission_id: String,
        error: String,
    },
    /// A worker lost its bus subscription with a mission in flight
    MissionDropped {
        worker_id: String,
        mission_id: String,
        reason: String,
    },
    /// A worker reported progress
    StatusPublished {
        worker_id: String,
        mission_id: String,
        status: MissionStatus,
    },
}
