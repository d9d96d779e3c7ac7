//! Topic names on the mission bus
//!
//! Private channels are derived from the worker id alone, so no registry is needed.

use serde::{Deserialize, Serialize};

/// Shared broadcast topic carrying polls and claims
pub const POLL_TOPIC: &str = "mission.poll";

const COMMAND_SUFFIX: &str = ".command";
const STATUS_SUFFIX: &str = ".status";

/// Topic on which a worker receives its mission command
pub fn command_topic(worker_id: &str) -> String {
    format!("{}{}", worker_id, COMMAND_SUFFIX)
}

/// Topic on which a worker reports status
pub fn status_topic(worker_id: &str) -> String {
    format!("{}{}", worker_id, STATUS_SUFFIX)
}

/// The private command/status pair of one worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPair {
    pub command: String,
    pub status: String,
}

impl ChannelPair {
    pub fn for_worker(worker_id: &str) -> Self {
        Self {
            command: command_topic(worker_id),
            status: status_topic(worker_id),
        }
    }
}
