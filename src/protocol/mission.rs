//! Missions and their execution status
//!
//! A mission is the unit of work a delegator hands to exactly one worker.

use serde::{Deserialize, Serialize};

/// Execution status reported by a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MissionStatus {
    /// Worker is alive and not executing anything
    Idle,
    /// Mission is executing
    Running,
    /// Mission finished successfully
    Success,
    /// Mission failed, either while building or while executing
    Failure,
}

impl MissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissionStatus::Idle => "IDLE",
            MissionStatus::Running => "RUNNING",
            MissionStatus::Success => "SUCCESS",
            MissionStatus::Failure => "FAILURE",
        }
    }

    /// Check if this is a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, MissionStatus::Success | MissionStatus::Failure)
    }
}

impl std::fmt::Display for MissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "IDLE" => Ok(MissionStatus::Idle),
            "RUNNING" => Ok(MissionStatus::Running),
            "SUCCESS" => Ok(MissionStatus::Success),
            "FAILURE" => Ok(MissionStatus::Failure),
            _ => Err(format!("Invalid mission status: {}", s)),
        }
    }
}

/// A unit of delegable work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mission {
    /// Grouping key a worker matches against its capability tag
    pub mission_id: String,
    /// Empty until a worker has been bound
    #[serde(default)]
    pub target_worker_id: String,
    /// Serialized graph, opaque to the protocol
    pub graph_definition: String,
    /// Capability names the engine must provide, in order
    #[serde(default)]
    pub required_plugins: Vec<String>,
}

impl Mission {
    /// Create an unbound mission
    pub fn new(
        mission_id: impl Into<String>,
        graph_definition: impl Into<String>,
        required_plugins: Vec<String>,
    ) -> Self {
        Self {
            mission_id: mission_id.into(),
            target_worker_id: String::new(),
            graph_definition: graph_definition.into(),
            required_plugins,
        }
    }

    /// Copy of this mission addressed to a specific worker
    pub fn bound_to(&self, worker_id: impl Into<String>) -> Self {
        Self {
            target_worker_id: worker_id.into(),
            ..self.clone()
        }
    }

    pub fn is_bound(&self) -> bool {
        !self.target_worker_id.is_empty()
    }

    /// Reject missions that cannot be originated
    pub fn validate(&self) -> Result<(), String> {
        if self.mission_id.trim().is_empty() {
            return Err("mission_id must not be empty".to_string());
        }
        if self.graph_definition.trim().is_empty() {
            return Err(format!(
                "graph_definition for mission {} is empty",
                self.mission_id
            ));
        }
        Ok(())
    }
}
