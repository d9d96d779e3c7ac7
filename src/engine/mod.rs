//! Task-graph engine seam
//!
//! The protocol never looks inside a mission graph. A worker hands the graph and
//! its plugin list to a [`TaskGraphEngine`], keeps the returned handle, and steps
//! it once per tick.

pub mod capability;
pub mod graph;

use thiserror::Error;

use crate::error::FleetError;
use crate::protocol::MissionStatus;

pub use capability::{ActionNode, Capability, CapabilityRegistry};
pub use graph::GraphEngine;

/// Result of a single engine step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    Running,
    Success,
    Failure,
}

impl StepResult {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepResult::Running)
    }
}

impl From<StepResult> for MissionStatus {
    fn from(result: StepResult) -> Self {
        match result {
            StepResult::Running => MissionStatus::Running,
            StepResult::Success => MissionStatus::Success,
            StepResult::Failure => MissionStatus::Failure,
        }
    }
}

/// Why an engine refused to build a mission
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("malformed graph: {0}")]
    MalformedGraph(String),

    #[error("plugin not available: {0}")]
    MissingPlugin(String),

    #[error("capability {0} is used by the graph but not listed in required plugins")]
    UndeclaredCapability(String),

    #[error("invalid parameters for {capability}: {message}")]
    InvalidParams { capability: String, message: String },
}

impl From<BuildError> for FleetError {
    fn from(err: BuildError) -> Self {
        FleetError::MissionBuild(err.to_string())
    }
}

/// A built mission, advanced one step at a time
///
/// `step` must return promptly; long-running work belongs inside the nodes.
pub trait ExecutionHandle: Send {
    fn step(&mut self) -> StepResult;
}

pub trait TaskGraphEngine: Send + Sync {
    fn build(
        &self,
        graph_definition: &str,
        required_plugins: &[String],
    ) -> Result<Box<dyn ExecutionHandle>, BuildError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_result_maps_to_status() {
        assert_eq!(MissionStatus::from(StepResult::Running), MissionStatus::Running);
        assert_eq!(MissionStatus::from(StepResult::Success), MissionStatus::Success);
        assert_eq!(MissionStatus::from(StepResult::Failure), MissionStatus::Failure);
        assert!(!StepResult::Running.is_terminal());
        assert!(StepResult::Failure.is_terminal());
    }

    #[test]
    fn test_build_error_into_fleet_error() {
        let err: FleetError = BuildError::MissingPlugin("grip".into()).into();
        assert!(matches!(err, FleetError::MissionBuild(msg) if msg.contains("grip")));
    }
}
