//! Agent configuration
//!
//! Both roles are configured from plain structs with sensible defaults. The CLI
//! fills them from flags and `FLEET_*` environment variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FleetError, Result};

/// Reference tick cadence
pub const DEFAULT_TICK_MS: u64 = 50;
pub const DEFAULT_CLAIM_TIMEOUT_MS: u64 = 5_000;

/// How a worker decides whether a polled mission is for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy", content = "value")]
pub enum EligibilityPolicy {
    /// Capability tag must equal the mission id
    ExactTag,
    /// Mission id must start with the given prefix
    Prefix(String),
    /// Mission id must be one of the listed ids
    AnyOf(Vec<String>),
}

impl Default for EligibilityPolicy {
    fn default() -> Self {
        EligibilityPolicy::ExactTag
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Unique id; also names the private command and status topics
    pub worker_id: String,
    /// Mission id this worker accepts under the default policy
    pub capability: String,
    /// How polled mission ids are matched
    pub eligibility: EligibilityPolicy,
    /// Control cycle period in milliseconds
    pub tick_ms: u64,
    /// How long a claimant waits for a Command before reverting to idle
    pub claim_timeout_ms: u64,
    /// Used when a Command does not name any plugins
    pub plugins: Vec<String>,
    /// Publish IDLE status as a liveness signal when not executing
    pub publish_idle: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
            capability: "generic".to_string(),
            eligibility: EligibilityPolicy::ExactTag,
            tick_ms: DEFAULT_TICK_MS,
            claim_timeout_ms: DEFAULT_CLAIM_TIMEOUT_MS,
            plugins: Vec::new(),
            publish_idle: false,
        }
    }
}

impl WorkerConfig {
    /// Create with a fixed id and capability tag, defaults elsewhere
    pub fn new(worker_id: impl Into<String>, capability: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            capability: capability.into(),
            ..Self::default()
        }
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn claim_timeout(&self) -> Duration {
        Duration::from_millis(self.claim_timeout_ms)
    }

    /// Whether the configured policy accepts the given mission id
    pub fn accepts(&self, mission_id: &str) -> bool {
        match &self.eligibility {
            EligibilityPolicy::ExactTag => self.capability == mission_id,
            EligibilityPolicy::Prefix(prefix) => mission_id.starts_with(prefix.as_str()),
            EligibilityPolicy::AnyOf(ids) => ids.iter().any(|id| id == mission_id),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_id.trim().is_empty() {
            return Err(FleetError::Config("worker_id must not be empty".into()));
        }
        if self.worker_id.contains(char::is_whitespace) {
            return Err(FleetError::Config(format!(
                "worker_id must not contain whitespace: {:?}",
                self.worker_id
            )));
        }
        if self.tick_ms == 0 {
            return Err(FleetError::Config("tick_ms must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DelegatorConfig {
    /// Sender id on Poll and Command messages
    pub delegator_id: String,
    /// Control cycle period in milliseconds
    pub tick_ms: u64,
    /// How long to wait for the first Claim before abandoning the round
    pub claim_timeout_ms: u64,
    /// Re-publish the Poll on every tick until a Claim arrives
    pub repeat_poll: bool,
}

impl Default for DelegatorConfig {
    fn default() -> Self {
        Self {
            delegator_id: format!(
                "delegator-{}",
                &uuid::Uuid::new_v4().simple().to_string()[..8]
            ),
            tick_ms: DEFAULT_TICK_MS,
            claim_timeout_ms: DEFAULT_CLAIM_TIMEOUT_MS,
            repeat_poll: true,
        }
    }
}

impl DelegatorConfig {
    pub fn new(delegator_id: impl Into<String>) -> Self {
        Self {
            delegator_id: delegator_id.into(),
            ..Self::default()
        }
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn claim_timeout(&self) -> Duration {
        Duration::from_millis(self.claim_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.delegator_id.trim().is_empty() {
            return Err(FleetError::Config("delegator_id must not be empty".into()));
        }
        if self.tick_ms == 0 {
            return Err(FleetError::Config("tick_ms must be positive".into()));
        }
        Ok(())
    }
}

/// Split a comma separated plugin list, dropping blanks
pub fn parse_plugin_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
