//! Capability providers for the graph engine
//!
//! A capability is a named factory of action nodes. Workers advertise nothing
//! about their capabilities on the bus; a mission simply lists the names it needs
//! and the engine looks them up here.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::{BuildError, StepResult};

/// A leaf node of a running graph
pub trait ActionNode: Send {
    fn tick(&mut self) -> StepResult;
}

/// A named provider of action nodes
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;

    /// Build a node from the parameters given in the graph
    fn instantiate(&self, params: &Value) -> Result<Box<dyn ActionNode>, BuildError>;
}

/// Capabilities known to a worker, keyed by name
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    providers: HashMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Registry preloaded with `wait`, `log` and `fail`
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(WaitCapability));
        registry.register(Arc::new(LogCapability));
        registry.register(Arc::new(FailCapability));
        registry
    }

    /// Add a provider, replacing any previous one with the same name
    pub fn register(&mut self, capability: Arc<dyn Capability>) {
        self.providers
            .insert(capability.name().to_string(), capability);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.providers.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// Sorted names, for logging
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Reports RUNNING for `ticks` steps, then SUCCESS
struct WaitCapability;

struct WaitNode {
    remaining: u64,
}

impl Capability for WaitCapability {
    fn name(&self) -> &str {
        "wait"
    }

    fn instantiate(&self, params: &Value) -> Result<Box<dyn ActionNode>, BuildError> {
        let remaining = match params.get("ticks") {
            None | Some(Value::Null) => 1,
            Some(v) => v.as_u64().ok_or_else(|| BuildError::InvalidParams {
                capability: "wait".to_string(),
                message: format!("ticks must be a non-negative integer, got {}", v),
            })?,
        };
        Ok(Box::new(WaitNode { remaining }))
    }
}

impl ActionNode for WaitNode {
    fn tick(&mut self) -> StepResult {
        if self.remaining > 0 {
            self.remaining -= 1;
            StepResult::Running
        } else {
            StepResult::Success
        }
    }
}

/// Logs its `message` and succeeds
struct LogCapability;

struct LogNode {
    message: String,
}

impl Capability for LogCapability {
    fn name(&self) -> &str {
        "log"
    }

    fn instantiate(&self, params: &Value) -> Result<Box<dyn ActionNode>, BuildError> {
        let message = params
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(Box::new(LogNode { message }))
    }
}

impl ActionNode for LogNode {
    fn tick(&mut self) -> StepResult {
        tracing::info!(message = %self.message, "mission log");
        StepResult::Success
    }
}

/// Always fails
struct FailCapability;

struct FailNode;

impl Capability for FailCapability {
    fn name(&self) -> &str {
        "fail"
    }

    fn instantiate(&self, _params: &Value) -> Result<Box<dyn ActionNode>, BuildError> {
        Ok(Box::new(FailNode))
    }
}

impl ActionNode for FailNode {
    fn tick(&mut self) -> StepResult {
        StepResult::Failure
    }
}
