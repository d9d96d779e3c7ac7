//! Reference task-graph engine
//!
//! Graphs are JSON trees of `sequence`, `fallback` and `action` nodes:
//!
//! ```json
//! {"sequence": [
//!     {"action": {"capability": "log", "params": {"message": "starting"}}},
//!     {"action": {"capability": "wait", "params": {"ticks": 3}}}
//! ]}
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use super::capability::{ActionNode, CapabilityRegistry};
use super::{BuildError, ExecutionHandle, StepResult, TaskGraphEngine};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
enum NodeSpec {
    Sequence(Vec<NodeSpec>),
    Fallback(Vec<NodeSpec>),
    Action {
        capability: String,
        #[serde(default)]
        params: Value,
    },
}

enum Node {
    Sequence { children: Vec<Node>, current: usize },
    Fallback { children: Vec<Node>, current: usize },
    Action(Box<dyn ActionNode>),
}

impl Node {
    fn tick(&mut self) -> StepResult {
        match self {
            Node::Sequence { children, current } => {
                while *current < children.len() {
                    match children[*current].tick() {
                        StepResult::Running => return StepResult::Running,
                        StepResult::Failure => {
                            *current = 0;
                            return StepResult::Failure;
                        }
                        StepResult::Success => *current += 1,
                    }
                }
                *current = 0;
                StepResult::Success
            }
            Node::Fallback { children, current } => {
                while *current < children.len() {
                    match children[*current].tick() {
                        StepResult::Running => return StepResult::Running,
                        StepResult::Success => {
                            *current = 0;
                            return StepResult::Success;
                        }
                        StepResult::Failure => *current += 1,
                    }
                }
                *current = 0;
                StepResult::Failure
            }
            Node::Action(action) => action.tick(),
        }
    }
}

/// Handle over a built graph; sticks at its first terminal result
struct GraphHandle {
    root: Node,
    finished: Option<StepResult>,
}

impl ExecutionHandle for GraphHandle {
    fn step(&mut self) -> StepResult {
        if let Some(result) = self.finished {
            return result;
        }
        let result = self.root.tick();
        if result.is_terminal() {
            self.finished = Some(result);
        }
        result
    }
}

/// Engine building JSON graphs against a capability registry
#[derive(Clone)]
pub struct GraphEngine {
    registry: Arc<CapabilityRegistry>,
}

impl GraphEngine {
    pub fn new(registry: CapabilityRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    fn instantiate(&self, spec: NodeSpec, declared: &HashSet<&str>) -> Result<Node, BuildError> {
        match spec {
            NodeSpec::Sequence(children) => Ok(Node::Sequence {
                children: self.instantiate_all(children, declared)?,
                current: 0,
            }),
            NodeSpec::Fallback(children) => Ok(Node::Fallback {
                children: self.instantiate_all(children, declared)?,
                current: 0,
            }),
            NodeSpec::Action { capability, params } => {
                if !declared.contains(capability.as_str()) {
                    return Err(BuildError::UndeclaredCapability(capability));
                }
                let provider = self
                    .registry
                    .get(&capability)
                    .ok_or_else(|| BuildError::MissingPlugin(capability.clone()))?;
                Ok(Node::Action(provider.instantiate(&params)?))
            }
        }
    }

    fn instantiate_all(
        &self,
        specs: Vec<NodeSpec>,
        declared: &HashSet<&str>,
    ) -> Result<Vec<Node>, BuildError> {
        specs
            .into_iter()
            .map(|spec| self.instantiate(spec, declared))
            .collect()
    }
}

impl Default for GraphEngine {
    fn default() -> Self {
        Self::new(CapabilityRegistry::with_builtins())
    }
}

impl TaskGraphEngine for GraphEngine {
    fn build(
        &self,
        graph_definition: &str,
        required_plugins: &[String],
    ) -> Result<Box<dyn ExecutionHandle>, BuildError> {
        // Every declared plugin has to load, used or not.
        for plugin in required_plugins {
            if !self.registry.has(plugin) {
                return Err(BuildError::MissingPlugin(plugin.clone()));
            }
            tracing::debug!(plugin = %plugin, "plugin loaded");
        }

        let spec: NodeSpec = serde_json::from_str(graph_definition)
            .map_err(|e| BuildError::MalformedGraph(e.to_string()))?;

        let declared: HashSet<&str> = required_plugins.iter().map(String::as_str).collect();
        let root = self.instantiate(spec, &declared)?;

        Ok(Box::new(GraphHandle {
            root,
            finished: None,
        }))
    }
}
