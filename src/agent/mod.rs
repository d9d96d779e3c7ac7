//! Async runners for delegators and workers
//!
//! Each runner owns one state machine and feeds it from a single task, so
//! deliveries and ticks for one agent never interleave. The state machines stay
//! synchronous; runners only move envelopes between them and the transport.

pub mod delegator_agent;
pub mod events;
pub mod worker_agent;

pub use delegator_agent::{DelegationReport, DelegatorAgent};
pub use events::AgentEvent;
pub use worker_agent::{WorkerAgent, WorkerHandle, WorkerSnapshot};

/// Observer channel capacity
pub(crate) const EVENT_CAPACITY: usize = 256;
