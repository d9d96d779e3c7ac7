//! Fleet - mission delegation between a delegator and a pool of workers
//!
//! A delegator polls the fleet for a mission, binds the first worker that
//! claims it, sends the mission body on that worker's command channel, and
//! follows its status channel until a terminal status arrives.

pub mod agent;
pub mod config;
pub mod delegator;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod transport;
pub mod worker;

pub use agent::{AgentEvent, DelegationReport, DelegatorAgent, WorkerAgent, WorkerHandle};
pub use config::{DelegatorConfig, EligibilityPolicy, WorkerConfig};
pub use delegator::{Delegator, DelegatorState};
pub use engine::{GraphEngine, TaskGraphEngine};
pub use error::{FleetError, Result};
pub use protocol::{Envelope, EnvelopeKind, Mission, MissionStatus};
pub use transport::{MemoryBus, RelayTransport, Transport};
pub use worker::{Worker, WorkerState};
