//! WebSocket relay carrying the mission bus between processes
//!
//! Agents connect over `/ws`, subscribe to topics and publish envelopes. The
//! relay only fans messages out; it knows nothing about missions.

pub mod frame;
pub mod server;

pub use frame::{ClientFrame, ServerFrame};
pub use server::{router, RelayState};
