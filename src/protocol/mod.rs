//! Mission delegation protocol: message schemas and channel naming
//!
//! Delegators and workers talk only through envelopes published on topics. The
//! shared poll topic carries discovery traffic; each worker owns a private
//! command/status pair derived from its id.

pub mod channel;
pub mod envelope;
pub mod mission;

pub use channel::{command_topic, status_topic, ChannelPair, POLL_TOPIC};
pub use envelope::{Envelope, EnvelopeKind};
pub use mission::{Mission, MissionStatus};

/// A message ready to be published
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub topic: String,
    pub envelope: Envelope,
}

impl Outbound {
    pub fn new(topic: impl Into<String>, envelope: Envelope) -> Self {
        Self {
            topic: topic.into(),
            envelope,
        }
    }
}

/// What a state machine did with an incoming envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The envelope changed state or produced output
    Accepted,
    /// Well-formed but not relevant to this agent (wrong kind, wrong target, not eligible)
    Ignored,
    /// Refers to a mission or round the receiver no longer considers current
    Stale,
}
