//! Delegator side of the handshake
//!
//! The delegator polls the fleet, binds to the first claimant, sends it the
//! mission body and follows its status reports until a terminal result. It never
//! touches the bus itself: every publication lands in an outbox that the owning
//! runner drains after each call.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{FleetError, Result};
use crate::protocol::{
    ChannelPair, Disposition, Envelope, EnvelopeKind, Mission, MissionStatus, Outbound,
    POLL_TOPIC,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegatorState {
    /// No round started yet
    Idle,
    AwaitingClaim,
    Bound,
    Complete,
    /// Claim timeout expired; the round is over without a worker
    Abandoned,
}

impl DelegatorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DelegatorState::Idle => "idle",
            DelegatorState::AwaitingClaim => "awaiting_claim",
            DelegatorState::Bound => "bound",
            DelegatorState::Complete => "complete",
            DelegatorState::Abandoned => "abandoned",
        }
    }

    /// Whether a new round may start from this state
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            DelegatorState::Idle | DelegatorState::Complete | DelegatorState::Abandoned
        )
    }
}

/// Delegator-side record of who holds the current round
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerBinding {
    /// Empty until a Claim is accepted
    pub claimed_by: String,
    pub bound_at: Option<DateTime<Utc>>,
    pub last_status: Option<MissionStatus>,
    /// Private channels of the claimant, once known
    pub channels: Option<ChannelPair>,
}

impl WorkerBinding {
    fn unclaimed() -> Self {
        Self {
            claimed_by: String::new(),
            bound_at: None,
            last_status: None,
            channels: None,
        }
    }

    pub fn is_claimed(&self) -> bool {
        !self.claimed_by.is_empty()
    }
}

/// How a finished round ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoundOutcome {
    pub mission_id: String,
    pub worker_id: String,
    pub status: MissionStatus,
}

/// Delegator side of the handshake, one round at a time
pub struct Delegator {
    id: String,
    state: DelegatorState,
    mission: Option<Mission>,
    binding: Option<WorkerBinding>,
    outcome: Option<RoundOutcome>,
    outbox: Vec<Outbound>,
}

impl Delegator {
    /// Create an idle delegator
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: DelegatorState::Idle,
            mission: None,
            binding: None,
            outcome: None,
            outbox: Vec::new(),
        }
    }

    /// Delegator id, stamped on every Poll and Command
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current round state
    pub fn state(&self) -> DelegatorState {
        self.state
    }

    /// Mission of the current or last round, bound once a claim is accepted
    pub fn mission(&self) -> Option<&Mission> {
        self.mission.as_ref()
    }

    /// Claimant binding; cleared when the round settles
    pub fn binding(&self) -> Option<&WorkerBinding> {
        self.binding.as_ref()
    }

    /// Terminal result of a completed round
    pub fn outcome(&self) -> Option<&RoundOutcome> {
        self.outcome.as_ref()
    }

    /// Take everything published since the last drain
    pub fn drain_outbox(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    /// Open a handshake round by polling the fleet
    pub fn start_mission(
        &mut self,
        mission_id: impl Into<String>,
        graph_definition: impl Into<String>,
        required_plugins: Vec<String>,
    ) -> Result<()> {
        let mission = Mission::new(mission_id, graph_definition, required_plugins);
        mission.validate().map_err(FleetError::InvalidMission)?;

        if !self.state.is_settled() {
            return Err(FleetError::Internal(format!(
                "delegator {} is already {} for mission {}",
                self.id,
                self.state.as_str(),
                self.mission
                    .as_ref()
                    .map(|m| m.mission_id.as_str())
                    .unwrap_or_default()
            )));
        }

        tracing::info!(delegator = %self.id, mission_id = %mission.mission_id, "polling fleet");

        self.outbox.push(Outbound::new(
            POLL_TOPIC,
            Envelope::poll(&self.id, &mission.mission_id),
        ));
        self.mission = Some(mission);
        self.binding = Some(WorkerBinding::unclaimed());
        self.outcome = None;
        self.state = DelegatorState::AwaitingClaim;
        Ok(())
    }

    /// Re-send the Poll of an unclaimed round; false if there is nothing to re-poll
    pub fn repoll(&mut self) -> bool {
        if self.state != DelegatorState::AwaitingClaim {
            return false;
        }
        if let Some(mission) = &self.mission {
            self.outbox.push(Outbound::new(
                POLL_TOPIC,
                Envelope::poll(&self.id, &mission.mission_id),
            ));
            return true;
        }
        false
    }

    /// First matching Claim wins; everything after it is dropped
    pub fn on_claim(&mut self, envelope: &Envelope) -> Disposition {
        if envelope.kind != EnvelopeKind::Claim || envelope.sender_id.is_empty() {
            return Disposition::Ignored;
        }

        let Some(mission) = self.mission.as_ref() else {
            return Disposition::Stale;
        };
        if envelope.mission_id != mission.mission_id || self.state != DelegatorState::AwaitingClaim
        {
            tracing::debug!(
                delegator = %self.id,
                from = %envelope.sender_id,
                mission_id = %envelope.mission_id,
                state = self.state.as_str(),
                "dropping stale claim"
            );
            return Disposition::Stale;
        }

        let worker_id = envelope.sender_id.clone();
        let channels = ChannelPair::for_worker(&worker_id);
        let bound = mission.bound_to(&worker_id);

        self.outbox.push(Outbound::new(
            channels.command.clone(),
            Envelope::command(&self.id, &bound),
        ));

        tracing::info!(
            delegator = %self.id,
            mission_id = %bound.mission_id,
            worker = %worker_id,
            command_topic = %channels.command,
            "mission bound to worker"
        );

        self.binding = Some(WorkerBinding {
            claimed_by: worker_id,
            bound_at: Some(Utc::now()),
            last_status: None,
            channels: Some(channels),
        });
        self.mission = Some(bound);
        self.state = DelegatorState::Bound;
        Disposition::Accepted
    }

    /// Track the claimant's reports; a terminal status releases the binding
    pub fn on_status(&mut self, envelope: &Envelope) -> Disposition {
        let Some(status) = envelope.status else {
            return Disposition::Ignored;
        };
        if envelope.kind != EnvelopeKind::Status {
            return Disposition::Ignored;
        }
        if self.state != DelegatorState::Bound {
            return Disposition::Stale;
        }

        let mission_id = self
            .mission
            .as_ref()
            .map(|m| m.mission_id.clone())
            .unwrap_or_default();
        let Some(binding) = self.binding.as_mut() else {
            return Disposition::Stale;
        };

        if envelope.sender_id != binding.claimed_by {
            tracing::debug!(
                delegator = %self.id,
                from = %envelope.sender_id,
                bound = %binding.claimed_by,
                "status from a worker that is not bound"
            );
            return Disposition::Ignored;
        }
        // Idle liveness reports carry the worker's tag, not the mission
        if envelope.mission_id != mission_id && status != MissionStatus::Idle {
            tracing::debug!(
                delegator = %self.id,
                mission_id = %envelope.mission_id,
                "dropping status for another mission"
            );
            return Disposition::Stale;
        }

        binding.last_status = Some(status);

        if status.is_terminal() {
            tracing::info!(
                delegator = %self.id,
                mission_id = %mission_id,
                worker = %binding.claimed_by,
                status = %status,
                "mission finished"
            );
            self.outcome = Some(RoundOutcome {
                mission_id,
                worker_id: binding.claimed_by.clone(),
                status,
            });
            self.binding = None;
            self.state = DelegatorState::Complete;
        }

        Disposition::Accepted
    }

    /// Give up on an unclaimed round
    ///
    /// Returns the error to hand to the caller, or `None` when the round already
    /// has a worker (or there is no round).
    pub fn abandon(&mut self, waited: Duration) -> Option<FleetError> {
        if self.state != DelegatorState::AwaitingClaim {
            return None;
        }
        let mission_id = self
            .mission
            .as_ref()
            .map(|m| m.mission_id.clone())
            .unwrap_or_default();

        tracing::warn!(
            delegator = %self.id,
            mission_id = %mission_id,
            waited_ms = waited.as_millis() as u64,
            "no worker claimed the mission, abandoning round"
        );

        self.binding = None;
        self.state = DelegatorState::Abandoned;
        Some(FleetError::NoRespondent {
            mission_id,
            waited_ms: waited.as_millis() as u64,
        })
    }
}
