//! Delegator runner: drives one handshake round to its end

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};

use super::{AgentEvent, EVENT_CAPACITY};
use crate::config::DelegatorConfig;
use crate::delegator::Delegator;
use crate::error::{FleetError, Result};
use crate::protocol::{Disposition, Mission, MissionStatus, POLL_TOPIC};
use crate::transport::{flush, Transport};

/// How a delegated mission ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DelegationReport {
    pub mission_id: String,
    pub worker_id: String,
    pub status: MissionStatus,
    pub bound_at: Option<DateTime<Utc>>,
    /// Status envelopes accepted from the claimant, terminal one included
    pub reports: usize,
}

pub struct DelegatorAgent {
    config: DelegatorConfig,
    transport: Arc<dyn Transport>,
    event_tx: broadcast::Sender<AgentEvent>,
}

impl DelegatorAgent {
    pub fn new(config: DelegatorConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            config,
            transport,
            event_tx,
        })
    }

    pub fn id(&self) -> &str {
        &self.config.delegator_id
    }

    /// Subscribe to delegation events
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.event_tx.subscribe()
    }

    /// Run one round: poll, bind the first claimant, follow it to a terminal status
    ///
    /// Fails with `NoRespondent` when nobody claims within the claim timeout. Once
    /// bound there is no further timeout; wrap the call if the caller needs one.
    pub async fn delegate(&self, mission: Mission) -> Result<DelegationReport> {
        let mission_id = mission.mission_id.clone();
        let mut delegator = Delegator::new(&self.config.delegator_id);

        if let Err(e) = delegator.start_mission(
            mission.mission_id,
            mission.graph_definition,
            mission.required_plugins,
        ) {
            if e.abandons_round() {
                self.emit(AgentEvent::RoundAbandoned {
                    mission_id,
                    reason: e.to_string(),
                });
            }
            return Err(e);
        }

        // Listen before polling so no claim slips past
        let mut polls = self.transport.subscribe(POLL_TOPIC).await?;
        flush(self.transport.as_ref(), delegator.drain_outbox()).await;
        self.emit(AgentEvent::RoundStarted {
            delegator_id: self.config.delegator_id.clone(),
            mission_id: mission_id.clone(),
        });

        let started = Instant::now();
        let deadline = tokio::time::sleep(self.config.claim_timeout());
        tokio::pin!(deadline);
        let mut ticker = tokio::time::interval_at(
            started + self.config.tick_period(),
            self.config.tick_period(),
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let binding = loop {
            tokio::select! {
                delivered = polls.recv() => {
                    let Some(envelope) = delivered else {
                        return Err(FleetError::Transport("poll channel closed".into()));
                    };
                    if delegator.on_claim(&envelope) == Disposition::Accepted {
                        if let Some(binding) = delegator.binding() {
                            break binding.clone();
                        }
                    }
                }
                _ = ticker.tick(), if self.config.repeat_poll => {
                    delegator.repoll();
                    flush(self.transport.as_ref(), delegator.drain_outbox()).await;
                }
                _ = &mut deadline => {
                    let err = delegator.abandon(started.elapsed()).unwrap_or_else(|| {
                        FleetError::Internal(format!("round for {} ended unexpectedly", mission_id))
                    });
                    self.emit(AgentEvent::RoundAbandoned {
                        mission_id: mission_id.clone(),
                        reason: err.to_string(),
                    });
                    drop(polls);
                    self.transport.unsubscribe(POLL_TOPIC).await?;
                    return Err(err);
                }
            }
        };

        drop(polls);
        self.transport.unsubscribe(POLL_TOPIC).await?;

        let worker_id = binding.claimed_by.clone();
        let Some(channels) = binding.channels.clone() else {
            return Err(FleetError::Internal(format!(
                "binding for {} has no channels",
                mission_id
            )));
        };

        // Listen on the claimant's status channel before it sees the command
        let mut statuses = self.transport.subscribe(&channels.status).await?;
        flush(self.transport.as_ref(), delegator.drain_outbox()).await;
        self.emit(AgentEvent::WorkerBound {
            delegator_id: self.config.delegator_id.clone(),
            mission_id: mission_id.clone(),
            worker_id: worker_id.clone(),
        });

        let mut reports = 0;
        let outcome = loop {
            let Some(envelope) = statuses.recv().await else {
                return Err(FleetError::Transport(format!(
                    "status channel {} closed",
                    channels.status
                )));
            };
            if delegator.on_status(&envelope) != Disposition::Accepted {
                continue;
            }
            reports += 1;
            if let Some(status) = envelope.status {
                self.emit(AgentEvent::StatusObserved {
                    mission_id: mission_id.clone(),
                    worker_id: worker_id.clone(),
                    status,
                });
            }
            if let Some(outcome) = delegator.outcome() {
                break outcome.clone();
            }
        };

        drop(statuses);
        self.transport.unsubscribe(&channels.status).await?;

        self.emit(AgentEvent::RoundCompleted {
            mission_id: outcome.mission_id.clone(),
            worker_id: outcome.worker_id.clone(),
            status: outcome.status,
        });

        Ok(DelegationReport {
            mission_id: outcome.mission_id,
            worker_id: outcome.worker_id,
            status: outcome.status,
            bound_at: binding.bound_at,
            reports,
        })
    }

    fn emit(&self, event: AgentEvent) {
        let _ = self.event_tx.send(event);
    }
}
