//! Worker runner: one task, one `select!` loop, one state machine

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{AgentEvent, EVENT_CAPACITY};
use crate::config::WorkerConfig;
use crate::engine::TaskGraphEngine;
use crate::error::{FleetError, Result};
use crate::protocol::{Disposition, POLL_TOPIC};
use crate::transport::{flush, Subscription, Transport};
use crate::worker::{Worker, WorkerState};

/// Point-in-time view of a running worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerSnapshot {
    pub worker_id: String,
    pub state: WorkerState,
    pub busy: bool,
    pub mission_id: Option<String>,
    pub identified: Option<String>,
}

impl WorkerSnapshot {
    fn of(worker: &Worker) -> Self {
        Self {
            worker_id: worker.id().to_string(),
            state: worker.state(),
            busy: worker.is_busy(),
            mission_id: worker
                .context()
                .current_mission()
                .map(|m| m.mission_id.clone()),
            identified: worker.identified_mission().map(String::from),
        }
    }
}

enum WorkerCommand {
    Snapshot(oneshot::Sender<WorkerSnapshot>),
    Shutdown,
}

/// Handle for talking to a spawned worker
pub struct WorkerHandle {
    worker_id: String,
    cmd_tx: mpsc::Sender<WorkerCommand>,
    event_tx: broadcast::Sender<AgentEvent>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Subscribe to worker events
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.event_tx.subscribe()
    }

    pub async fn snapshot(&self) -> Result<WorkerSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(WorkerCommand::Snapshot(tx))
            .await
            .map_err(|_| FleetError::Internal(format!("worker {} stopped", self.worker_id)))?;
        rx.await
            .map_err(|_| FleetError::Internal(format!("worker {} stopped", self.worker_id)))
    }

    /// Stop the run loop and wait for it to exit
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.cmd_tx.send(WorkerCommand::Shutdown).await;
        self.join
            .await
            .map_err(|e| FleetError::Internal(format!("worker task failed: {}", e)))
    }
}

pub struct WorkerAgent;

impl WorkerAgent {
    /// Subscribe to the poll and command channels and start the run loop
    ///
    /// Subscriptions are live when this returns.
    pub async fn spawn(
        config: WorkerConfig,
        engine: Arc<dyn TaskGraphEngine>,
        transport: Arc<dyn Transport>,
    ) -> Result<WorkerHandle> {
        config.validate()?;
        let worker = Worker::new(config, engine);
        let worker_id = worker.id().to_string();

        let polls = transport.subscribe(POLL_TOPIC).await?;
        let commands = transport.subscribe(&worker.channels().command).await?;

        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);

        tracing::info!(
            worker = %worker_id,
            capability = %worker.config().capability,
            command_topic = %worker.channels().command,
            "worker listening"
        );

        let join = tokio::spawn(run(
            worker,
            transport,
            polls,
            commands,
            cmd_rx,
            event_tx.clone(),
        ));

        Ok(WorkerHandle {
            worker_id,
            cmd_tx,
            event_tx,
            join,
        })
    }
}

async fn run(
    mut worker: Worker,
    transport: Arc<dyn Transport>,
    mut polls: Subscription,
    mut commands: Subscription,
    mut cmd_rx: mpsc::Receiver<WorkerCommand>,
    event_tx: broadcast::Sender<AgentEvent>,
) {
    let worker_id = worker.id().to_string();
    let mut ticker = tokio::time::interval(worker.config().tick_period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            delivered = polls.recv() => {
                let Some(envelope) = delivered else {
                    channel_lost(&worker, "poll", &event_tx);
                    break;
                };
                if worker.on_poll(&envelope) == Disposition::Accepted {
                    let _ = event_tx.send(AgentEvent::ClaimPublished {
                        worker_id: worker_id.clone(),
                        mission_id: envelope.mission_id.clone(),
                    });
                }
            }
            delivered = commands.recv() => {
                let Some(envelope) = delivered else {
                    channel_lost(&worker, "command", &event_tx);
                    break;
                };
                match worker.on_command(&envelope) {
                    Ok(Disposition::Accepted) => {
                        let _ = event_tx.send(AgentEvent::MissionAccepted {
                            worker_id: worker_id.clone(),
                            mission_id: envelope.mission_id.clone(),
                        });
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = event_tx.send(AgentEvent::MissionRejected {
                            worker_id: worker_id.clone(),
                            mission_id: envelope.mission_id.clone(),
                            error: e.to_string(),
                        });
                    }
                }
            }
            _ = ticker.tick() => {
                let mission_id = worker
                    .context()
                    .current_mission()
                    .map(|m| m.mission_id.clone());
                if let (Some(status), Some(mission_id)) = (worker.tick(), mission_id) {
                    let _ = event_tx.send(AgentEvent::StatusPublished {
                        worker_id: worker_id.clone(),
                        mission_id,
                        status,
                    });
                }
            }
            cmd = cmd_rx.recv() => match cmd {
                Some(WorkerCommand::Snapshot(reply)) => {
                    let _ = reply.send(WorkerSnapshot::of(&worker));
                }
                Some(WorkerCommand::Shutdown) | None => break,
            },
        }

        flush(transport.as_ref(), worker.drain_outbox()).await;
    }

    let command_topic = commands.topic().to_string();
    drop(polls);
    drop(commands);
    if let Err(e) = transport.unsubscribe(&command_topic).await {
        tracing::warn!(worker = %worker_id, "failed to release command channel: {}", e);
    }
    tracing::info!(worker = %worker_id, "worker stopped");
}

/// A closed subscription stops the worker; an in-flight mission never reaches a terminal status
fn channel_lost(worker: &Worker, channel: &str, event_tx: &broadcast::Sender<AgentEvent>) {
    let Some(mission) = worker.context().current_mission() else {
        tracing::warn!(worker = %worker.id(), "{} channel closed", channel);
        return;
    };
    tracing::error!(
        worker = %worker.id(),
        mission_id = %mission.mission_id,
        state = worker.state().as_str(),
        "{} channel closed, dropping in-flight mission",
        channel
    );
    let _ = event_tx.send(AgentEvent::MissionDropped {
        worker_id: worker.id().to_string(),
        mission_id: mission.mission_id.clone(),
        reason: format!("{} channel closed", channel),
    });
}
