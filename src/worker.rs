//! Worker side of the handshake
//!
//! A worker answers polls it is eligible for, accepts at most one mission at a
//! time, drives the engine one step per tick and reports every step on its
//! private status channel. Like the delegator it only fills an outbox; the runner
//! owning it decides when the bus sees the messages.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::config::WorkerConfig;
use crate::engine::{ExecutionHandle, TaskGraphEngine};
use crate::error::{FleetError, Result};
use crate::protocol::{
    ChannelPair, Disposition, Envelope, EnvelopeKind, Mission, MissionStatus, Outbound,
    POLL_TOPIC,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    /// Claimed a polled mission, waiting to learn whether it won
    Identified,
    Executing,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Idle => "idle",
            WorkerState::Identified => "identified",
            WorkerState::Executing => "executing",
        }
    }
}

struct Identification {
    mission_id: String,
    since: Instant,
}

/// Everything the worker holds for its single in-flight mission
#[derive(Default)]
pub struct ExecutionContext {
    /// Set from Command acceptance until the mission is released
    busy: bool,
    current_mission: Option<Mission>,
    /// Built graph, present only while executing
    engine_state: Option<Box<dyn ExecutionHandle>>,
}

impl ExecutionContext {
    /// Whether a mission holds this worker
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Mission accepted by the last Command, until released
    pub fn current_mission(&self) -> Option<&Mission> {
        self.current_mission.as_ref()
    }

    fn mission_id(&self) -> Option<&str> {
        self.current_mission.as_ref().map(|m| m.mission_id.as_str())
    }

    fn clear(&mut self) {
        self.busy = false;
        self.current_mission = None;
        self.engine_state = None;
    }
}

/// Worker side of the handshake for one worker id
pub struct Worker {
    config: WorkerConfig,
    /// Derived from the worker id at construction
    channels: ChannelPair,
    engine: Arc<dyn TaskGraphEngine>,
    state: WorkerState,
    identified: Option<Identification>,
    context: ExecutionContext,
    outbox: Vec<Outbound>,
}

impl Worker {
    /// Create an idle worker that builds missions with `engine`
    pub fn new(config: WorkerConfig, engine: Arc<dyn TaskGraphEngine>) -> Self {
        let channels = ChannelPair::for_worker(&config.worker_id);
        Self {
            config,
            channels,
            engine,
            state: WorkerState::Idle,
            identified: None,
            context: ExecutionContext::default(),
            outbox: Vec::new(),
        }
    }

    /// Worker id from the config
    pub fn id(&self) -> &str {
        &self.config.worker_id
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// This worker's private command and status topics
    pub fn channels(&self) -> &ChannelPair {
        &self.channels
    }

    /// Current handshake state
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Busy flag, current mission and engine handle
    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Shorthand for `context().is_busy()`
    pub fn is_busy(&self) -> bool {
        self.context.busy
    }

    /// Mission id claimed but not yet commanded
    pub fn identified_mission(&self) -> Option<&str> {
        self.identified.as_ref().map(|i| i.mission_id.as_str())
    }

    /// Take everything published since the last drain
    pub fn drain_outbox(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    /// Claim a polled mission if free and eligible
    pub fn on_poll(&mut self, envelope: &Envelope) -> Disposition {
        if envelope.kind != EnvelopeKind::Poll {
            return Disposition::Ignored;
        }
        if self.context.busy {
            tracing::debug!(
                worker = %self.config.worker_id,
                mission_id = %envelope.mission_id,
                "poll ignored: busy"
            );
            return Disposition::Ignored;
        }
        if !envelope.is_for(&self.config.worker_id) {
            tracing::debug!(worker = %self.config.worker_id, "poll ignored: not for me");
            return Disposition::Ignored;
        }
        if !self.config.accepts(&envelope.mission_id) {
            tracing::debug!(
                worker = %self.config.worker_id,
                mission_id = %envelope.mission_id,
                "poll ignored: not eligible"
            );
            return Disposition::Ignored;
        }

        self.outbox.push(Outbound::new(
            POLL_TOPIC,
            Envelope::claim(&self.config.worker_id, &envelope.mission_id),
        ));
        self.identified = Some(Identification {
            mission_id: envelope.mission_id.clone(),
            since: Instant::now(),
        });
        self.state = WorkerState::Identified;

        tracing::info!(
            worker = %self.config.worker_id,
            mission_id = %envelope.mission_id,
            "claim published"
        );
        Disposition::Accepted
    }

    /// Accept a mission addressed to this worker
    ///
    /// A build failure publishes FAILURE right away and returns
    /// [`FleetError::MissionBuild`]; the worker never enters EXECUTING for it.
    pub fn on_command(&mut self, envelope: &Envelope) -> Result<Disposition> {
        if envelope.kind != EnvelopeKind::Command {
            return Ok(Disposition::Ignored);
        }
        if envelope.target() != Some(self.config.worker_id.as_str()) {
            tracing::debug!(
                worker = %self.config.worker_id,
                target = ?envelope.target_worker_id,
                "command not addressed to this worker"
            );
            return Ok(Disposition::Ignored);
        }

        if self.context.busy {
            if self.context.mission_id() == Some(envelope.mission_id.as_str()) {
                tracing::debug!(
                    worker = %self.config.worker_id,
                    mission_id = %envelope.mission_id,
                    "duplicate command ignored"
                );
                return Ok(Disposition::Ignored);
            }
            tracing::info!(
                worker = %self.config.worker_id,
                mission_id = %envelope.mission_id,
                current = ?self.context.mission_id(),
                "command ignored: busy with another mission"
            );
            return Ok(Disposition::Stale);
        }

        let Some(mission) = envelope.mission() else {
            tracing::warn!(
                worker = %self.config.worker_id,
                mission_id = %envelope.mission_id,
                "command without graph definition"
            );
            return Ok(Disposition::Ignored);
        };

        let plugins = if mission.required_plugins.is_empty() {
            tracing::debug!(
                worker = %self.config.worker_id,
                "mission names no plugins, using configured list"
            );
            self.config.plugins.clone()
        } else {
            mission.required_plugins.clone()
        };

        let built = self.engine.build(&mission.graph_definition, &plugins);

        self.identified = None;
        self.context.busy = true;
        self.context.current_mission = Some(mission);

        match built {
            Ok(handle) => {
                self.context.engine_state = Some(handle);
                self.state = WorkerState::Executing;
                tracing::info!(
                    worker = %self.config.worker_id,
                    mission_id = %envelope.mission_id,
                    "mission accepted, executing"
                );
                Ok(Disposition::Accepted)
            }
            Err(err) => {
                tracing::error!(
                    worker = %self.config.worker_id,
                    mission_id = %envelope.mission_id,
                    error = %err,
                    "failed to build mission"
                );
                self.outbox.push(Outbound::new(
                    self.channels.status.clone(),
                    Envelope::status(
                        &self.config.worker_id,
                        &envelope.mission_id,
                        MissionStatus::Failure,
                    ),
                ));
                // Stays busy, not executing, until the next tick releases it
                self.state = WorkerState::Idle;
                Err(err.into())
            }
        }
    }

    /// One control cycle; returns the status published for an executing mission
    pub fn tick(&mut self) -> Option<MissionStatus> {
        if self.state == WorkerState::Executing {
            return self.step_mission();
        }

        if self.context.busy {
            tracing::debug!(
                worker = %self.config.worker_id,
                mission_id = ?self.context.mission_id(),
                "releasing mission that never started"
            );
            self.context.clear();
            return None;
        }

        if let Some(identified) = &self.identified {
            if identified.since.elapsed() >= self.config.claim_timeout() {
                tracing::debug!(
                    worker = %self.config.worker_id,
                    mission_id = %identified.mission_id,
                    "claim not answered, back to idle"
                );
                self.identified = None;
                self.state = WorkerState::Idle;
            }
        }

        if self.config.publish_idle {
            self.outbox.push(Outbound::new(
                self.channels.status.clone(),
                Envelope::status(
                    &self.config.worker_id,
                    &self.config.capability,
                    MissionStatus::Idle,
                ),
            ));
        }
        None
    }

    fn step_mission(&mut self) -> Option<MissionStatus> {
        let mission_id = self.context.mission_id()?.to_string();
        let Some(handle) = self.context.engine_state.as_mut() else {
            self.state = WorkerState::Idle;
            return None;
        };

        let status = MissionStatus::from(handle.step());
        self.outbox.push(Outbound::new(
            self.channels.status.clone(),
            Envelope::status(&self.config.worker_id, &mission_id, status),
        ));

        if status.is_terminal() {
            tracing::info!(
                worker = %self.config.worker_id,
                mission_id = %mission_id,
                status = %status,
                "mission finished"
            );
            self.context.clear();
            self.state = WorkerState::Idle;
        }
        Some(status)
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.config.worker_id)
            .field("state", &self.state)
            .field("busy", &self.context.busy)
            .field("mission", &self.context.mission_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{BuildError, GraphEngine, StepResult};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Engine replaying a fixed list of step results
    struct ScriptedEngine {
        script: Vec<StepResult>,
        fail_build: bool,
        steps: Arc<AtomicUsize>,
        builds: Arc<AtomicUsize>,
        last_plugins: Arc<Mutex<Vec<String>>>,
    }

    struct ScriptedHandle {
        script: VecDeque<StepResult>,
        steps: Arc<AtomicUsize>,
    }

    impl ExecutionHandle for ScriptedHandle {
        fn step(&mut self) -> StepResult {
            self.steps.fetch_add(1, Ordering::SeqCst);
            self.script.pop_front().unwrap_or(StepResult::Success)
        }
    }

    impl ScriptedEngine {
        fn new(script: Vec<StepResult>) -> Self {
            Self {
                script,
                fail_build: false,
                steps: Arc::new(AtomicUsize::new(0)),
                builds: Arc::new(AtomicUsize::new(0)),
                last_plugins: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn failing() -> Self {
            Self {
                fail_build: true,
                ..Self::new(vec![])
            }
        }
    }

    impl TaskGraphEngine for ScriptedEngine {
        fn build(
            &self,
            _graph_definition: &str,
            required_plugins: &[String],
        ) -> std::result::Result<Box<dyn ExecutionHandle>, BuildError> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            *self.last_plugins.lock().unwrap() = required_plugins.to_vec();
            if self.fail_build {
                return Err(BuildError::MalformedGraph("bad graph".into()));
            }
            Ok(Box::new(ScriptedHandle {
                script: self.script.clone().into(),
                steps: self.steps.clone(),
            }))
        }
    }

    fn command_for(worker_id: &str, mission_id: &str) -> Envelope {
        Envelope::command(
            "boss",
            &Mission::new(mission_id, "{}", vec!["wait".into()]).bound_to(worker_id),
        )
    }

    fn statuses(outbox: &[Outbound]) -> Vec<MissionStatus> {
        outbox.iter().filter_map(|o| o.envelope.status).collect()
    }

    #[test]
    fn test_poll_claim_when_eligible() {
        let mut w = Worker::new(
            WorkerConfig::new("w1", "patrol-1"),
            Arc::new(ScriptedEngine::new(vec![])),
        );

        assert_eq!(w.on_poll(&Envelope::poll("boss", "patrol-1")), Disposition::Accepted);
        assert_eq!(w.state(), WorkerState::Identified);
        assert_eq!(w.identified_mission(), Some("patrol-1"));

        let out = w.drain_outbox();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].topic, POLL_TOPIC);
        assert_eq!(out[0].envelope.kind, EnvelopeKind::Claim);
        assert_eq!(out[0].envelope.sender_id, "w1");
    }

    #[test]
    fn test_poll_ignored_when_not_eligible() {
        let mut w = Worker::new(
            WorkerConfig::new("w2", "inspect-1"),
            Arc::new(ScriptedEngine::new(vec![])),
        );
        assert_eq!(w.on_poll(&Envelope::poll("boss", "patrol-1")), Disposition::Ignored);
        assert_eq!(w.state(), WorkerState::Idle);
        assert!(w.drain_outbox().is_empty());
    }

    #[test]
    fn test_poll_targeted_at_another_worker_ignored() {
        let mut w = Worker::new(
            WorkerConfig::new("w1", "patrol-1"),
            Arc::new(ScriptedEngine::new(vec![])),
        );
        let mut poll = Envelope::poll("boss", "patrol-1");
        poll.target_worker_id = Some("w9".into());
        assert_eq!(w.on_poll(&poll), Disposition::Ignored);
        assert!(w.drain_outbox().is_empty());
    }

    #[test]
    fn test_busy_worker_never_claims() {
        let mut w = Worker::new(
            WorkerConfig::new("w1", "m1"),
            Arc::new(ScriptedEngine::new(vec![StepResult::Running; 10])),
        );
        w.on_command(&command_for("w1", "m1")).unwrap();
        assert_eq!(w.state(), WorkerState::Executing);

        assert_eq!(w.on_poll(&Envelope::poll("boss", "m1")), Disposition::Ignored);
        assert!(w.drain_outbox().is_empty());
    }

    #[test]
    fn test_command_for_other_worker_dropped() {
        let engine = ScriptedEngine::new(vec![]);
        let builds = engine.builds.clone();
        let mut w = Worker::new(WorkerConfig::new("w1", "m1"), Arc::new(engine));

        let disposition = w.on_command(&command_for("w2", "m1")).unwrap();
        assert_eq!(disposition, Disposition::Ignored);
        assert!(!w.is_busy());
        assert_eq!(builds.load(Ordering::SeqCst), 0);

        let unbound = Envelope::command("boss", &Mission::new("m1", "{}", vec![]));
        assert_eq!(w.on_command(&unbound).unwrap(), Disposition::Ignored);
    }

    #[test]
    fn test_command_starts_execution() {
        let mut w = Worker::new(
            WorkerConfig::new("w1", "m1"),
            Arc::new(ScriptedEngine::new(vec![StepResult::Running])),
        );
        w.on_poll(&Envelope::poll("boss", "m1"));
        w.drain_outbox();

        assert_eq!(w.on_command(&command_for("w1", "m1")).unwrap(), Disposition::Accepted);
        assert_eq!(w.state(), WorkerState::Executing);
        assert!(w.is_busy());
        assert!(w.identified_mission().is_none());
        assert_eq!(w.context().current_mission().unwrap().mission_id, "m1");
        assert!(w.drain_outbox().is_empty());
    }

    #[test]
    fn test_duplicate_command_is_idempotent() {
        let engine = ScriptedEngine::new(vec![StepResult::Running; 5]);
        let builds = engine.builds.clone();
        let mut w = Worker::new(WorkerConfig::new("w1", "m1"), Arc::new(engine));

        let command = command_for("w1", "m1");
        w.on_command(&command).unwrap();
        assert_eq!(w.on_command(&command).unwrap(), Disposition::Ignored);

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(w.state(), WorkerState::Executing);
        assert!(w.drain_outbox().is_empty());
    }

    #[test]
    fn test_command_for_different_mission_while_busy() {
        let mut w = Worker::new(
            WorkerConfig::new("w1", "m1"),
            Arc::new(ScriptedEngine::new(vec![StepResult::Running; 5])),
        );
        w.on_command(&command_for("w1", "m1")).unwrap();

        assert_eq!(w.on_command(&command_for("w1", "m2")).unwrap(), Disposition::Stale);
        assert_eq!(w.context().current_mission().unwrap().mission_id, "m1");
    }

    #[test]
    fn test_build_failure_reports_once() {
        let engine = ScriptedEngine::failing();
        let steps = engine.steps.clone();
        let mut w = Worker::new(WorkerConfig::new("w1", "m1"), Arc::new(engine));

        let err = w.on_command(&command_for("w1", "m1")).unwrap_err();
        assert!(matches!(err, FleetError::MissionBuild(_)));
        assert_ne!(w.state(), WorkerState::Executing);

        let out = w.drain_outbox();
        assert_eq!(statuses(&out), vec![MissionStatus::Failure]);
        assert_eq!(out[0].topic, "w1.status");

        // A duplicate of the failed command neither rebuilds nor re-reports
        assert_eq!(w.on_command(&command_for("w1", "m1")).unwrap(), Disposition::Ignored);

        assert_eq!(w.tick(), None);
        assert!(!w.is_busy());
        assert_eq!(w.state(), WorkerState::Idle);
        assert!(w.drain_outbox().is_empty());
        assert_eq!(steps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_ticks_report_until_terminal() {
        let engine = ScriptedEngine::new(vec![
            StepResult::Running,
            StepResult::Running,
            StepResult::Failure,
        ]);
        let steps = engine.steps.clone();
        let mut w = Worker::new(WorkerConfig::new("w1", "m1"), Arc::new(engine));
        w.on_command(&command_for("w1", "m1")).unwrap();

        assert_eq!(w.tick(), Some(MissionStatus::Running));
        assert_eq!(w.tick(), Some(MissionStatus::Running));
        assert_eq!(w.tick(), Some(MissionStatus::Failure));
        assert_eq!(w.tick(), None);

        assert_eq!(
            statuses(&w.drain_outbox()),
            vec![
                MissionStatus::Running,
                MissionStatus::Running,
                MissionStatus::Failure
            ]
        );
        assert!(!w.is_busy());
        assert_eq!(steps.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_running_three_times_then_success() {
        let mut script = vec![StepResult::Running; 3];
        script.push(StepResult::Success);
        let engine = ScriptedEngine::new(script);
        let steps = engine.steps.clone();
        let mut w = Worker::new(WorkerConfig::new("w1", "m1"), Arc::new(engine));
        w.on_command(&command_for("w1", "m1")).unwrap();

        let reported: Vec<_> = (0..6).filter_map(|_| w.tick()).collect();
        assert_eq!(
            reported,
            vec![
                MissionStatus::Running,
                MissionStatus::Running,
                MissionStatus::Running,
                MissionStatus::Success
            ]
        );

        let out = w.drain_outbox();
        assert_eq!(out.len(), 4);
        assert!(out.iter().all(|o| o.topic == "w1.status"));
        assert_eq!(
            statuses(&out),
            vec![
                MissionStatus::Running,
                MissionStatus::Running,
                MissionStatus::Running,
                MissionStatus::Success
            ]
        );

        // Ticks past the terminal result never step the engine again
        assert_eq!(steps.load(Ordering::SeqCst), 4);
        assert_eq!(w.state(), WorkerState::Idle);
        assert!(!w.is_busy());
    }

    #[test]
    fn test_new_mission_after_terminal() {
        let mut w = Worker::new(
            WorkerConfig::new("w1", "m1"),
            Arc::new(ScriptedEngine::new(vec![StepResult::Success])),
        );
        w.on_command(&command_for("w1", "m1")).unwrap();
        w.tick();

        assert_eq!(w.on_command(&command_for("w1", "m2")).unwrap(), Disposition::Accepted);
        assert_eq!(w.context().current_mission().unwrap().mission_id, "m2");
    }

    #[test]
    fn test_claim_times_out_back_to_idle() {
        let mut config = WorkerConfig::new("w1", "m1");
        config.claim_timeout_ms = 0;
        let mut w = Worker::new(config, Arc::new(ScriptedEngine::new(vec![])));

        w.on_poll(&Envelope::poll("boss", "m1"));
        assert_eq!(w.state(), WorkerState::Identified);
        w.tick();
        assert_eq!(w.state(), WorkerState::Idle);
        assert!(w.identified_mission().is_none());
    }

    #[test]
    fn test_idle_liveness_only_when_configured() {
        let mut w = Worker::new(
            WorkerConfig::new("w1", "m1"),
            Arc::new(ScriptedEngine::new(vec![])),
        );
        w.tick();
        assert!(w.drain_outbox().is_empty());

        let mut config = WorkerConfig::new("w1", "m1");
        config.publish_idle = true;
        let mut w = Worker::new(config, Arc::new(ScriptedEngine::new(vec![])));
        w.tick();
        let out = w.drain_outbox();
        assert_eq!(statuses(&out), vec![MissionStatus::Idle]);
        assert_eq!(out[0].topic, "w1.status");
    }

    #[test]
    fn test_falls_back_to_configured_plugins() {
        let engine = ScriptedEngine::new(vec![]);
        let last_plugins = engine.last_plugins.clone();
        let mut config = WorkerConfig::new("w1", "m1");
        config.plugins = vec!["log".into(), "wait".into()];
        let mut w = Worker::new(config, Arc::new(engine));

        let command = Envelope::command("boss", &Mission::new("m1", "{}", vec![]).bound_to("w1"));
        w.on_command(&command).unwrap();
        assert_eq!(*last_plugins.lock().unwrap(), vec!["log", "wait"]);
    }

    #[test]
    fn test_mission_plugins_override_configured() {
        let engine = ScriptedEngine::new(vec![]);
        let last_plugins = engine.last_plugins.clone();
        let mut config = WorkerConfig::new("w1", "m1");
        config.plugins = vec!["log".into()];
        let mut w = Worker::new(config, Arc::new(engine));

        w.on_command(&command_for("w1", "m1")).unwrap();
        assert_eq!(*last_plugins.lock().unwrap(), vec!["wait"]);
    }

    #[test]
    fn test_with_graph_engine() {
        let mut w = Worker::new(
            WorkerConfig::new("w1", "m1"),
            Arc::new(GraphEngine::default()),
        );
        let mission = Mission::new(
            "m1",
            r#"{"action": {"capability": "wait", "params": {"ticks": 1}}}"#,
            vec!["wait".into()],
        )
        .bound_to("w1");
        w.on_command(&Envelope::command("boss", &mission)).unwrap();

        assert_eq!(w.tick(), Some(MissionStatus::Running));
        assert_eq!(w.tick(), Some(MissionStatus::Success));
        assert_eq!(w.state(), WorkerState::Idle);
    }
}
