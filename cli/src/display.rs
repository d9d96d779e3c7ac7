//! Human-readable lines for agent events

use fleet::{AgentEvent, DelegationReport};

pub fn event_line(event: &AgentEvent) -> String {
    match event {
        AgentEvent::RoundStarted {
            delegator_id,
            mission_id,
        } => format!("[{}] polling fleet for {}", delegator_id, mission_id),
        AgentEvent::WorkerBound {
            mission_id,
            worker_id,
            ..
        } => format!("[{}] bound to {}", mission_id, worker_id),
        AgentEvent::StatusObserved {
            mission_id,
            worker_id,
            status,
        } => format!("[{}] {} reports {}", mission_id, worker_id, status),
        AgentEvent::RoundCompleted {
            mission_id,
            worker_id,
            status,
        } => format!("[{}] finished on {}: {}", mission_id, worker_id, status),
        AgentEvent::RoundAbandoned { mission_id, reason } => {
            format!("[{}] abandoned: {}", mission_id, reason)
        }
        AgentEvent::ClaimPublished { mission_id, .. } => format!("[{}] claimed", mission_id),
        AgentEvent::MissionAccepted { mission_id, .. } => format!("[{}] executing", mission_id),
        AgentEvent::MissionRejected {
            mission_id, error, ..
        } => format!("[{}] rejected: {}", mission_id, error),
        AgentEvent::MissionDropped {
            mission_id, reason, ..
        } => format!("[{}] dropped: {}", mission_id, reason),
        AgentEvent::StatusPublished {
            mission_id, status, ..
        } => format!("[{}] {}", mission_id, status),
    }
}

pub fn report_line(report: &DelegationReport) -> String {
    let bound_at = report
        .bound_at
        .map(|t| t.format("%H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{} {} on {} (bound {}, {} reports)",
        report.mission_id, report.status, report.worker_id, bound_at, report.reports
    )
}
