//! Wire envelope shared by every message on the mission bus
//!
//! One flat shape for all kinds; fields beyond `kind`, `sender_id` and
//! `mission_id` are present only where the kind calls for them.

use serde::{Deserialize, Serialize};

use super::mission::{Mission, MissionStatus};

/// Kind of message carried by an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvelopeKind {
    /// Delegator asks who can run a mission
    Poll,
    /// Worker asserts it can and will run it
    Claim,
    /// Full mission, unicast to the bound worker
    Command,
    /// Periodic progress report from a worker
    Status,
}

impl EnvelopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeKind::Poll => "POLL",
            EnvelopeKind::Claim => "CLAIM",
            EnvelopeKind::Command => "COMMAND",
            EnvelopeKind::Status => "STATUS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    pub sender_id: String,
    pub mission_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_worker_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MissionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_definition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_plugins: Option<Vec<String>>,
}

impl Envelope {
    fn bare(kind: EnvelopeKind, sender_id: &str, mission_id: &str) -> Self {
        Self {
            kind,
            sender_id: sender_id.to_string(),
            mission_id: mission_id.to_string(),
            target_worker_id: None,
            status: None,
            graph_definition: None,
            required_plugins: None,
        }
    }

    /// Poll for any eligible worker
    pub fn poll(sender_id: &str, mission_id: &str) -> Self {
        Self::bare(EnvelopeKind::Poll, sender_id, mission_id)
    }

    pub fn claim(worker_id: &str, mission_id: &str) -> Self {
        Self::bare(EnvelopeKind::Claim, worker_id, mission_id)
    }

    /// Command carrying the whole mission
    pub fn command(sender_id: &str, mission: &Mission) -> Self {
        Self {
            target_worker_id: Some(mission.target_worker_id.clone()),
            graph_definition: Some(mission.graph_definition.clone()),
            required_plugins: Some(mission.required_plugins.clone()),
            ..Self::bare(EnvelopeKind::Command, sender_id, &mission.mission_id)
        }
    }

    pub fn status(worker_id: &str, mission_id: &str, status: MissionStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::bare(EnvelopeKind::Status, worker_id, mission_id)
        }
    }

    /// Target worker, treating an empty string the same as absent
    pub fn target(&self) -> Option<&str> {
        self.target_worker_id
            .as_deref()
            .filter(|target| !target.is_empty())
    }

    /// Whether this envelope may be acted on by the given worker
    pub fn is_for(&self, worker_id: &str) -> bool {
        self.target().map_or(true, |target| target == worker_id)
    }

    /// Rebuild the mission from a COMMAND envelope
    pub fn mission(&self) -> Option<Mission> {
        if self.kind != EnvelopeKind::Command {
            return None;
        }
        Some(Mission {
            mission_id: self.mission_id.clone(),
            target_worker_id: self.target_worker_id.clone().unwrap_or_default(),
            graph_definition: self.graph_definition.clone()?,
            required_plugins: self.required_plugins.clone().unwrap_or_default(),
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_and_claim_carry_no_payload() {
        let poll = Envelope::poll("delegator", "patrol-1");
        let json = poll.to_json().unwrap();
        assert!(json.contains("\"kind\":\"POLL\""));
        assert!(!json.contains("graph_definition"));
        assert!(!json.contains("target_worker_id"));
        assert!(!json.contains("status"));

        let claim = Envelope::claim("w1", "patrol-1");
        assert_eq!(claim.kind, EnvelopeKind::Claim);
        assert_eq!(claim.sender_id, "w1");
        assert!(claim.graph_definition.is_none());
    }

    #[test]
    fn test_command_carries_full_mission() {
        let mission = Mission::new("patrol-1", "{\"sequence\":[]}", vec!["wait".into()])
            .bound_to("w1");
        let command = Envelope::command("delegator", &mission);

        assert_eq!(command.target(), Some("w1"));
        assert_eq!(command.mission(), Some(mission));
    }

    #[test]
    fn test_mission_requires_command_with_graph() {
        let status = Envelope::status("w1", "m1", MissionStatus::Running);
        assert!(status.mission().is_none());

        let mut command = Envelope::command("d", &Mission::new("m1", "{}", vec![]));
        command.graph_definition = None;
        assert!(command.mission().is_none());
    }

    #[test]
    fn test_is_for_honors_target() {
        let mut env = Envelope::poll("d", "m1");
        assert!(env.is_for("anyone"));

        env.target_worker_id = Some(String::new());
        assert!(env.is_for("anyone"));

        env.target_worker_id = Some("w2".into());
        assert!(env.is_for("w2"));
        assert!(!env.is_for("w1"));
    }

    #[test]
    fn test_parse_minimal_wire_shape() {
        let env = Envelope::from_json(
            r#"{"kind":"STATUS","sender_id":"w1","mission_id":"m1","status":"SUCCESS"}"#,
        )
        .unwrap();
        assert_eq!(env.kind, EnvelopeKind::Status);
        assert_eq!(env.status, Some(MissionStatus::Success));
        assert!(env.required_plugins.is_none());
    }
}
