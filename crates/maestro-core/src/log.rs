// ABOUTME: Defines RunLog, the append-only trace entry recorded throughout a run.
// ABOUTME: Entries carry a level, a phase tag, and an optional typed artifact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Success,
    Debug,
}

/// Which part of the orchestration produced a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogPhase {
    Planning,
    Delegation,
    Input,
    Process,
    Output,
    Evaluation,
}

impl LogPhase {
    pub fn label(&self) -> &'static str {
        match self {
            LogPhase::Planning => "PLANNING",
            LogPhase::Delegation => "DELEGATION",
            LogPhase::Input => "INPUT",
            LogPhase::Process => "PROCESS",
            LogPhase::Output => "OUTPUT",
            LogPhase::Evaluation => "EVALUATION",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Text,
    Code,
    Json,
    Image,
    Markdown,
}

/// A typed blob attached to a log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(rename = "type")]
    pub kind: ArtifactKind,
    pub label: String,
    pub content: String,
}

impl Artifact {
    pub fn json(label: &str, value: &impl Serialize) -> Self {
        Self {
            kind: ArtifactKind::Json,
            label: label.to_string(),
            content: serde_json::to_string_pretty(value).unwrap_or_default(),
        }
    }

    pub fn markdown(label: &str, content: &str) -> Self {
        Self {
            kind: ArtifactKind::Markdown,
            label: label.to_string(),
            content: content.to_string(),
        }
    }

    pub fn image(label: &str, url: &str) -> Self {
        Self {
            kind: ArtifactKind::Image,
            label: label.to_string(),
            content: url.to_string(),
        }
    }
}

/// One append-only trace entry. Never mutated once appended to a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunLog {
    pub id: String,
    pub step_id: Option<String>,
    pub agent_name: String,
    pub agent_avatar: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub phase: LogPhase,
    pub artifact: Option<Artifact>,
}

impl RunLog {
    /// Create an entry stamped with a fresh id and the current time.
    pub fn new(agent_name: &str, level: LogLevel, phase: LogPhase, message: String) -> Self {
        Self {
            id: Ulid::new().to_string(),
            step_id: None,
            agent_name: agent_name.to_string(),
            agent_avatar: None,
            timestamp: Utc::now(),
            level,
            message,
            phase,
            artifact: None,
        }
    }

    pub fn for_step(mut self, step_id: &str) -> Self {
        self.step_id = Some(step_id.to_string());
        self
    }

    pub fn with_avatar(mut self, avatar: Option<&str>) -> Self {
        self.agent_avatar = avatar.map(String::from);
        self
    }

    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifact = Some(artifact);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_serializes_with_iso_timestamp_and_phase_tag() {
        let log = RunLog::new(
            "Writer",
            LogLevel::Success,
            LogPhase::Output,
            "done".to_string(),
        )
        .for_step("step1")
        .with_artifact(Artifact::json("Output", &serde_json::json!({"a": 1})));

        let json = serde_json::to_value(&log).unwrap();
        assert_eq!(json["phase"], "OUTPUT");
        assert_eq!(json["level"], "success");
        assert_eq!(json["stepId"], "step1");
        assert_eq!(json["artifact"]["type"], "json");
        let ts = json["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok(), "not ISO: {}", ts);
    }

    #[test]
    fn entries_get_distinct_ids() {
        let a = RunLog::new("x", LogLevel::Info, LogPhase::Planning, String::new());
        let b = RunLog::new("x", LogLevel::Info, LogPhase::Planning, String::new());
        assert_ne!(a.id, b.id);
    }
}
