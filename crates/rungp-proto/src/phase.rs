//! Phases of a workspace boot and their outcomes.
//!
//! A phase is a named, time-bounded stage of startup ("starting", "running",
//! "installing extensions", ...). Its outcome is set exactly once; after that
//! the phase is a closed, immutable record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Terminal state of a phase.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum PhaseOutcome {
    /// The phase is still open.
    #[default]
    Pending,
    /// The phase completed normally.
    Success,
    /// The phase failed with the given reason.
    Failure(String),
}

impl PhaseOutcome {
    /// Returns true while the phase has not been closed.
    pub fn is_pending(&self) -> bool {
        matches!(self, PhaseOutcome::Pending)
    }

    /// Returns the failure reason, if any.
    pub fn failure(&self) -> Option<&str> {
        match self {
            PhaseOutcome::Failure(reason) => Some(reason),
            _ => None,
        }
    }
}

/// A single entry in the phase ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    /// Short label, e.g. `running`.
    pub label: String,
    /// Free-text description, e.g. `workspace at http://localhost:8080/`.
    pub description: String,
    /// Wall-clock time the phase was opened.
    pub started_at: DateTime<Utc>,
    /// How long the phase was open. `None` while pending.
    pub duration: Option<Duration>,
    pub outcome: PhaseOutcome,
}

impl Phase {
    /// Opens a new pending phase starting now.
    pub fn open(label: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            description: description.into(),
            started_at: Utc::now(),
            duration: None,
            outcome: PhaseOutcome::Pending,
        }
    }

    /// Returns true while the outcome has not been set.
    pub fn is_open(&self) -> bool {
        self.outcome.is_pending()
    }

    /// Human-readable title: the label followed by the description.
    pub fn title(&self) -> String {
        if self.description.is_empty() {
            self.label.clone()
        } else {
            format!("{} {}", self.label, self.description)
        }
    }
}

/// Final verdict of a workspace session or a supervised scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    /// Returns the failure reason, if any.
    pub fn failure(&self) -> Option<&str> {
        match self {
            Outcome::Failure(reason) => Some(reason),
            Outcome::Success => None,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Failure(reason) => write!(f, "failure: {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_phase_is_pending() {
        let phase = Phase::open("starting", "workspace image");
        assert!(phase.is_open());
        assert!(phase.duration.is_none());
        assert_eq!(phase.title(), "starting workspace image");
    }

    #[test]
    fn test_title_without_description() {
        let phase = Phase::open("ready", "");
        assert_eq!(phase.title(), "ready");
    }

    #[test]
    fn test_outcome_serializes_with_reason() {
        let json = serde_json::to_string(&PhaseOutcome::Failure("IDE was stopped".into())).unwrap();
        assert_eq!(json, r#"{"status":"failure","reason":"IDE was stopped"}"#);

        let json = serde_json::to_string(&PhaseOutcome::Success).unwrap();
        assert_eq!(json, r#"{"status":"success"}"#);
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(Outcome::Success.to_string(), "success");
        assert_eq!(
            Outcome::Failure("task build failed".into()).to_string(),
            "failure: task build failed"
        );
    }
}
