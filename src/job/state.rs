//! Job state machine and per-job lock policy

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a job
///
/// ```text
/// queued ──► running ──► complete
///   ▲           │
///   └─ retry ───┤
///               └──────► failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Complete,
    Failed,
}

impl JobState {
    /// `complete` and `failed` are final
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Complete | JobState::Failed)
    }

    /// Whether the state machine allows moving from `self` to `to`
    pub fn can_transition_to(self, to: JobState) -> bool {
        matches!(
            (self, to),
            (JobState::Queued, JobState::Running)
                | (JobState::Running, JobState::Complete)
                | (JobState::Running, JobState::Failed)
                | (JobState::Running, JobState::Queued)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Complete => "complete",
            JobState::Failed => "failed",
        }
    }

    /// Parse the lowercase label used in the WAL
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "queued" => Some(JobState::Queued),
            "running" => Some(JobState::Running),
            "complete" => Some(JobState::Complete),
            "failed" => Some(JobState::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exclusivity carried by the job itself
///
/// Only consulted when the registered definition declares no lock. Custom
/// resolver functions live on the definition, since they cannot be persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "field")]
pub enum LockPolicy {
    #[default]
    None,

    /// Serialize every job with the same job name
    WholeJob,

    /// Serialize on the value of this argument
    Field(String),
}
