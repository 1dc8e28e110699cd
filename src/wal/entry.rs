//! WAL Entry definitions
//!
//! Defines the structure of individual WAL log entries.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{JobwalError, Result};
use crate::job::{Job, JobState};

/// A single entry in the WAL: one lifecycle event of one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Job this event belongs to
    pub job_id: String,

    /// What happened
    pub event: Event,

    /// Snapshot of the job at the time of the event
    #[serde(default)]
    pub data: Value,

    /// When the event was recorded
    pub timestamp: DateTime<Utc>,

    /// Job state label at the time of the event
    #[serde(default)]
    pub state: Option<JobState>,
}

/// Lifecycle events that can be logged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Event {
    Enqueued,
    Started,
    Completed,
    Failed,
    Retry,
}

impl Event {
    pub fn as_str(self) -> &'static str {
        match self {
            Event::Enqueued => "enqueued",
            Event::Started => "started",
            Event::Completed => "completed",
            Event::Failed => "failed",
            Event::Retry => "retry",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "enqueued" => Some(Event::Enqueued),
            "started" => Some(Event::Started),
            "completed" => Some(Event::Completed),
            "failed" => Some(Event::Failed),
            "retry" => Some(Event::Retry),
            _ => None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Entry {
    /// Create an entry stamped with the current time
    pub fn new(job_id: impl Into<String>, event: Event, data: Value, state: Option<JobState>) -> Self {
        Self {
            job_id: job_id.into(),
            event,
            data,
            timestamp: Utc::now(),
            state,
        }
    }

    /// Snapshot a job for the given event
    pub fn for_job(job: &Job, event: Event) -> Result<Self> {
        Ok(Self::new(
            job.id(),
            event,
            Value::Object(job.to_record()?),
            Some(job.state()),
        ))
    }

    /// Entries without a job id cannot be folded by job and are rejected
    pub fn validate(&self) -> Result<()> {
        if self.job_id.is_empty() {
            return Err(JobwalError::InvalidJob(
                "WAL entry has an empty job_id".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether this entry records a job that has finished for good
    ///
    /// Falls back to the event when no state label was recorded.
    pub fn is_terminal(&self) -> bool {
        match self.state {
            Some(state) => state.is_terminal(),
            None => matches!(self.event, Event::Completed | Event::Failed),
        }
    }

    /// Fingerprint stored in the job snapshot, if any
    pub fn fingerprint(&self) -> Option<&str> {
        self.data.get("fingerprint").and_then(Value::as_str)
    }
}
