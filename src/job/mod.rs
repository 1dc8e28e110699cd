//! Job Module
//!
//! A job is one unit of work: arguments, retry budget, exclusivity and
//! lifecycle state.
//!
//! ## Arguments
//! `args` is a free-form JSON mapping with two reserved keys:
//! - `job_name`: the registered definition to run
//! - `args`: the positional argument list handed to the handler
//!
//! Any other key is metadata, visible to lock resolvers but not part of the
//! fingerprint (unless `args` is absent, in which case the whole mapping is).

mod builder;
pub mod fingerprint;
mod state;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{JobwalError, Result};

pub use builder::JobBuilder;
pub use state::{JobState, LockPolicy};

/// Job argument mapping
pub type Args = Map<String, Value>;

/// Reserved key holding the job name
pub const JOB_NAME_KEY: &str = "job_name";

/// Reserved key holding the positional arguments
pub const ARGS_KEY: &str = "args";

/// Retry budget used when none is given
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// A unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    id: String,
    args: Args,
    state: JobState,
    retries: u32,
    max_retries: u32,
    #[serde(default)]
    exclusive: LockPolicy,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    fingerprint: String,
}

impl Job {
    /// Create a new job builder
    pub fn builder() -> JobBuilder {
        JobBuilder::default()
    }

    /// Build a job from an argument mapping with a generated id
    pub fn new(args: Args) -> Result<Self> {
        Self::builder().args(args).build()
    }

    // =========================================================================
    // Records
    // =========================================================================

    /// Serialize every field into a plain keyed mapping
    pub fn to_record(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(JobwalError::Serialization(format!(
                "job {} serialized to non-object: {}",
                self.id, other
            ))),
        }
    }

    /// Rebuild a job from a mapping produced by `to_record`
    pub fn from_record(record: &Value) -> Result<Self> {
        let job: Job = serde_json::from_value(record.clone())?;
        if job.id.is_empty() {
            return Err(JobwalError::InvalidJob("record has an empty id".to_string()));
        }
        Ok(job)
    }

    // =========================================================================
    // State Transitions
    // =========================================================================

    pub fn mark_running(&mut self) -> Result<()> {
        self.transition(JobState::Running)
    }

    pub fn mark_complete(&mut self) -> Result<()> {
        self.transition(JobState::Complete)
    }

    pub fn mark_failed(&mut self) -> Result<()> {
        self.transition(JobState::Failed)
    }

    /// Move a running job back to `queued` ahead of a retry
    pub fn mark_retry(&mut self) -> Result<()> {
        self.transition(JobState::Queued)
    }

    /// Put a job interrupted mid-run back to `queued`
    ///
    /// Used when a job is rebuilt from the WAL after a crash. Terminal and
    /// queued jobs are left untouched.
    pub fn reset_for_recovery(&mut self) {
        if self.state == JobState::Running {
            self.state = JobState::Queued;
            self.updated_at = Utc::now();
            tracing::trace!(job_id = %self.id, "job reset to queued for recovery");
        }
    }

    /// Count one failed attempt, returning the new total
    pub fn increment_retries(&mut self) -> u32 {
        self.retries += 1;
        self.updated_at = Utc::now();
        self.retries
    }

    /// Whether another attempt fits in the retry budget
    pub fn can_retry(&self) -> bool {
        self.retries <= self.max_retries
    }

    fn transition(&mut self, to: JobState) -> Result<()> {
        let from = self.state;
        if !from.can_transition_to(to) {
            return Err(JobwalError::InvalidTransition {
                job_id: self.id.clone(),
                from,
                to,
            });
        }

        self.state = to;
        self.updated_at = Utc::now();

        // Observability hook
        tracing::trace!(job_id = %self.id, %from, %to, "job state changed");
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn args(&self) -> &Args {
        &self.args
    }

    /// Name of the registered definition this job targets
    pub fn job_name(&self) -> Option<&str> {
        self.args.get(JOB_NAME_KEY).and_then(Value::as_str)
    }

    /// Positional arguments handed to the handler
    pub fn positional_args(&self) -> &[Value] {
        match self.args.get(ARGS_KEY) {
            Some(Value::Array(items)) => items,
            _ => &[],
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn exclusive(&self) -> &LockPolicy {
        &self.exclusive
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
