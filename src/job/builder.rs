//! Builder for Job

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{JobwalError, Result};

use super::{fingerprint, Args, Job, JobState, LockPolicy, ARGS_KEY, DEFAULT_MAX_RETRIES, JOB_NAME_KEY};

/// Builder for Job
///
/// Validates the reserved argument keys and fills in the id and fingerprint
/// when they are not supplied.
#[derive(Debug, Clone)]
pub struct JobBuilder {
    id: Option<String>,
    args: Args,
    max_retries: u32,
    exclusive: LockPolicy,
    fingerprint: Option<String>,
}

impl Default for JobBuilder {
    fn default() -> Self {
        Self {
            id: None,
            args: Args::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            exclusive: LockPolicy::None,
            fingerprint: None,
        }
    }
}

impl JobBuilder {
    /// Use an explicit id instead of a generated one
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Replace the whole argument mapping
    pub fn args(mut self, args: Args) -> Self {
        self.args = args;
        self
    }

    /// Set the target job name
    pub fn job_name(mut self, name: impl Into<String>) -> Self {
        self.args
            .insert(JOB_NAME_KEY.to_string(), Value::String(name.into()));
        self
    }

    /// Set the positional arguments
    pub fn positional(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.args.insert(
            ARGS_KEY.to_string(),
            Value::Array(values.into_iter().collect()),
        );
        self
    }

    /// Add an extra (non-positional) argument
    pub fn arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn exclusive(mut self, policy: LockPolicy) -> Self {
        self.exclusive = policy;
        self
    }

    /// Use a precomputed fingerprint
    pub fn fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn build(self) -> Result<Job> {
        let id = match self.id {
            Some(id) if id.is_empty() => {
                return Err(JobwalError::InvalidJob("job id must not be empty".to_string()))
            }
            Some(id) => id,
            None => Uuid::now_v7().to_string(),
        };

        let job_name = match self.args.get(JOB_NAME_KEY) {
            None => None,
            Some(Value::String(name)) => Some(name.as_str()),
            Some(other) => {
                return Err(JobwalError::InvalidJob(format!(
                    "`{}` must be a string, got {}",
                    JOB_NAME_KEY, other
                )))
            }
        };

        let payload = match self.args.get(ARGS_KEY) {
            Some(value @ Value::Array(_)) => value.clone(),
            Some(other) => {
                return Err(JobwalError::InvalidJob(format!(
                    "`{}` must be an array, got {}",
                    ARGS_KEY, other
                )))
            }
            None => Value::Object(self.args.clone()),
        };

        let fingerprint = match self.fingerprint {
            Some(fp) => fp,
            None => fingerprint::compute(job_name, &payload),
        };

        let now = Utc::now();
        Ok(Job {
            id,
            args: self.args,
            state: JobState::Queued,
            retries: 0,
            max_retries: self.max_retries,
            exclusive: self.exclusive,
            created_at: now,
            updated_at: now,
            fingerprint,
        })
    }
}
