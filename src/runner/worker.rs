//! Worker loop and job execution
//!
//! Every worker thread runs `worker_loop` over the shared queue. A job's
//! whole execution, retry sleep included, happens inside its lock key.

use std::any::Any;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde_json::Value;

use crate::config::Config;
use crate::error::{JobwalError, Result};
use crate::job::Job;
use crate::registry::{Exclusive, JobDefinition, Registry};
use crate::wal::{Entry, Event, WalStorage};

use super::locks::LockTable;

/// Item on the work queue
pub(crate) enum WorkItem {
    Run(Box<Job>),
    Shutdown,
}

/// State shared by the runner and all of its workers
pub(crate) struct Shared {
    pub config: Config,
    pub registry: Arc<Registry>,
    pub storage: Arc<WalStorage>,
    pub sender: Sender<WorkItem>,
    pub receiver: Receiver<WorkItem>,
    pub locks: LockTable,

    /// Ids queued in this process that have not reached a terminal state
    pub known: Mutex<HashSet<String>>,
}

impl Shared {
    /// Push a job onto the in-memory queue
    pub fn push(&self, job: Job) -> Result<()> {
        self.sender
            .send(WorkItem::Run(Box::new(job)))
            .map_err(|_| JobwalError::QueueClosed)
    }

    /// Append a lifecycle entry for `job`
    pub fn record(&self, job: &Job, event: Event) -> Result<()> {
        self.storage.append(&Entry::for_job(job, event)?)
    }

    fn forget(&self, job: &Job) {
        self.known.lock().remove(job.id());
    }

    /// Resolve the lock key, then run the job while holding it
    pub fn execute_job(&self, job: Job) -> Result<()> {
        let definition = job.job_name().and_then(|name| self.registry.lookup(name));

        let resolved = panic::catch_unwind(AssertUnwindSafe(|| resolve_lock_key(definition.as_deref(), &job)));
        let key = match resolved {
            Ok(key) => key,
            Err(payload) => {
                let message = format!("lock key resolver panicked: {}", panic_message(payload.as_ref()));
                return self.fail_without_running(job, &message);
            }
        };

        let _guard = match key {
            Some(key) => {
                tracing::debug!(job_id = %job.id(), lock_key = %key, "acquiring job lock");
                Some(self.locks.acquire(&key))
            }
            None => None,
        };

        self.execute_job_inner(job, definition)
    }

    /// Log `started` then `failed` for a job whose handler cannot be called
    fn fail_without_running(&self, mut job: Job, reason: &str) -> Result<()> {
        if let Err(e) = job.mark_running() {
            self.forget(&job);
            return Err(e);
        }
        self.record(&job, Event::Started)?;

        job.mark_failed()?;
        self.record(&job, Event::Failed)?;
        self.forget(&job);
        tracing::error!(
            job_id = %job.id(),
            job_name = job.job_name().unwrap_or("<none>"),
            reason,
            "job failed without running"
        );
        Ok(())
    }

    fn execute_job_inner(&self, mut job: Job, definition: Option<Arc<JobDefinition>>) -> Result<()> {
        let Some(definition) = definition else {
            return self.fail_without_running(job, "no job definition registered");
        };

        if let Err(e) = job.mark_running() {
            self.forget(&job);
            return Err(e);
        }
        self.record(&job, Event::Started)?;

        tracing::debug!(job_id = %job.id(), job_name = %definition.name(), "job started");

        match invoke(&definition, job.positional_args()) {
            Ok(()) => {
                job.mark_complete()?;
                self.record(&job, Event::Completed)?;
                self.forget(&job);
                tracing::debug!(job_id = %job.id(), job_name = %definition.name(), "job completed");
            }
            Err(message) => {
                let retries = job.increment_retries();

                if job.can_retry() {
                    job.mark_retry()?;
                    self.record(&job, Event::Retry)?;

                    let delay = self.config.backoff_for(retries);
                    tracing::warn!(
                        job_id = %job.id(),
                        job_name = %definition.name(),
                        retries,
                        max_retries = job.max_retries(),
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "job failed, retrying"
                    );

                    thread::sleep(delay);
                    self.push(job)?;
                } else {
                    job.mark_failed()?;
                    self.record(&job, Event::Failed)?;
                    self.forget(&job);
                    tracing::error!(
                        job_id = %job.id(),
                        job_name = %definition.name(),
                        retries,
                        error = %message,
                        "job failed permanently"
                    );
                }
            }
        }

        Ok(())
    }
}

/// Per-worker dispatch loop; exits on the shutdown sentinel
pub(crate) fn worker_loop(shared: Arc<Shared>, worker_id: usize) {
    tracing::debug!(worker_id, "worker started");

    loop {
        let item = match shared.receiver.recv() {
            Ok(item) => item,
            Err(_) => break,
        };

        match item {
            WorkItem::Shutdown => break,
            WorkItem::Run(job) => {
                let job_id = job.id().to_string();
                if let Err(e) = shared.execute_job(*job) {
                    tracing::error!(worker_id, job_id = %job_id, error = %e, "error while executing job");
                }
            }
        }
    }

    tracing::debug!(worker_id, "worker stopped");
}

/// Pick the lock key for a job
///
/// The definition's policy wins; the job's own policy applies only when the
/// definition declares none.
pub(crate) fn resolve_lock_key(definition: Option<&JobDefinition>, job: &Job) -> Option<String> {
    match definition.map(|d| &d.options().exclusive) {
        Some(exclusive) if !exclusive.is_none() => key_for(exclusive, job),
        _ => key_for(&Exclusive::from(job.exclusive().clone()), job),
    }
}

fn key_for(exclusive: &Exclusive, job: &Job) -> Option<String> {
    match exclusive {
        Exclusive::None => None,
        Exclusive::WholeJob => job.job_name().map(str::to_string),
        Exclusive::Field(name) => job.args().get(name).and_then(key_from_value),
        Exclusive::Custom(resolver) => resolver(job.args()),
    }
}

fn key_from_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Run a handler, turning both errors and panics into a message
fn invoke(definition: &JobDefinition, args: &[Value]) -> std::result::Result<(), String> {
    match panic::catch_unwind(AssertUnwindSafe(|| definition.call(args))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(format!("handler panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
