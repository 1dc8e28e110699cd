//! Runner Module
//!
//! The worker pool that executes jobs.
//!
//! ## Responsibilities
//! - Log `enqueued` before a job reaches the in-memory queue
//! - Recover in-flight jobs from the WAL on first start
//! - Run a fixed number of worker threads over one unbounded queue
//! - Serialize jobs that resolve to the same lock key
//! - Retry failed jobs with exponential backoff
//!
//! ## Job Flow
//! ```text
//!   enqueue ──► WAL: enqueued ──► queue ──► worker
//!                                             │
//!                     lock key? ──► WAL: started ──► handler
//!                                                      │
//!                 ┌────────────────────┬───────────────┴──────┐
//!                 ▼                    ▼                      ▼
//!          WAL: completed      WAL: retry + sleep        WAL: failed
//!                              └──► back onto queue
//! ```

mod locks;
mod worker;

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel;
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{JobwalError, Result};
use crate::job::{Job, JobBuilder};
use crate::registry::Registry;
use crate::wal::{CheckpointStats, Event, RecoveryResult, WalRecovery, WalStorage};

pub use locks::{KeyGuard, LockTable};

use worker::{worker_loop, Shared, WorkItem};

/// Background job runner
///
/// ## Concurrency Model
/// - One unbounded crossbeam channel feeds `max_threads` worker threads
/// - `enqueue` may be called from any thread, before or after `start`
/// - Jobs sharing a lock key run one at a time; everything else runs in
///   parallel, bounded by the pool size
/// - A retrying job sleeps on the worker that ran it
pub struct Runner {
    shared: Arc<Shared>,

    /// Live worker threads; empty while stopped
    workers: Mutex<Vec<JoinHandle<()>>>,

    /// Recovery runs on the first successful start only
    recovered: Mutex<bool>,
}

impl Runner {
    const WAL_FILENAME: &'static str = "jobs.wal";

    /// Open a runner whose WAL lives in `config.data_dir`
    pub fn open(config: Config, registry: Arc<Registry>) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;

        let wal_path = config.data_dir.join(Self::WAL_FILENAME);
        let storage = WalStorage::open(&wal_path, config.wal_sync_strategy, config.wal_format)?;

        Ok(Self::with_storage(config, registry, Arc::new(storage)))
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path, registry: Arc<Registry>) -> Result<Self> {
        let config = Config {
            data_dir: path.to_path_buf(),
            ..Config::default()
        };
        Self::open(config, registry)
    }

    /// Build a runner over an already opened log
    pub fn with_storage(config: Config, registry: Arc<Registry>, storage: Arc<WalStorage>) -> Self {
        let (sender, receiver) = channel::unbounded();

        let shared = Arc::new(Shared {
            config,
            registry,
            storage,
            sender,
            receiver,
            locks: LockTable::new(),
            known: Mutex::new(HashSet::new()),
        });

        Self {
            shared,
            workers: Mutex::new(Vec::new()),
            recovered: Mutex::new(false),
        }
    }

    /// A job builder carrying the configured default retry budget
    pub fn job_builder(&self) -> JobBuilder {
        Job::builder().max_retries(self.shared.config.default_max_retries)
    }

    /// Submit a job
    ///
    /// The `enqueued` entry is durable before the job is visible to workers.
    pub fn enqueue(&self, job: Job) -> Result<()> {
        if job.is_terminal() {
            return Err(JobwalError::InvalidJob(format!(
                "job {} is already {}",
                job.id(),
                job.state()
            )));
        }

        // Registered before the append so a concurrent recovery that sees the
        // entry also sees the id.
        self.shared.known.lock().insert(job.id().to_string());

        if let Err(e) = self.shared.record(&job, Event::Enqueued) {
            self.shared.known.lock().remove(job.id());
            return Err(e);
        }

        tracing::debug!(job_id = %job.id(), job_name = job.job_name().unwrap_or("<none>"), "job enqueued");
        self.shared.push(job)
    }

    /// Recover from the WAL (first call only), then launch the workers
    pub fn start(&self) -> Result<RecoveryResult> {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return Err(JobwalError::AlreadyRunning);
        }

        let mut result = RecoveryResult::default();
        {
            let mut recovered = self.recovered.lock();
            if !*recovered {
                result = self.recover_from_wal()?;
                *recovered = true;
            }
        }

        self.purge_sentinels();

        let max_threads = self.shared.config.max_threads;
        for worker_id in 0..max_threads {
            let shared = Arc::clone(&self.shared);
            let handle = thread::Builder::new()
                .name(format!("jobwal-worker-{}", worker_id))
                .spawn(move || worker_loop(shared, worker_id))?;
            workers.push(handle);
        }

        tracing::info!(
            workers = max_threads,
            pending = self.pending(),
            recovered = result.jobs_recovered,
            "runner started"
        );
        Ok(result)
    }

    /// Stop every worker and wait for them to exit
    ///
    /// Shutdown sentinels queue behind already submitted work. Jobs pushed
    /// back by a retry after the sentinels stay queued for the next `start`.
    pub fn stop(&self) {
        let mut workers = self.workers.lock();
        if workers.is_empty() {
            return;
        }

        for _ in 0..workers.len() {
            if self.shared.sender.send(WorkItem::Shutdown).is_err() {
                break;
            }
        }

        for handle in workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("worker thread panicked");
            }
        }

        tracing::info!(pending = self.pending(), "runner stopped");
    }

    /// Compact the WAL
    ///
    /// Appends from workers wait while it runs.
    pub fn checkpoint(&self) -> Result<CheckpointStats> {
        self.shared.storage.checkpoint()
    }

    // =========================================================================
    // Recovery
    // =========================================================================

    /// Requeue every in-flight job found in the WAL
    ///
    /// Jobs already submitted through `enqueue` in this process are in the
    /// queue and are not pushed twice.
    fn recover_from_wal(&self) -> Result<RecoveryResult> {
        let (jobs, mut result) = WalRecovery::recover(&self.shared.storage)?;

        let mut recovered = 0;
        for job in jobs {
            if !self.shared.known.lock().insert(job.id().to_string()) {
                result.jobs_already_queued += 1;
                continue;
            }
            tracing::debug!(job_id = %job.id(), "recovered job from WAL");
            self.shared.push(job)?;
            recovered += 1;
        }
        result.jobs_recovered = recovered;

        tracing::info!(
            entries_replayed = result.entries_replayed,
            entries_skipped = result.entries_skipped,
            in_flight = result.jobs_in_flight,
            deduplicated = result.jobs_deduplicated,
            recovered = result.jobs_recovered,
            "WAL recovery complete"
        );
        Ok(result)
    }

    /// Drop shutdown sentinels left behind by workers that died early
    fn purge_sentinels(&self) {
        let mut kept = Vec::new();
        while let Ok(item) = self.shared.receiver.try_recv() {
            if let WorkItem::Run(job) = item {
                kept.push(job);
            }
        }
        for job in kept {
            let _ = self.shared.sender.send(WorkItem::Run(job));
        }
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Items waiting in the in-memory queue
    pub fn pending(&self) -> usize {
        self.shared.receiver.len()
    }

    pub fn is_running(&self) -> bool {
        !self.workers.lock().is_empty()
    }

    /// Lock keys currently held or awaited
    pub fn active_locks(&self) -> usize {
        self.shared.locks.len()
    }

    pub fn storage(&self) -> &Arc<WalStorage> {
        &self.shared.storage
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.shared.registry
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        self.stop();
    }
}
