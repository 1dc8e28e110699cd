//! WAL Recovery
//!
//! Folds a replayed log into the latest entry per job and decides which jobs
//! must run again after a restart.

use std::collections::{HashMap, HashSet};

use crate::error::Result;
use crate::job::Job;

use super::{Entry, WalStorage};

/// Latest entry per job id, in the order those entries were written
///
/// Last-write-wins by file position, which is chronological since the log is
/// append-only.
pub fn latest_by_job<I>(entries: I) -> Vec<Entry>
where
    I: IntoIterator<Item = Entry>,
{
    let mut latest: HashMap<String, (usize, Entry)> = HashMap::new();
    for (position, entry) in entries.into_iter().enumerate() {
        latest.insert(entry.job_id.clone(), (position, entry));
    }

    let mut ordered: Vec<(usize, Entry)> = latest.into_values().collect();
    ordered.sort_by_key(|(position, _)| *position);
    ordered.into_iter().map(|(_, entry)| entry).collect()
}

/// Result of folding a log for recovery
#[derive(Debug, Clone, Default)]
pub struct RecoveryPlan {
    /// Latest entry per job, chronological
    pub latest: Vec<Entry>,

    /// Fingerprints of jobs whose latest entry is terminal
    pub terminal_fingerprints: HashSet<String>,
}

impl RecoveryPlan {
    /// Fold a sequence of entries
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = Entry>,
    {
        let latest = latest_by_job(entries);
        let terminal_fingerprints = latest
            .iter()
            .filter(|entry| entry.is_terminal())
            .filter_map(|entry| entry.fingerprint().map(str::to_string))
            .collect();

        Self {
            latest,
            terminal_fingerprints,
        }
    }

    /// Jobs whose latest entry is not terminal
    pub fn in_flight(&self) -> impl Iterator<Item = &Entry> {
        self.latest.iter().filter(|entry| !entry.is_terminal())
    }

    /// Whether an equivalent job already reached a terminal state
    pub fn is_duplicate(&self, entry: &Entry) -> bool {
        entry
            .fingerprint()
            .map(|fp| self.terminal_fingerprints.contains(fp))
            .unwrap_or(false)
    }
}

/// Result of a recovery operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Valid entries read from the log
    pub entries_replayed: u64,

    /// Malformed lines skipped
    pub entries_skipped: u64,

    /// Jobs whose latest entry is not terminal
    pub jobs_in_flight: usize,

    /// In-flight jobs dropped because an equivalent job already finished
    pub jobs_deduplicated: usize,

    /// In-flight jobs whose snapshot could not be rebuilt
    pub jobs_unreadable: usize,

    /// In-flight jobs already sitting in the in-memory queue
    pub jobs_already_queued: usize,

    /// Jobs handed back for execution
    pub jobs_recovered: usize,
}

/// Handles job recovery after a crash
pub struct WalRecovery;

impl WalRecovery {
    /// Rebuild the jobs that must run again
    ///
    /// This will:
    /// 1. Replay the whole log
    /// 2. Keep the latest entry per job id
    /// 3. Drop in-flight jobs whose fingerprint already finished elsewhere
    /// 4. Rebuild the rest from their stored snapshots, reset to `queued`
    pub fn recover(storage: &WalStorage) -> Result<(Vec<Job>, RecoveryResult)> {
        let mut replay = storage.replay()?;
        let plan = RecoveryPlan::from_entries(replay.by_ref());
        let stats = replay.finish()?;

        let mut result = RecoveryResult {
            entries_replayed: stats.entries_valid,
            entries_skipped: stats.entries_skipped,
            ..RecoveryResult::default()
        };

        let mut jobs = Vec::new();
        for entry in plan.in_flight() {
            result.jobs_in_flight += 1;

            if plan.is_duplicate(entry) {
                result.jobs_deduplicated += 1;
                tracing::info!(job_id = %entry.job_id, "skipping recovered job: equivalent job already finished");
                continue;
            }

            match Job::from_record(&entry.data) {
                Ok(mut job) => {
                    job.reset_for_recovery();
                    jobs.push(job);
                }
                Err(e) => {
                    result.jobs_unreadable += 1;
                    tracing::warn!(job_id = %entry.job_id, error = %e, "cannot rebuild job from WAL snapshot");
                }
            }
        }

        result.jobs_recovered = jobs.len();
        Ok((jobs, result))
    }

    /// Inspect a log without rebuilding jobs
    pub fn plan(storage: &WalStorage) -> Result<RecoveryPlan> {
        let mut replay = storage.replay()?;
        let plan = RecoveryPlan::from_entries(replay.by_ref());
        replay.finish()?;
        Ok(plan)
    }
}
