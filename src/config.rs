//! Configuration for jobwal
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{JobwalError, Result};

/// Main configuration for a jobwal runner
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     └── jobs.wal         (write-ahead log)
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync WAL
    pub wal_sync_strategy: WalSyncStrategy,

    /// Line encoding used for WAL records
    pub wal_format: WalFormat,

    // -------------------------------------------------------------------------
    // Worker Pool Configuration
    // -------------------------------------------------------------------------
    /// Number of worker threads launched by `Runner::start`
    pub max_threads: usize,

    /// Retry budget given to jobs built through the runner's helpers
    pub default_max_retries: u32,

    /// Time unit of the exponential retry backoff (`base * 2^retries`)
    pub backoff_base: Duration,

    /// Upper bound on a single backoff sleep
    pub max_backoff: Duration,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N uncommitted entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

/// Encoding of a single WAL line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalFormat {
    /// One JSON object per line
    Json,

    /// Tab-separated row per line
    Rows,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./jobwal_data"),
            wal_sync_strategy: WalSyncStrategy::EveryWrite,
            wal_format: WalFormat::Json,
            max_threads: 4,
            default_max_retries: 3,
            backoff_base: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Backoff before the given retry attempt, capped at `max_backoff`
    pub fn backoff_for(&self, retries: u32) -> Duration {
        let factor = 1u32.checked_shl(retries).unwrap_or(u32::MAX);
        self.backoff_base
            .checked_mul(factor)
            .map(|d| d.min(self.max_backoff))
            .unwrap_or(self.max_backoff)
    }

    /// Check the config for values the runner cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.max_threads == 0 {
            return Err(JobwalError::Config(
                "max_threads must be at least 1".to_string(),
            ));
        }
        if let WalSyncStrategy::EveryNEntries { count: 0 } = self.wal_sync_strategy {
            return Err(JobwalError::Config(
                "EveryNEntries count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the WAL line format
    pub fn wal_format(mut self, format: WalFormat) -> Self {
        self.config.wal_format = format;
        self
    }

    /// Set the number of worker threads
    pub fn max_threads(mut self, count: usize) -> Self {
        self.config.max_threads = count;
        self
    }

    /// Set the default retry budget
    pub fn default_max_retries(mut self, retries: u32) -> Self {
        self.config.default_max_retries = retries;
        self
    }

    /// Set the backoff time unit
    pub fn backoff_base(mut self, base: Duration) -> Self {
        self.config.backoff_base = base;
        self
    }

    /// Set the backoff cap
    pub fn max_backoff(mut self, cap: Duration) -> Self {
        self.config.max_backoff = cap;
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
