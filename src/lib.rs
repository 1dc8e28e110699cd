//! # jobwal
//!
//! An embedded background-job engine with:
//! - Write-Ahead Logging (WAL) of every job lifecycle event
//! - Crash recovery with at-least-once delivery
//! - Deduplication of equivalent jobs by content fingerprint
//! - Fixed-size worker pool with retry and exponential backoff
//! - Per-resource mutual exclusion via lock keys
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Callers                               │
//! │               (enqueue from any thread)                      │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                        Runner                                │
//! │          (work queue + worker pool + lock table)             │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │     WAL     │          │  Registry   │
//!   │  (Append)   │          │  (RwLock)   │
//!   └─────────────┘          └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use jobwal::{Config, Job, Registry, Runner};
//! use jobwal::registry::JobOptions;
//!
//! # fn main() -> jobwal::Result<()> {
//! let registry = Arc::new(Registry::new());
//! registry.register("echo", JobOptions::default(), |args| {
//!     println!("{:?}", args);
//!     Ok(())
//! });
//!
//! let config = Config::builder().data_dir("./jobwal_data").build()?;
//! let runner = Runner::open(config, registry)?;
//! runner.start()?;
//! runner.enqueue(Job::builder().job_name("echo").positional([serde_json::json!(42)]).build()?)?;
//! runner.stop();
//! # Ok(())
//! # }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod wal;
pub mod job;
pub mod registry;
pub mod runner;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{JobwalError, Result};
pub use config::Config;
pub use job::{Job, JobState};
pub use registry::Registry;
pub use runner::Runner;
pub use wal::WalStorage;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of jobwal
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
