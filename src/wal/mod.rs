//! Write-Ahead Log (WAL) Module
//!
//! Provides durability guarantees through append-only logging.
//!
//! ## Responsibilities
//! - Append a lifecycle entry before every job transition takes effect
//! - CRC32 checksums for torn-line detection
//! - Lazy replay that skips malformed lines
//! - Checkpointing: rewrite the log down to in-flight jobs
//! - Recovery: decide which jobs must run again after a restart
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ 1c291ca3 {"job_id":"…","event":"enqueued",…} │
//! │ 5e0b3f11 {"job_id":"…","event":"started",…}  │
//! │ …                                            │
//! └──────────────────────────────────────────────┘
//! ```

mod entry;
pub mod codec;
mod writer;
mod reader;
mod recovery;
mod storage;

pub use entry::{Entry, Event};
pub use codec::{Codec, JsonCodec, RowCodec};
pub use writer::WalWriter;
pub use reader::{Replay, ReplayStats, WalReader};
pub use recovery::{latest_by_job, RecoveryPlan, RecoveryResult, WalRecovery};
pub use storage::{CheckpointStats, WalStorage};
