//! Error types for jobwal
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

use crate::job::JobState;

/// Result type alias using JobwalError
pub type Result<T> = std::result::Result<T, JobwalError>;

/// Unified error type for jobwal operations
#[derive(Debug, Error)]
pub enum JobwalError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // WAL Errors
    // -------------------------------------------------------------------------
    #[error("WAL corruption detected: {0}")]
    WalCorruption(String),

    #[error("WAL write failed: {0}")]
    WalWrite(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Job Errors
    // -------------------------------------------------------------------------
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Illegal transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: JobState,
        to: JobState,
    },

    // -------------------------------------------------------------------------
    // Runner Errors
    // -------------------------------------------------------------------------
    #[error("Runner is already running")]
    AlreadyRunning,

    #[error("Work queue closed")]
    QueueClosed,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for JobwalError {
    fn from(err: serde_json::Error) -> Self {
        JobwalError::Serialization(err.to_string())
    }
}
