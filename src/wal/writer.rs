//! WAL Writer
//!
//! Handles appending entries to the WAL file.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::WalSyncStrategy;
use crate::error::{JobwalError, Result};

use super::codec::{self, Codec};
use super::Entry;

/// Writes entries to the WAL file
///
/// Not synchronized on its own; `WalStorage` wraps it in a mutex.
pub struct WalWriter {
    /// Path of the log file
    path: PathBuf,

    /// Buffered append handle
    writer: BufWriter<File>,

    /// Line encoding
    codec: Arc<dyn Codec>,

    /// When to fsync
    sync_strategy: WalSyncStrategy,

    /// Entries written since the last fsync
    uncommitted: usize,

    /// Entries written through this handle
    entries_written: u64,
}

impl WalWriter {
    /// Open or create a WAL file, creating parent directories as needed
    pub fn open(path: &Path, sync_strategy: WalSyncStrategy, codec: Arc<dyn Codec>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            codec,
            sync_strategy,
            uncommitted: 0,
            entries_written: 0,
        })
    }

    /// Append an entry to the WAL as one line
    ///
    /// The buffer is flushed on every append so readers always see whole
    /// lines; fsync follows the configured strategy.
    pub fn append(&mut self, entry: &Entry) -> Result<()> {
        entry.validate()?;

        let payload = self.codec.dump(entry)?;
        if payload.contains('\n') {
            return Err(JobwalError::WalWrite(format!(
                "encoded entry for job {} spans multiple lines",
                entry.job_id
            )));
        }

        let line = codec::frame(&payload);
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;

        self.uncommitted += 1;
        self.entries_written += 1;

        let should_sync = match self.sync_strategy {
            WalSyncStrategy::EveryWrite => true,
            WalSyncStrategy::EveryNEntries { count } => self.uncommitted >= count,
        };
        if should_sync {
            self.sync()?;
        }

        Ok(())
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        self.uncommitted = 0;
        Ok(())
    }

    /// Entries not yet fsynced
    pub fn uncommitted_count(&self) -> usize {
        self.uncommitted
    }

    /// Entries appended through this handle
    pub fn entries_written(&self) -> u64 {
        self.entries_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record that the open file now lives at `path`
    ///
    /// The handle follows the inode, so nothing is reopened.
    pub(crate) fn renamed_to(mut self, path: &Path) -> Self {
        self.path = path.to_path_buf();
        self
    }
}
