//! WAL Storage
//!
//! Thread-safe front for the log: append, replay and checkpoint.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{WalFormat, WalSyncStrategy};
use crate::error::{JobwalError, Result};

use super::codec::{self, codec_for, Codec};
use super::recovery::latest_by_job;
use super::{Entry, Replay, WalReader, WalWriter};

/// Outcome of a checkpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckpointStats {
    /// Valid entries in the log before compaction
    pub entries_before: u64,

    /// Entries written to the compacted log (one per in-flight job)
    pub entries_after: u64,

    /// Jobs dropped because their latest entry was terminal
    pub jobs_dropped: u64,
}

/// Durable, append-only job log
///
/// ## Concurrency:
/// - `writer`: one mutex serializes appends from every thread
/// - `checkpoint` holds the same mutex for the whole compaction, so no append
///   can land between the replay and the rename
/// - `replay` opens its own read handle and takes no lock
pub struct WalStorage {
    path: PathBuf,
    codec: Arc<dyn Codec>,
    sync_strategy: WalSyncStrategy,
    writer: Mutex<WalWriter>,
}

impl WalStorage {
    /// Open or create the log at `path` with a built-in format
    pub fn open(path: &Path, sync_strategy: WalSyncStrategy, format: WalFormat) -> Result<Self> {
        Self::open_with_codec(path, sync_strategy, codec_for(format))
    }

    /// Open or create the log with a custom codec
    pub fn open_with_codec(
        path: &Path,
        sync_strategy: WalSyncStrategy,
        codec: Arc<dyn Codec>,
    ) -> Result<Self> {
        let writer = WalWriter::open(path, sync_strategy, Arc::clone(&codec))?;
        Ok(Self {
            path: path.to_path_buf(),
            codec,
            sync_strategy,
            writer: Mutex::new(writer),
        })
    }

    /// Append one entry; errors are fatal to the caller
    pub fn append(&self, entry: &Entry) -> Result<()> {
        self.writer.lock().append(entry)
    }

    /// Lazily read the log from the start
    pub fn replay(&self) -> Result<Replay> {
        Ok(self.reader()?.entries())
    }

    /// A fresh reader positioned at the start of the log
    pub fn reader(&self) -> Result<WalReader> {
        WalReader::open(&self.path, Arc::clone(&self.codec))
    }

    /// Compact the log down to the latest entry of every in-flight job
    ///
    /// Steps:
    /// 1. Lock out appends
    /// 2. Replay and fold by job id; any read error aborts here
    /// 3. Write survivors to a temp file, fsync it and open the next writer
    /// 4. Rename over the log and swap the writer in
    ///
    /// Nothing after the rename can fail, so the writer never points at the
    /// replaced file.
    pub fn checkpoint(&self) -> Result<CheckpointStats> {
        let mut writer = self.writer.lock();
        writer.sync()?;

        let mut replay = self.replay()?;
        let latest = latest_by_job(replay.by_ref());
        let entries_before = replay.finish()?.entries_valid;

        let total_jobs = latest.len() as u64;
        let survivors: Vec<Entry> = latest.into_iter().filter(|e| !e.is_terminal()).collect();

        let temp_path = self.temp_path()?;
        let next = match self.write_compacted(&temp_path, &survivors) {
            Ok(next) => next,
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&temp_path) {
                    tracing::warn!(path = %temp_path.display(), error = %cleanup, "cannot remove checkpoint file");
                }
                return Err(e);
            }
        };

        fs::rename(&temp_path, &self.path)?;
        *writer = next.renamed_to(&self.path);
        self.sync_parent_dir();

        let stats = CheckpointStats {
            entries_before,
            entries_after: survivors.len() as u64,
            jobs_dropped: total_jobs - survivors.len() as u64,
        };
        tracing::info!(
            entries_before = stats.entries_before,
            entries_after = stats.entries_after,
            jobs_dropped = stats.jobs_dropped,
            "WAL checkpoint complete"
        );
        Ok(stats)
    }

    /// Force buffered entries to disk
    pub fn sync(&self) -> Result<()> {
        self.writer.lock().sync()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn codec(&self) -> Arc<dyn Codec> {
        Arc::clone(&self.codec)
    }

    /// Write `survivors` to `temp_path` and return a writer appending to it
    fn write_compacted(&self, temp_path: &Path, survivors: &[Entry]) -> Result<WalWriter> {
        {
            let file = File::create(temp_path)?;
            let mut out = BufWriter::new(file);
            for entry in survivors {
                let payload = self.codec.dump(entry)?;
                out.write_all(codec::frame(&payload).as_bytes())?;
                out.write_all(b"\n")?;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }

        WalWriter::open(temp_path, self.sync_strategy, Arc::clone(&self.codec))
    }

    /// Make the rename durable; failure only costs durability of the rename
    fn sync_parent_dir(&self) {
        let Some(parent) = self.path.parent() else {
            return;
        };
        let parent = if parent.as_os_str().is_empty() { Path::new(".") } else { parent };

        match File::open(parent) {
            Ok(dir) => {
                if let Err(e) = dir.sync_all() {
                    tracing::warn!(dir = %parent.display(), error = %e, "cannot fsync WAL directory");
                }
            }
            Err(e) => tracing::warn!(dir = %parent.display(), error = %e, "cannot open WAL directory for fsync"),
        }
    }

    fn temp_path(&self) -> Result<PathBuf> {
        let mut name = self
            .path
            .file_name()
            .ok_or_else(|| JobwalError::WalWrite(format!("{} is not a file path", self.path.display())))?
            .to_os_string();
        name.push(".checkpoint");
        Ok(self.path.with_file_name(name))
    }
}
