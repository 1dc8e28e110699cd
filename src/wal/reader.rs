//! WAL Reader
//!
//! Handles reading entries from the WAL file.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use crate::error::{JobwalError, Result};

use super::codec::{self, Codec};
use super::Entry;

/// Counters collected while reading a log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Lines consumed, including skipped ones
    pub lines_read: u64,

    /// Entries decoded successfully
    pub entries_valid: u64,

    /// Lines that failed the checksum or did not decode
    pub entries_skipped: u64,
}

/// Reads entries from the WAL file, oldest first
pub struct WalReader {
    /// `None` when the log does not exist yet
    reader: Option<BufReader<File>>,

    codec: Arc<dyn Codec>,

    stats: ReplayStats,

    line: Vec<u8>,
}

impl WalReader {
    /// Open a WAL file for reading
    ///
    /// A missing file reads as an empty log.
    pub fn open(path: &Path, codec: Arc<dyn Codec>) -> Result<Self> {
        let reader = match File::open(path) {
            Ok(file) => Some(BufReader::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            reader,
            codec,
            stats: ReplayStats::default(),
            line: Vec::new(),
        })
    }

    /// Read the next valid entry, skipping malformed lines
    ///
    /// Returns `Ok(None)` at end of file. Only I/O errors are returned.
    pub fn next_entry(&mut self) -> Result<Option<Entry>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };

        loop {
            self.line.clear();
            if reader.read_until(b'\n', &mut self.line)? == 0 {
                return Ok(None);
            }
            self.stats.lines_read += 1;

            let text = match std::str::from_utf8(&self.line) {
                Ok(text) => text.trim_end_matches(['\n', '\r']),
                Err(e) => {
                    self.stats.entries_skipped += 1;
                    tracing::warn!(line = self.stats.lines_read, error = %e, "skipping non-UTF-8 WAL line");
                    continue;
                }
            };

            if text.trim().is_empty() {
                self.stats.entries_skipped += 1;
                continue;
            }

            let decoded = codec::unframe(text).and_then(|payload| self.codec.load(payload));
            match decoded {
                Ok(entry) => {
                    self.stats.entries_valid += 1;
                    return Ok(Some(entry));
                }
                Err(e) => {
                    self.stats.entries_skipped += 1;
                    tracing::warn!(line = self.stats.lines_read, error = %e, "skipping malformed WAL line");
                }
            }
        }
    }

    /// Iterate over all valid entries
    pub fn entries(self) -> Replay {
        Replay {
            reader: self,
            error: None,
        }
    }

    pub fn stats(&self) -> ReplayStats {
        self.stats
    }
}

/// Lazy iterator over WAL entries
///
/// Ends at end of file or at the first I/O error. The error is kept and
/// returned by `finish`, so callers that need the whole log must call it.
pub struct Replay {
    reader: WalReader,
    error: Option<JobwalError>,
}

impl Replay {
    pub fn stats(&self) -> ReplayStats {
        self.reader.stats()
    }

    /// Final counters, or the I/O error that cut the replay short
    pub fn finish(self) -> Result<ReplayStats> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.reader.stats()),
        }
    }
}

impl Iterator for Replay {
    type Item = Entry;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.next_entry() {
            Ok(entry) => entry,
            Err(e) => {
                tracing::error!(error = %e, "WAL replay stopped on read error");
                self.reader.reader = None;
                self.error = Some(e);
                None
            }
        }
    }
}
