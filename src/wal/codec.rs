//! WAL line codecs
//!
//! The WAL only depends on `dump`/`load`; the line framing around the payload
//! (checksum prefix) is the same for every codec.
//!
//! ## Line Format
//! ```text
//! ┌───────────────┬───────┬──────────────────────┬────┐
//! │ CRC32 (8 hex) │ Space │ Payload (codec text) │ \n │
//! └───────────────┴───────┴──────────────────────┴────┘
//! ```

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::config::WalFormat;
use crate::error::{JobwalError, Result};
use crate::job::JobState;

use super::{Entry, Event};

/// Length of the hex checksum prefix
pub const CHECKSUM_LEN: usize = 8;

/// Encodes entries to single-line text and back
pub trait Codec: Send + Sync {
    /// Encode an entry; the result must not contain a newline
    fn dump(&self, entry: &Entry) -> Result<String>;

    /// Decode one line produced by `dump`
    fn load(&self, text: &str) -> Result<Entry>;
}

/// Pick the codec for a configured format
pub fn codec_for(format: WalFormat) -> Arc<dyn Codec> {
    match format {
        WalFormat::Json => Arc::new(JsonCodec),
        WalFormat::Rows => Arc::new(RowCodec),
    }
}

// =============================================================================
// JSON
// =============================================================================

/// One JSON object per line
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn dump(&self, entry: &Entry) -> Result<String> {
        Ok(serde_json::to_string(entry)?)
    }

    fn load(&self, text: &str) -> Result<Entry> {
        let entry: Entry = serde_json::from_str(text)?;
        entry.validate()?;
        Ok(entry)
    }
}

// =============================================================================
// Rows
// =============================================================================

/// Tab-separated row: `job_id  event  timestamp  state  data`
///
/// A missing state is written as `-`; `data` is compact JSON, which never
/// contains a raw tab or newline.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowCodec;

const ROW_FIELDS: usize = 5;
const NULL_STATE: &str = "-";

impl Codec for RowCodec {
    fn dump(&self, entry: &Entry) -> Result<String> {
        if entry.job_id.contains(['\t', '\n', '\r']) {
            return Err(JobwalError::Serialization(format!(
                "job_id {:?} cannot be stored in a row",
                entry.job_id
            )));
        }

        let state = entry.state.map(JobState::as_str).unwrap_or(NULL_STATE);
        let data = serde_json::to_string(&entry.data)?;

        Ok(format!(
            "{}\t{}\t{}\t{}\t{}",
            entry.job_id,
            entry.event,
            entry.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            state,
            data
        ))
    }

    fn load(&self, text: &str) -> Result<Entry> {
        let fields: Vec<&str> = text.splitn(ROW_FIELDS, '\t').collect();
        if fields.len() != ROW_FIELDS {
            return Err(JobwalError::Serialization(format!(
                "expected {} fields, got {}",
                ROW_FIELDS,
                fields.len()
            )));
        }

        let event = Event::parse(fields[1])
            .ok_or_else(|| JobwalError::Serialization(format!("unknown event {:?}", fields[1])))?;

        let timestamp = DateTime::parse_from_rfc3339(fields[2])
            .map_err(|e| JobwalError::Serialization(format!("bad timestamp: {}", e)))?
            .with_timezone(&Utc);

        let state = match fields[3] {
            NULL_STATE => None,
            label => Some(
                JobState::parse(label)
                    .ok_or_else(|| JobwalError::Serialization(format!("unknown state {:?}", label)))?,
            ),
        };

        let entry = Entry {
            job_id: fields[0].to_string(),
            event,
            data: serde_json::from_str(fields[4])?,
            timestamp,
            state,
        };
        entry.validate()?;
        Ok(entry)
    }
}

// =============================================================================
// Framing
// =============================================================================

/// Prefix a payload with its CRC32
pub fn frame(payload: &str) -> String {
    let crc = crc32fast::hash(payload.as_bytes());
    format!("{:08x} {}", crc, payload)
}

/// Strip and verify the checksum prefix
///
/// Lines without a prefix are returned unchanged.
pub fn unframe(line: &str) -> Result<&str> {
    let bytes = line.as_bytes();
    let has_prefix = bytes.len() > CHECKSUM_LEN
        && bytes[CHECKSUM_LEN] == b' '
        && bytes[..CHECKSUM_LEN].iter().all(u8::is_ascii_hexdigit);

    if !has_prefix {
        return Ok(line);
    }

    let (prefix, rest) = line.split_at(CHECKSUM_LEN);
    let payload = &rest[1..];
    let expected = u32::from_str_radix(prefix, 16)
        .map_err(|e| JobwalError::WalCorruption(format!("bad checksum prefix: {}", e)))?;
    let actual = crc32fast::hash(payload.as_bytes());

    if expected != actual {
        return Err(JobwalError::WalCorruption(format!(
            "checksum mismatch: expected {:08x}, got {:08x}",
            expected, actual
        )));
    }
    Ok(payload)
}
