//! Content fingerprints
//!
//! A fingerprint identifies what a job does (name + arguments), not which
//! instance it is, so two jobs built from the same inputs dedupe each other.

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 over the canonical JSON of `[job_name, payload]`
///
/// `serde_json` objects are key-ordered maps, so the encoding is stable
/// regardless of insertion order.
pub fn compute(job_name: Option<&str>, payload: &Value) -> String {
    let canonical = json!([job_name, payload]);

    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    hex::encode(hasher.finalize())
}
