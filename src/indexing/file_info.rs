//! Content hashing and timestamps for change detection
//!
//! Chunks carry the SHA256 of their text so re-indexing can tell which
//! ones actually changed.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Calculate SHA256 hash of content
pub fn calculate_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Get current UTC timestamp in seconds since UNIX_EPOCH
pub fn get_utc_timestamp() -> u64 {
    Utc::now().timestamp() as u64
}

/// Modification time of `path` in UTC seconds, or now if unavailable
pub fn modified_utc(path: &Path) -> u64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(|t| DateTime::<Utc>::from(t).timestamp().max(0) as u64)
        .unwrap_or_else(|_| get_utc_timestamp())
}
