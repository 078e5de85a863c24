//! Identity types shared by the store, the index and the indexer.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::indexing::calculate_hash;

/// Number of hex characters kept from the sha256 digest for a chunk id.
const CHUNK_ID_HEX_LEN: usize = 16;

/// Internal row id of a persisted vector record.
///
/// Assigned by the store in strictly increasing order and never reused,
/// even after compaction. A chunk that is re-embedded receives a new
/// `RecordId` while keeping its `ChunkId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl RecordId {
    pub fn value(&self) -> u64 {
        self.0
    }

    /// The id that follows this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Stable identity of an embeddable chunk.
///
/// Derived either from `(source_path, byte_range)` for file slices or from
/// `(conversation_id, turn_index)` for conversation turns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkId(String);

impl ChunkId {
    /// Wrap an already-derived identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identity of the byte range `start..end` inside `source_path`.
    pub fn for_range(source_path: &str, start: usize, end: usize) -> Self {
        Self::hashed(&format!("{source_path}:{start}-{end}"))
    }

    /// Identity of turn `turn_index` of a conversation.
    pub fn for_turn(conversation_id: &str, turn_index: usize) -> Self {
        Self::hashed(&format!("conversation/{conversation_id}#{turn_index}"))
    }

    fn hashed(key: &str) -> Self {
        let mut digest = calculate_hash(key);
        digest.truncate(CHUNK_ID_HEX_LEN);
        Self(digest)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChunkId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
