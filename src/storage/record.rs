//! Persisted record types.

use serde::{Deserialize, Serialize};

use crate::types::{ChunkId, RecordId};

/// A unit of embeddable content produced by a chunk source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: ChunkId,
    /// SHA256 of `text`
    pub content_hash: String,
    pub source_path: String,
    /// UTC seconds of the source at chunking time
    pub last_modified: u64,
    /// 1-based inclusive line span within the source, when it has lines
    pub line_range: Option<(u32, u32)>,
    pub text: String,
}

/// The persisted pairing of a chunk's identity, its vector and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub record_id: RecordId,
    pub chunk_id: ChunkId,
    pub content_hash: String,
    pub source_path: String,
    pub last_modified: u64,
    pub line_range: Option<(u32, u32)>,
    pub content: String,
    pub vector: Vec<f32>,
    pub deleted: bool,
    /// UTC seconds at which the record was tombstoned
    pub deleted_at: Option<u64>,
}

impl VectorRecord {
    /// A live record for `chunk` under a freshly assigned id.
    pub fn from_chunk(record_id: RecordId, chunk: Chunk, vector: Vec<f32>) -> Self {
        Self {
            record_id,
            chunk_id: chunk.chunk_id,
            content_hash: chunk.content_hash,
            source_path: chunk.source_path,
            last_modified: chunk.last_modified,
            line_range: chunk.line_range,
            content: chunk.text,
            vector,
            deleted: false,
            deleted_at: None,
        }
    }

    pub fn is_live(&self) -> bool {
        !self.deleted
    }

    /// Copy of this record marked as deleted at `at`.
    pub fn tombstoned(&self, at: u64) -> Self {
        Self {
            deleted: true,
            deleted_at: Some(at),
            ..self.clone()
        }
    }

    /// Copy of this record restored to live.
    pub fn restored(&self) -> Self {
        Self {
            deleted: false,
            deleted_at: None,
            ..self.clone()
        }
    }
}

/// Which `source_path`s a scan or search covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceFilter {
    /// Every source whose path starts with the given string
    Prefix(String),
    /// Exactly one source
    Exact(String),
}

impl SourceFilter {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self::Prefix(prefix.into())
    }

    pub fn exact(path: impl Into<String>) -> Self {
        Self::Exact(path.into())
    }

    pub fn matches(&self, source_path: &str) -> bool {
        match self {
            Self::Prefix(prefix) => source_path.starts_with(prefix.as_str()),
            Self::Exact(path) => source_path == path,
        }
    }

    /// Smallest source path the filter can match, for ordered range scans.
    pub(crate) fn lower_bound(&self) -> &str {
        match self {
            Self::Prefix(s) | Self::Exact(s) => s,
        }
    }
}
