//! Error types for the orthogonal vector index
//!
//! This module provides structured error types using thiserror for better
//! error handling and actionable error messages.

use std::path::PathBuf;
use thiserror::Error;

use crate::indexing::EmbedError;
use crate::types::{ChunkId, RecordId};
use crate::vector::VectorError;

/// Main error type for index operations
#[derive(Error, Debug)]
pub enum IndexError {
    /// Vector length disagrees with the index dimension
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Vector that cannot be scored (NaN, infinite, zero dimension)
    #[error("Invalid vector: {reason}")]
    InvalidVector { reason: String },

    /// Internal invariant violation in the mutation path
    #[error("Record {0} is already present in the similarity index")]
    DuplicateId(RecordId),

    #[error("Similarity index has no live vectors")]
    EmptyIndex,

    /// Failure reported by the embedding provider
    #[error("Failed to embed chunk '{chunk_id}': {source}")]
    Embed {
        chunk_id: ChunkId,
        source: EmbedError,
    },

    /// Durable storage failure
    #[error("Store I/O failed during {operation} on '{path}': {source}")]
    StoreIo {
        operation: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Index data at '{path}' appears to be corrupted: {reason}")]
    Corrupted { path: PathBuf, reason: String },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Failed to read source '{path}': {source}")]
    SourceRead {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl IndexError {
    /// Get a stable status code for this error type.
    ///
    /// Returns a string identifier that can be used in JSON responses
    /// for programmatic error handling.
    pub fn status_code(&self) -> String {
        match self {
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::InvalidVector { .. } => "INVALID_VECTOR",
            Self::DuplicateId(_) => "DUPLICATE_ID",
            Self::EmptyIndex => "EMPTY_INDEX",
            Self::Embed { .. } => "EMBED_ERROR",
            Self::StoreIo { .. } => "STORE_IO_ERROR",
            Self::Corrupted { .. } => "INDEX_CORRUPTED",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::SourceRead { .. } => "SOURCE_READ_ERROR",
        }
        .to_string()
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::DimensionMismatch { .. } => vec![
                "Ensure all vectors come from the same embedding model",
                "Create a new index directory to switch models",
            ],
            Self::DuplicateId(_) => vec![
                "The mutation was rolled back, the store is still consistent",
                "Run 'orthovec verify' and report the output as a bug",
            ],
            Self::Embed { .. } => vec![
                "The chunk was skipped, re-run indexing to retry it",
                "Check that the embedding model is available",
            ],
            Self::StoreIo { .. } => vec![
                "Check disk space and permissions in the index directory",
                "Retry the operation, no partial state was kept",
            ],
            Self::Corrupted { .. } => vec![
                "Move the index directory aside and re-index from scratch",
                "Check for disk errors or filesystem corruption",
            ],
            Self::Config { .. } => vec![
                "Run 'orthovec config' to inspect the effective settings",
                "Run 'orthovec init --force' to regenerate the settings file",
            ],
            Self::SourceRead { .. } => vec![
                "Check that the file exists and you have read permissions",
                "Ensure the file is valid UTF-8",
            ],
            _ => vec![],
        }
    }

    /// True for conditions callers should treat as "no results" rather than failure.
    pub fn is_empty_index(&self) -> bool {
        matches!(self, Self::EmptyIndex)
    }
}

impl From<VectorError> for IndexError {
    fn from(err: VectorError) -> Self {
        match err {
            VectorError::DimensionMismatch { expected, actual } => {
                Self::DimensionMismatch { expected, actual }
            }
            VectorError::DuplicateId(id) => Self::DuplicateId(id),
            VectorError::EmptyIndex => Self::EmptyIndex,
            VectorError::InvalidDimension { .. } | VectorError::InvalidScore { .. } => {
                Self::InvalidVector {
                    reason: err.to_string(),
                }
            }
        }
    }
}

/// Result type alias for index operations
pub type IndexResult<T> = Result<T, IndexError>;

/// Builds a `map_err` closure for I/O failures on a store path.
pub(crate) fn store_io(
    operation: &'static str,
    path: impl Into<PathBuf>,
) -> impl FnOnce(std::io::Error) -> IndexError {
    let path = path.into();
    move |source| IndexError::StoreIo {
        operation,
        path,
        source,
    }
}
