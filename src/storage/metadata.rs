//! Index-level metadata persisted beside the journal.
//!
//! Dimension and threshold are fixed when the index is created. Opening an
//! existing index reads them from here rather than from configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{IndexError, IndexResult, store_io};
use crate::indexing::get_utc_timestamp;

/// Metadata file name inside the index directory.
pub const METADATA_FILE: &str = "meta.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMetadata {
    /// Version of the metadata format
    pub version: u32,

    /// Dimension shared by every vector in the index
    pub dimension: usize,

    /// Admission similarity threshold
    pub threshold: f32,

    /// Unix timestamp when created
    pub created_at: u64,

    /// Unix timestamp when last updated
    pub updated_at: u64,

    /// Name of the embedding model that produced the vectors, if known
    pub embedding_model: Option<String>,
}

impl IndexMetadata {
    /// Current metadata version
    const CURRENT_VERSION: u32 = 1;

    /// Create new metadata with current timestamp
    pub fn new(dimension: usize, threshold: f32, embedding_model: Option<String>) -> Self {
        let now = get_utc_timestamp();
        Self {
            version: Self::CURRENT_VERSION,
            dimension,
            threshold,
            created_at: now,
            updated_at: now,
            embedding_model,
        }
    }

    /// Bump the update timestamp
    pub fn touch(&mut self) {
        self.updated_at = get_utc_timestamp();
    }

    /// Save metadata to `dir/meta.json`
    pub fn save(&self, dir: &Path) -> IndexResult<()> {
        let path = dir.join(METADATA_FILE);

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| IndexError::Serialization(format!("Failed to serialize metadata: {e}")))?;

        std::fs::create_dir_all(dir).map_err(store_io("create index directory", dir))?;
        std::fs::write(&path, json).map_err(store_io("write metadata", &path))?;
        Ok(())
    }

    /// Load metadata from `dir/meta.json`
    pub fn load(dir: &Path) -> IndexResult<Self> {
        let path = dir.join(METADATA_FILE);

        let json = std::fs::read_to_string(&path).map_err(store_io("read metadata", &path))?;

        let metadata: Self = serde_json::from_str(&json).map_err(|e| IndexError::Corrupted {
            path: path.clone(),
            reason: format!("Failed to parse metadata: {e}"),
        })?;

        // Check version compatibility
        if metadata.version > Self::CURRENT_VERSION {
            return Err(IndexError::Corrupted {
                path,
                reason: format!(
                    "Metadata version {} is newer than supported version {}",
                    metadata.version,
                    Self::CURRENT_VERSION
                ),
            });
        }

        Ok(metadata)
    }

    /// Check if metadata file exists
    pub fn exists(dir: &Path) -> bool {
        dir.join(METADATA_FILE).exists()
    }
}
