/// The main library module for orthovec
pub mod admission;
pub mod analysis;
pub mod config;
pub mod display;
pub mod engine;
pub mod error;
pub mod indexing;
pub mod query;
pub mod storage;
pub mod types;
pub mod vector;

// Explicit exports for better API clarity
pub use admission::{AdmissionController, AdmissionDecision, Candidate, DEFAULT_THRESHOLD};
pub use analysis::{Interpretation, OrthogonalityReport};
pub use config::Settings;
pub use engine::{BulkSummary, ConsistencyReport, IndexStats, OrthoIndex};
pub use error::{IndexError, IndexResult};
pub use indexing::{
    ChunkSource, ConversationSource, EmbedError, EmbeddingProvider, FsChunkSource, IndexSummary,
    LineChunker, calculate_hash,
};
pub use query::{QueryService, SearchResult};
pub use storage::{Chunk, IndexMetadata, RecordStore, SourceFilter, VectorRecord};
pub use types::{ChunkId, RecordId};
pub use vector::{FlatIndex, Score, VectorDimension, VectorError};
