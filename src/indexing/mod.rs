pub mod embed;
pub mod file_info;
pub mod incremental;
pub mod source;
pub mod walker;

#[cfg(feature = "fastembed")]
pub use embed::FastEmbedProvider;
pub use embed::{EmbedError, EmbeddingPool, EmbeddingProvider};
pub use file_info::{calculate_hash, get_utc_timestamp, modified_utc};
pub use incremental::{ChangeKind, IncrementalIndexer, IndexSummary, PlannedChunk, ReindexPlan};
pub use source::{
    ChunkSource, ConversationSource, ConversationTurn, DEFAULT_CHUNK_LINES, FsChunkSource,
    LineChunker, source_path_key,
};
pub use walker::FileWalker;
