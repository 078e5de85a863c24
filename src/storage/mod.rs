//! Durable storage for vector records.
//!
//! An index directory holds `meta.json` with the fixed index parameters
//! and `records.log`, the checksummed journal every mutation is appended
//! to. The similarity index can always be rebuilt from the live records
//! in the journal alone.

pub mod journal;
pub mod metadata;
pub mod record;
pub mod store;

pub use journal::{Journal, JournalEntry};
pub use metadata::{IndexMetadata, METADATA_FILE};
pub use record::{Chunk, SourceFilter, VectorRecord};
pub use store::{JOURNAL_FILE, LiveScan, PutOutcome, RecordStore, StoreOptions};
