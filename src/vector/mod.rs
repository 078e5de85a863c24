//! Similarity index over fixed-dimension embeddings.
//!
//! # Architecture
//! A flat row-major buffer scanned exactly on every query. Rankings are
//! exact and reproducible, which admission decisions rely on. Removals go
//! to an exclusion set and are reclaimed on rebuild. The live index is
//! published to readers through a copy-on-write [`IndexSnapshot`].

mod flat;
mod math;
mod snapshot;
mod types;

pub use flat::{DEFAULT_PARALLEL_THRESHOLD, FlatIndex};
pub use math::{cosine_similarity, dot_product, has_non_finite, l2_norm, normalize_in_place};
pub use snapshot::IndexSnapshot;
pub use types::{DEFAULT_VECTOR_DIMENSION, Score, VectorDimension, VectorError};
