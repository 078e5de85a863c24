//! Incremental reconciliation of one source against the store.
//!
//! Re-indexing a source is split in two phases so embedding can run
//! outside the mutation path:
//!
//! 1. [`IncrementalIndexer::plan`] diffs the current chunk set against the
//!    live records of the source and lists only the chunks that need an
//!    embedding (new ids, or known ids whose content hash changed).
//! 2. [`IncrementalIndexer::apply`] tombstones chunks that disappeared and
//!    routes each fresh embedding through admission.
//!
//! Unchanged chunks are never re-embedded.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::admission::{AdmissionController, AdmissionDecision, Candidate};
use crate::error::{IndexError, IndexResult};
use crate::indexing::EmbedError;
use crate::storage::{Chunk, RecordStore, SourceFilter, VectorRecord};
use crate::types::{ChunkId, RecordId};
use crate::vector::IndexSnapshot;

/// Counts reported after reconciling one source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexSummary {
    pub inserted: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
    pub rejected_as_duplicate: usize,
    pub embed_failures: usize,
}

impl IndexSummary {
    /// True when the call left the store untouched.
    pub fn is_noop(&self) -> bool {
        self.inserted == 0 && self.updated == 0 && self.removed == 0
    }

    pub fn merge(&mut self, other: &IndexSummary) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.removed += other.removed;
        self.unchanged += other.unchanged;
        self.rejected_as_duplicate += other.rejected_as_duplicate;
        self.embed_failures += other.embed_failures;
    }
}

/// Why a chunk needs an embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    New,
    /// Content changed under a known chunk id
    Changed { previous: RecordId },
}

#[derive(Debug, Clone)]
pub struct PlannedChunk {
    pub chunk: Chunk,
    pub kind: ChangeKind,
}

/// Minimal delta for one source.
#[derive(Debug, Clone, Default)]
pub struct ReindexPlan {
    pub source_path: String,
    /// Live chunks no longer produced by the source
    pub removed: Vec<ChunkId>,
    pub work: Vec<PlannedChunk>,
    pub unchanged: usize,
}

impl ReindexPlan {
    /// Texts to embed, aligned with `work`.
    pub fn texts(&self) -> Vec<String> {
        self.work.iter().map(|p| p.chunk.text.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IncrementalIndexer;

impl IncrementalIndexer {
    /// Diffs `current` chunks of `source_path` against its live records.
    pub fn plan(source_path: &str, current: Vec<Chunk>, store: &RecordStore) -> ReindexPlan {
        let existing: HashMap<ChunkId, Arc<VectorRecord>> = store
            .scan_matching(SourceFilter::exact(source_path))
            .map(|record| (record.chunk_id.clone(), record))
            .collect();

        let mut seen = HashSet::with_capacity(current.len());
        let mut plan = ReindexPlan {
            source_path: source_path.to_string(),
            ..Default::default()
        };

        for chunk in current {
            if !seen.insert(chunk.chunk_id.clone()) {
                warn!(
                    "Source {source_path} produced chunk {} twice, keeping the first",
                    chunk.chunk_id
                );
                continue;
            }
            match existing.get(&chunk.chunk_id) {
                Some(record) if record.content_hash == chunk.content_hash => {
                    plan.unchanged += 1;
                }
                Some(record) => plan.work.push(PlannedChunk {
                    chunk,
                    kind: ChangeKind::Changed {
                        previous: record.record_id,
                    },
                }),
                None => plan.work.push(PlannedChunk {
                    chunk,
                    kind: ChangeKind::New,
                }),
            }
        }

        let mut removed: Vec<&Arc<VectorRecord>> = existing
            .values()
            .filter(|record| !seen.contains(&record.chunk_id))
            .collect();
        removed.sort_by_key(|record| record.record_id);
        plan.removed = removed.into_iter().map(|r| r.chunk_id.clone()).collect();

        debug!(
            "Plan for {}: {} to embed, {} removed, {} unchanged",
            source_path,
            plan.work.len(),
            plan.removed.len(),
            plan.unchanged
        );
        plan
    }

    /// Applies `plan` given one embedding result per planned chunk.
    ///
    /// Removals are applied first, so a chunk that moved is not rejected
    /// against its own stale copy. A per-chunk embedding failure skips that
    /// chunk; store failures abort the rest of the plan.
    pub fn apply(
        plan: ReindexPlan,
        embeddings: Vec<Result<Vec<f32>, EmbedError>>,
        controller: &AdmissionController,
        store: &RecordStore,
        index: &IndexSnapshot,
    ) -> IndexResult<IndexSummary> {
        let mut summary = IndexSummary {
            unchanged: plan.unchanged,
            ..Default::default()
        };

        for chunk_id in &plan.removed {
            if Self::tombstone_chunk(chunk_id, store, index)? {
                summary.removed += 1;
            }
        }

        for (planned, embedding) in plan.work.into_iter().zip(embeddings) {
            let chunk_id = planned.chunk.chunk_id.clone();
            let vector = match embedding {
                Ok(vector) => vector,
                Err(e) => {
                    warn!("Skipping chunk {chunk_id} of {}: {e}", plan.source_path);
                    summary.embed_failures += 1;
                    continue;
                }
            };

            let decision = match controller.admit(Candidate::new(planned.chunk, vector), store, index) {
                Ok(decision) => decision,
                Err(e @ (IndexError::DimensionMismatch { .. } | IndexError::InvalidVector { .. })) => {
                    warn!("Skipping chunk {chunk_id} of {}: {e}", plan.source_path);
                    summary.embed_failures += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            match (decision, planned.kind) {
                (AdmissionDecision::Admitted { .. }, ChangeKind::New) => summary.inserted += 1,
                (AdmissionDecision::Admitted { .. }, ChangeKind::Changed { .. }) => {
                    summary.updated += 1
                }
                (AdmissionDecision::Rejected { .. }, kind) => {
                    summary.rejected_as_duplicate += 1;
                    // The old text is gone from the source
                    if let ChangeKind::Changed { .. } = kind {
                        if Self::tombstone_chunk(&chunk_id, store, index)? {
                            summary.removed += 1;
                        }
                    }
                }
            }
        }

        info!(
            "Indexed {}: {} inserted, {} updated, {} removed, {} unchanged, {} duplicates, {} failures",
            plan.source_path,
            summary.inserted,
            summary.updated,
            summary.removed,
            summary.unchanged,
            summary.rejected_as_duplicate,
            summary.embed_failures
        );
        Ok(summary)
    }

    /// Tombstones every live record of `source_path`.
    pub fn remove_source(
        source_path: &str,
        store: &RecordStore,
        index: &IndexSnapshot,
    ) -> IndexResult<usize> {
        let chunk_ids: Vec<ChunkId> = store
            .scan_matching(SourceFilter::exact(source_path))
            .map(|record| record.chunk_id.clone())
            .collect();

        let mut removed = 0;
        for chunk_id in &chunk_ids {
            if Self::tombstone_chunk(chunk_id, store, index)? {
                removed += 1;
            }
        }
        info!("Removed {removed} records of {source_path}");
        Ok(removed)
    }

    fn tombstone_chunk(
        chunk_id: &ChunkId,
        store: &RecordStore,
        index: &IndexSnapshot,
    ) -> IndexResult<bool> {
        match store.tombstone(chunk_id)? {
            Some(record_id) => {
                index.update(|idx| idx.remove(record_id));
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
