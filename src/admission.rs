//! Orthogonal admission control.
//!
//! Before a candidate vector enters the index, its single nearest live
//! neighbor is looked up. A neighbor scoring at or above the threshold
//! makes the candidate a duplicate, unless the neighbor is an earlier
//! embedding of the same chunk.
//!
//! The policy is greedy and order dependent: the first chunk seen in a
//! semantic neighborhood wins. It keeps any two live records from being
//! closer than the threshold at admission time, which is not the same as
//! producing a minimal or maximally orthogonal set.
//!
//! Admitted candidates are written through to the store and the index as
//! one unit. The store write goes first and stays marked pending until
//! the index insert succeeds; a failed insert reverts the store write.

use tracing::{debug, error, info};

use crate::error::{IndexError, IndexResult};
use crate::storage::{Chunk, RecordStore};
use crate::types::{ChunkId, RecordId};
use crate::vector::{IndexSnapshot, Score, VectorError, has_non_finite, normalize_in_place};

/// Default cosine similarity at which a candidate counts as a duplicate.
pub const DEFAULT_THRESHOLD: f32 = 0.85;

/// A chunk paired with its freshly computed embedding.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

impl Candidate {
    pub fn new(chunk: Chunk, vector: Vec<f32>) -> Self {
        Self { chunk, vector }
    }
}

/// Outcome of routing one candidate through admission.
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionDecision {
    /// Stored and indexed under `record_id`.
    Admitted {
        record_id: RecordId,
        /// Earlier record for the same chunk, now tombstoned
        superseded: Option<RecordId>,
    },
    /// Not stored; `duplicate_of` is the live chunk it collided with.
    Rejected {
        duplicate_of: ChunkId,
        score: Score,
    },
}

impl AdmissionDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted { .. })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AdmissionController {
    threshold: f32,
    /// When false every valid candidate is admitted
    enabled: bool,
    normalize: bool,
}

impl AdmissionController {
    pub fn new(threshold: f32, enabled: bool, normalize: bool) -> Self {
        Self {
            threshold,
            enabled,
            normalize,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Validates and, when configured, normalizes a vector in place.
    pub fn prepare(&self, vector: &mut [f32], store: &RecordStore) -> IndexResult<()> {
        store.dimension().validate_vector(vector)?;
        if has_non_finite(vector) {
            return Err(IndexError::InvalidVector {
                reason: "Vector contains NaN or infinite components".to_string(),
            });
        }
        if self.normalize {
            normalize_in_place(vector);
        }
        Ok(())
    }

    /// Decides on `candidate` and, if admitted, writes it through.
    ///
    /// Must only be called from the single mutation path.
    pub fn admit(
        &self,
        candidate: Candidate,
        store: &RecordStore,
        index: &IndexSnapshot,
    ) -> IndexResult<AdmissionDecision> {
        let Candidate { chunk, mut vector } = candidate;
        self.prepare(&mut vector, store)?;

        if self.enabled {
            if let Some(rejection) = self.check_novelty(&chunk.chunk_id, &vector, store, index)? {
                return Ok(rejection);
            }
        }

        self.write_through(chunk, vector, store, index)
    }

    /// Returns a rejection if the nearest live neighbor is a different
    /// chunk scoring at or above the threshold.
    fn check_novelty(
        &self,
        chunk_id: &ChunkId,
        vector: &[f32],
        store: &RecordStore,
        index: &IndexSnapshot,
    ) -> IndexResult<Option<AdmissionDecision>> {
        let nearest = match index.load().search(vector, 1) {
            Ok(results) => results.into_iter().next(),
            Err(VectorError::EmptyIndex) => None,
            Err(e) => return Err(e.into()),
        };

        let Some((neighbor_id, score)) = nearest else {
            return Ok(None);
        };
        if score.get() < self.threshold {
            return Ok(None);
        }

        let neighbor = store
            .get_record(neighbor_id)
            .ok_or_else(|| IndexError::Corrupted {
                path: store.journal_path(),
                reason: format!("Indexed record {neighbor_id} has no stored record"),
            })?;

        if &neighbor.chunk_id == chunk_id {
            debug!("Chunk {chunk_id} re-embedded with score {score} against itself, admitting");
            return Ok(None);
        }

        info!(
            "Rejected chunk {} as duplicate of {} (score {})",
            chunk_id, neighbor.chunk_id, score
        );
        Ok(Some(AdmissionDecision::Rejected {
            duplicate_of: neighbor.chunk_id.clone(),
            score,
        }))
    }

    fn write_through(
        &self,
        chunk: Chunk,
        vector: Vec<f32>,
        store: &RecordStore,
        index: &IndexSnapshot,
    ) -> IndexResult<AdmissionDecision> {
        let outcome = store.put(chunk, vector)?;
        let record_id = outcome.record.record_id;

        let inserted = index.update(|idx| {
            idx.insert(record_id, &outcome.record.vector)?;
            if let Some(old) = outcome.superseded {
                idx.remove(old);
            }
            Ok::<(), VectorError>(())
        });

        if let Err(e) = inserted {
            if let VectorError::DuplicateId(id) = &e {
                error!("Record {id} already present in the similarity index, reverting put");
            }
            store.revert_put(&outcome)?;
            return Err(e.into());
        }

        store.mark_indexed(&[record_id])?;
        debug!(
            "Admitted chunk {} as record {}",
            outcome.record.chunk_id, record_id
        );

        Ok(AdmissionDecision::Admitted {
            record_id,
            superseded: outcome.superseded,
        })
    }
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD, true, true)
    }
}
