//! Ranked nearest-neighbor search over live content.
//!
//! Results come from one index snapshot per call, so retries of a
//! filtered search see a single consistent corpus. Ids are resolved back
//! to their stored records; ids tombstoned after the snapshot was taken
//! are dropped from the results.

use std::sync::Arc;

use tracing::debug;

use crate::error::{IndexError, IndexResult};
use crate::storage::{RecordStore, SourceFilter, VectorRecord};
use crate::types::{ChunkId, RecordId};
use crate::vector::{FlatIndex, IndexSnapshot, Score, VectorError, has_non_finite, normalize_in_place};

/// One ranked hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub record_id: RecordId,
    pub chunk_id: ChunkId,
    pub source_path: String,
    pub score: Score,
    pub line_range: Option<(u32, u32)>,
    pub content: String,
}

impl SearchResult {
    fn from_record(record: &VectorRecord, score: Score) -> Self {
        Self {
            record_id: record.record_id,
            chunk_id: record.chunk_id.clone(),
            source_path: record.source_path.clone(),
            score,
            line_range: record.line_range,
            content: record.content.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QueryService {
    overfetch_factor: usize,
    max_retries: usize,
    normalize: bool,
}

impl QueryService {
    pub fn new(overfetch_factor: usize, max_retries: usize, normalize: bool) -> Self {
        Self {
            overfetch_factor: overfetch_factor.max(1),
            max_retries,
            normalize,
        }
    }

    /// Returns up to `k` live records ranked by similarity to `query`.
    ///
    /// With a filter, `k * overfetch_factor` candidates are fetched and
    /// filtered; the fetch widens up to `max_retries` times when too few
    /// survive, after which fewer than `k` results are returned. An empty
    /// index yields no results rather than an error.
    pub fn search(
        &self,
        index: &IndexSnapshot,
        store: &RecordStore,
        query: &[f32],
        k: usize,
        filter: Option<&SourceFilter>,
    ) -> IndexResult<Vec<SearchResult>> {
        let query = self.prepare(query, store)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let snapshot = index.load();
        let Some(filter) = filter else {
            let hits = Self::fetch(&snapshot, &query, k)?;
            return Ok(Self::resolve(store, hits, None, k));
        };

        let mut fetch = k.saturating_mul(self.overfetch_factor);
        let mut attempt = 0;
        loop {
            let hits = Self::fetch(&snapshot, &query, fetch)?;
            let exhausted = hits.len() < fetch;
            let results = Self::resolve(store, hits, Some(filter), k);

            if results.len() >= k || exhausted || attempt >= self.max_retries {
                debug!(
                    "Filtered search returned {} of {} after {} widenings",
                    results.len(),
                    k,
                    attempt
                );
                return Ok(results);
            }

            attempt += 1;
            fetch = fetch.saturating_mul(self.overfetch_factor.max(2));
        }
    }

    fn prepare(&self, query: &[f32], store: &RecordStore) -> IndexResult<Vec<f32>> {
        store.dimension().validate_vector(query)?;
        if has_non_finite(query) {
            return Err(IndexError::InvalidVector {
                reason: "Query vector contains NaN or infinite components".to_string(),
            });
        }
        let mut query = query.to_vec();
        if self.normalize {
            normalize_in_place(&mut query);
        }
        Ok(query)
    }

    fn fetch(snapshot: &Arc<FlatIndex>, query: &[f32], k: usize) -> IndexResult<Vec<(RecordId, Score)>> {
        match snapshot.search(query, k) {
            Ok(hits) => Ok(hits),
            Err(VectorError::EmptyIndex) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn resolve(
        store: &RecordStore,
        hits: Vec<(RecordId, Score)>,
        filter: Option<&SourceFilter>,
        k: usize,
    ) -> Vec<SearchResult> {
        hits.into_iter()
            .filter_map(|(id, score)| {
                let record = store.get_record(id)?;
                if !record.is_live() {
                    return None;
                }
                if let Some(filter) = filter {
                    if !filter.matches(&record.source_path) {
                        return None;
                    }
                }
                Some(SearchResult::from_record(&record, score))
            })
            .take(k)
            .collect()
    }
}

impl Default for QueryService {
    fn default() -> Self {
        Self::new(4, 3, true)
    }
}
