//! Exact flat inner-product index.
//!
//! Vectors live in one contiguous row-major buffer. Search scans every
//! row, which is O(n·d) per query and gives exact, reproducible rankings
//! at the corpus sizes this crate targets.
//!
//! # Removal
//! Rows are never erased in place. `remove` records the id in an
//! exclusion set that search consults; the buffer only shrinks when the
//! index is rebuilt from a fresh snapshot of live vectors.
//!
//! # Ranking
//! Results are ordered by descending score, ties broken by ascending
//! `RecordId`.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};

use rayon::prelude::*;

use crate::types::RecordId;
use crate::vector::math::dot_product;
use crate::vector::types::{Score, VectorDimension, VectorError};

/// Rows scanned per rayon task in parallel search.
const PARALLEL_CHUNK_ROWS: usize = 2048;

/// Default row count above which search fans out across threads.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 16_384;

/// A scored row, ordered so that "greater" means "ranks higher".
#[derive(Debug, Clone, Copy)]
struct Candidate {
    score: f32,
    id: RecordId,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            // lower id ranks higher on equal scores
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Keeps the best `k` candidates seen so far.
fn push_bounded(heap: &mut BinaryHeap<Reverse<Candidate>>, candidate: Candidate, k: usize) {
    if heap.len() < k {
        heap.push(Reverse(candidate));
    } else if let Some(Reverse(worst)) = heap.peek() {
        if candidate > *worst {
            heap.pop();
            heap.push(Reverse(candidate));
        }
    }
}

/// Flat inner-product similarity index with an exclusion set.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dimension: VectorDimension,

    /// Row order of the buffer.
    ids: Vec<RecordId>,

    /// Row-major vector buffer, `ids.len() * dimension` floats.
    data: Vec<f32>,

    /// Row position of every physically present id.
    positions: HashMap<RecordId, usize>,

    /// Ids logically removed but still present in the buffer.
    removed: HashSet<RecordId>,

    parallel_threshold: usize,
}

impl FlatIndex {
    /// Creates an empty index.
    pub fn new(dimension: VectorDimension) -> Self {
        Self {
            dimension,
            ids: Vec::new(),
            data: Vec::new(),
            positions: HashMap::new(),
            removed: HashSet::new(),
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
        }
    }

    /// Sets the row count above which search runs on the rayon pool.
    #[must_use]
    pub fn with_parallel_threshold(mut self, rows: usize) -> Self {
        self.parallel_threshold = rows.max(1);
        self
    }

    /// Builds a fresh index from a snapshot of live vectors.
    pub fn from_live<I, V>(
        dimension: VectorDimension,
        parallel_threshold: usize,
        live_vectors: I,
    ) -> Result<Self, VectorError>
    where
        I: IntoIterator<Item = (RecordId, V)>,
        V: AsRef<[f32]>,
    {
        let mut index = Self::new(dimension).with_parallel_threshold(parallel_threshold);
        for (id, vector) in live_vectors {
            index.insert(id, vector.as_ref())?;
        }
        Ok(index)
    }

    /// Adds a vector under its store-assigned id.
    ///
    /// Ids that were removed but not yet rebuilt away still occupy a row,
    /// so re-inserting them is also a `DuplicateId`.
    pub fn insert(&mut self, id: RecordId, vector: &[f32]) -> Result<(), VectorError> {
        self.dimension.validate_vector(vector)?;
        if self.positions.contains_key(&id) {
            return Err(VectorError::DuplicateId(id));
        }

        self.positions.insert(id, self.ids.len());
        self.ids.push(id);
        self.data.extend_from_slice(vector);
        Ok(())
    }

    /// Logically removes `id` from query results.
    ///
    /// Returns true if the id was live before the call.
    pub fn remove(&mut self, id: RecordId) -> bool {
        if !self.positions.contains_key(&id) {
            return false;
        }
        self.removed.insert(id)
    }

    /// Replaces the buffer wholesale and clears the exclusion set.
    pub fn rebuild<I, V>(&mut self, live_vectors: I) -> Result<(), VectorError>
    where
        I: IntoIterator<Item = (RecordId, V)>,
        V: AsRef<[f32]>,
    {
        *self = Self::from_live(self.dimension, self.parallel_threshold, live_vectors)?;
        Ok(())
    }

    /// Returns up to `k` live ids ranked by descending inner product.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(RecordId, Score)>, VectorError> {
        self.dimension.validate_vector(query)?;
        if self.live_len() == 0 {
            return Err(VectorError::EmptyIndex);
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let heap = if self.ids.len() >= self.parallel_threshold {
            self.scan_parallel(query, k)
        } else {
            self.scan_rows(0, self.ids.len(), query, k)
        };

        let mut ranked: Vec<Candidate> = heap.into_iter().map(|Reverse(c)| c).collect();
        ranked.sort_by(|a, b| b.cmp(a));

        ranked
            .into_iter()
            .map(|c| Score::new(c.score).map(|score| (c.id, score)))
            .collect()
    }

    fn scan_rows(
        &self,
        start: usize,
        end: usize,
        query: &[f32],
        k: usize,
    ) -> BinaryHeap<Reverse<Candidate>> {
        let dim = self.dimension.get();
        let mut heap = BinaryHeap::with_capacity(k + 1);
        for row in start..end {
            let id = self.ids[row];
            if self.removed.contains(&id) {
                continue;
            }
            let vector = &self.data[row * dim..(row + 1) * dim];
            let score = dot_product(query, vector);
            if score.is_nan() {
                continue;
            }
            push_bounded(&mut heap, Candidate { score, id }, k);
        }
        heap
    }

    fn scan_parallel(&self, query: &[f32], k: usize) -> BinaryHeap<Reverse<Candidate>> {
        let rows = self.ids.len();
        let chunks = rows.div_ceil(PARALLEL_CHUNK_ROWS);

        (0..chunks)
            .into_par_iter()
            .map(|chunk| {
                let start = chunk * PARALLEL_CHUNK_ROWS;
                let end = (start + PARALLEL_CHUNK_ROWS).min(rows);
                self.scan_rows(start, end, query, k)
            })
            .reduce(BinaryHeap::new, |mut acc, local| {
                for Reverse(candidate) in local {
                    push_bounded(&mut acc, candidate, k);
                }
                acc
            })
    }

    /// True if `id` is present and not excluded.
    pub fn contains(&self, id: RecordId) -> bool {
        self.positions.contains_key(&id) && !self.removed.contains(&id)
    }

    /// Stored vector for a live id.
    pub fn vector(&self, id: RecordId) -> Option<&[f32]> {
        if self.removed.contains(&id) {
            return None;
        }
        let dim = self.dimension.get();
        self.positions
            .get(&id)
            .map(|&row| &self.data[row * dim..(row + 1) * dim])
    }

    /// Ids visible to search, in buffer order.
    pub fn live_ids(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.ids
            .iter()
            .copied()
            .filter(|id| !self.removed.contains(id))
    }

    /// Number of ids visible to search.
    pub fn live_len(&self) -> usize {
        self.ids.len() - self.removed.len()
    }

    /// Number of rows physically held, including excluded ones.
    pub fn physical_len(&self) -> usize {
        self.ids.len()
    }

    /// Size of the exclusion set.
    pub fn excluded_len(&self) -> usize {
        self.removed.len()
    }

    /// True once the exclusion set exceeds `ratio` of the live count.
    pub fn needs_rebuild(&self, ratio: f32) -> bool {
        let excluded = self.excluded_len();
        excluded > 0 && excluded as f32 > ratio * self.live_len() as f32
    }

    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }
}
