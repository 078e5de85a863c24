//! Orthogonality report over live records.
//!
//! Computes pairwise cosine similarity across a sample of the live corpus
//! to show how redundant it still is. Pairs are scored in parallel; the
//! reduction is order independent, so the report is deterministic.

use std::fmt;
use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;

use crate::storage::VectorRecord;
use crate::types::ChunkId;
use crate::vector::cosine_similarity;

/// Default cap on the number of records sampled.
pub const DEFAULT_MAX_SAMPLE: usize = 1000;

/// Similarity below which a pair counts as clearly distinct.
const LOW_SIMILARITY: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Interpretation {
    Excellent,
    Good,
    Fair,
    Poor,
    VeryPoor,
    /// Fewer than two records
    InsufficientData,
}

impl Interpretation {
    fn from_score(score: f32) -> Self {
        if score > 0.8 {
            Self::Excellent
        } else if score > 0.6 {
            Self::Good
        } else if score > 0.4 {
            Self::Fair
        } else if score > 0.2 {
            Self::Poor
        } else {
            Self::VeryPoor
        }
    }
}

impl fmt::Display for Interpretation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Excellent => "excellent: content is highly orthogonal",
            Self::Good => "good: little redundancy",
            Self::Fair => "fair: some redundant content",
            Self::Poor => "poor: much redundant content",
            Self::VeryPoor => "very poor: content is largely redundant",
            Self::InsufficientData => "not enough records to compare",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimilarPair {
    pub first: ChunkId,
    pub second: ChunkId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrthogonalityReport {
    pub sample_size: usize,
    pub pair_count: usize,
    pub mean_similarity: f32,
    pub max_similarity: f32,
    pub min_similarity: f32,
    pub std_similarity: f32,
    pub most_similar_pair: Option<SimilarPair>,
    /// Pairs strictly above the threshold
    pub above_threshold: usize,
    /// Pairs in `[0.5, threshold]`
    pub moderate: usize,
    /// Pairs below 0.5
    pub low: usize,
    pub threshold: f32,
    /// `1 - mean_similarity`
    pub orthogonality_score: f32,
    pub interpretation: Interpretation,
}

/// Running totals for a set of pairs.
#[derive(Debug, Clone, Copy)]
struct PairStats {
    count: usize,
    sum: f64,
    sum_sq: f64,
    min: f32,
    max: f32,
    best: Option<(usize, usize)>,
    above: usize,
    moderate: usize,
    low: usize,
}

impl PairStats {
    fn empty() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            sum_sq: 0.0,
            min: f32::INFINITY,
            max: f32::NEG_INFINITY,
            best: None,
            above: 0,
            moderate: 0,
            low: 0,
        }
    }

    fn add(mut self, i: usize, j: usize, sim: f32, threshold: f32) -> Self {
        self.count += 1;
        self.sum += f64::from(sim);
        self.sum_sq += f64::from(sim) * f64::from(sim);
        self.min = self.min.min(sim);
        if sim > self.max || (sim == self.max && self.best.is_none_or(|b| (i, j) < b)) {
            self.max = sim;
            self.best = Some((i, j));
        }
        if sim > threshold {
            self.above += 1;
        } else if sim >= LOW_SIMILARITY {
            self.moderate += 1;
        } else {
            self.low += 1;
        }
        self
    }

    fn merge(self, other: Self) -> Self {
        let (max, best) = match (self.best, other.best) {
            (None, _) => (other.max, other.best),
            (_, None) => (self.max, self.best),
            (Some(a), Some(b)) => {
                if other.max > self.max || (other.max == self.max && b < a) {
                    (other.max, other.best)
                } else {
                    (self.max, self.best)
                }
            }
        };
        Self {
            count: self.count + other.count,
            sum: self.sum + other.sum,
            sum_sq: self.sum_sq + other.sum_sq,
            min: self.min.min(other.min),
            max,
            best,
            above: self.above + other.above,
            moderate: self.moderate + other.moderate,
            low: self.low + other.low,
        }
    }
}

/// Builds the report from `records`, comparing at most `max_sample` of
/// them (lowest record ids first).
pub fn analyze(
    records: &[Arc<VectorRecord>],
    threshold: f32,
    max_sample: usize,
) -> OrthogonalityReport {
    let mut sample: Vec<&Arc<VectorRecord>> = records.iter().collect();
    sample.sort_by_key(|r| r.record_id);
    sample.truncate(max_sample);
    let n = sample.len();

    let stats = (0..n)
        .into_par_iter()
        .map(|i| {
            let mut local = PairStats::empty();
            for j in (i + 1)..n {
                let sim = cosine_similarity(&sample[i].vector, &sample[j].vector);
                local = local.add(i, j, sim, threshold);
            }
            local
        })
        .reduce(PairStats::empty, PairStats::merge);

    if stats.count == 0 {
        return OrthogonalityReport {
            sample_size: n,
            pair_count: 0,
            mean_similarity: 0.0,
            max_similarity: 0.0,
            min_similarity: 0.0,
            std_similarity: 0.0,
            most_similar_pair: None,
            above_threshold: 0,
            moderate: 0,
            low: 0,
            threshold,
            orthogonality_score: 1.0,
            interpretation: Interpretation::InsufficientData,
        };
    }

    let count = stats.count as f64;
    let mean = stats.sum / count;
    let variance = (stats.sum_sq / count - mean * mean).max(0.0);
    let mean = mean as f32;
    let orthogonality_score = 1.0 - mean;

    OrthogonalityReport {
        sample_size: n,
        pair_count: stats.count,
        mean_similarity: mean,
        max_similarity: stats.max,
        min_similarity: stats.min,
        std_similarity: variance.sqrt() as f32,
        most_similar_pair: stats.best.map(|(i, j)| SimilarPair {
            first: sample[i].chunk_id.clone(),
            second: sample[j].chunk_id.clone(),
        }),
        above_threshold: stats.above,
        moderate: stats.moderate,
        low: stats.low,
        threshold,
        orthogonality_score,
        interpretation: Interpretation::from_score(orthogonality_score),
    }
}
