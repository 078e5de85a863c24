//! Small numeric kernels used by the flat index and the analysis report.

/// Vectors whose L2 norm is within this distance of 1.0 are treated as
/// already normalized and left untouched.
const UNIT_NORM_TOLERANCE: f32 = 1e-4;

/// Inner product of two equal-length vectors.
#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Euclidean length of a vector.
#[inline]
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Calculates cosine similarity between two vectors.
///
/// Returns 0.0 when either vector has zero length.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product(a, b) / (norm_a * norm_b)
    }
}

/// Scales `v` to unit length in place.
///
/// Zero vectors and vectors already within tolerance of unit length are
/// left as they are, so exact inputs keep their exact inner products.
/// Returns true if the vector was rescaled.
pub fn normalize_in_place(v: &mut [f32]) -> bool {
    let norm = l2_norm(v);
    if norm == 0.0 || (norm - 1.0).abs() <= UNIT_NORM_TOLERANCE {
        return false;
    }
    for value in v.iter_mut() {
        *value /= norm;
    }
    true
}

/// Returns true if any component is NaN or infinite.
pub fn has_non_finite(v: &[f32]) -> bool {
    v.iter().any(|x| !x.is_finite())
}
