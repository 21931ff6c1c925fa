//! Numeric primitives over embedding vectors.
//!
//! Every function here is total: length mismatches and zero vectors degrade
//! to sentinel values (0.0 similarity, `None` averages) instead of errors,
//! because missing or partial embeddings are a steady-state condition.
//! Sums accumulate in f64 and are returned as f32.

/// An embedding. All-zero means "absent".
pub type Vector = Vec<f32>;

/// Dot product. 0.0 unless both slices are non-empty and the same length.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    a.iter()
        .zip(b)
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum::<f64>() as f32
}

pub fn sum_of_squares(v: &[f32]) -> f32 {
    sum_of_squares_f64(v) as f32
}

fn sum_of_squares_f64(v: &[f32]) -> f64 {
    v.iter().map(|x| f64::from(*x) * f64::from(*x)).sum()
}

pub fn l2_norm(v: &[f32]) -> f32 {
    sum_of_squares_f64(v).sqrt() as f32
}

/// Scale to unit length. A zero vector is returned unchanged.
pub fn normalize(v: &[f32]) -> Vector {
    let sq = sum_of_squares_f64(v);
    if sq == 0.0 {
        return v.to_vec();
    }
    let inv = 1.0 / sq.sqrt();
    v.iter().map(|x| (f64::from(*x) * inv) as f32).collect()
}

/// True when the vector is non-empty and has at least one non-zero component.
pub fn is_valid(v: &[f32]) -> bool {
    v.iter().any(|x| *x != 0.0)
}

/// Cosine similarity clamped to [-1, 1].
///
/// Returns exactly 0.0 when the lengths differ or either side is a zero
/// vector; the division is never attempted in that case.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let sa = sum_of_squares_f64(a);
    let sb = sum_of_squares_f64(b);
    if sa == 0.0 || sb == 0.0 {
        return 0.0;
    }
    let d: f64 = a
        .iter()
        .zip(b)
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum();
    (d / (sa.sqrt() * sb.sqrt())).clamp(-1.0, 1.0) as f32
}

/// Element-wise mean. `None` for an empty list or inconsistent lengths.
pub fn average<V: AsRef<[f32]>>(vectors: &[V]) -> Option<Vector> {
    let first = vectors.first()?.as_ref();
    let dim = first.len();
    if vectors.iter().any(|v| v.as_ref().len() != dim) {
        return None;
    }

    let mut acc = vec![0.0f64; dim];
    for v in vectors {
        for (slot, x) in acc.iter_mut().zip(v.as_ref()) {
            *slot += f64::from(*x);
        }
    }
    let n = vectors.len() as f64;
    Some(acc.into_iter().map(|s| (s / n) as f32).collect())
}

/// Cosine similarity of `query` against each candidate, aligned by index.
pub fn batch_cosine_similarity<V: AsRef<[f32]>>(query: &[f32], candidates: &[V]) -> Vec<f32> {
    candidates
        .iter()
        .map(|c| cosine_similarity(query, c.as_ref()))
        .collect()
}

/// Truncate or zero-pad a producer's vector to the shared dimension.
pub fn fit_dimension(mut v: Vector, dim: usize) -> Vector {
    v.resize(dim, 0.0);
    v
}
