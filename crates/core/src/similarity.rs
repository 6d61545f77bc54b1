//! Cosine similarity and brute-force ranking over an in-memory embedding table.
//!
//! Every ranking here is O(N·D). That is the scaling ceiling of the local tier and is fine
//! for a blog-sized corpus of hundreds to low thousands of posts.

use crate::models::EmbeddingRecord;

pub fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|value| value * value).sum::<f32>().sqrt()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Cosine similarity of `a` and `b`.
///
/// Returns 0 for empty inputs, mismatched lengths, a zero norm on either side, or any
/// non-finite result. NaN never leaks out of this function.
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    cosine_with_norms(a, l2_norm(a), b, l2_norm(b))
}

/// Same contract as [`cosine`] but reuses norms that were computed earlier.
pub fn cosine_with_norms(a: &[f32], a_norm: f32, b: &[f32], b_norm: f32) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    if a_norm == 0.0 || b_norm == 0.0 || !a_norm.is_finite() || !b_norm.is_finite() {
        return 0.0;
    }
    let score = f64::from(dot(a, b)) / (f64::from(a_norm) * f64::from(b_norm));
    if score.is_finite() {
        score
    } else {
        0.0
    }
}

/// Scores every record against `query` and returns the best `top_k` as `(id, score)`.
///
/// Equal scores keep table order.
pub fn rank_by_query(query: &[f32], table: &[EmbeddingRecord], top_k: usize) -> Vec<(String, f64)> {
    let query_norm = l2_norm(query);
    rank(query, query_norm, table, None, top_k)
}

/// Ranks every other document by similarity to one document's own vector.
pub fn pairwise_rank(
    target: &[f32],
    target_norm: f32,
    table: &[EmbeddingRecord],
    exclude_id: &str,
    top_k: usize,
) -> Vec<(String, f64)> {
    rank(target, target_norm, table, Some(exclude_id), top_k)
}

fn rank(
    query: &[f32],
    query_norm: f32,
    table: &[EmbeddingRecord],
    exclude_id: Option<&str>,
    top_k: usize,
) -> Vec<(String, f64)> {
    let mut scored: Vec<(String, f64)> = table
        .iter()
        .filter(|record| exclude_id != Some(record.id.as_str()))
        .map(|record| {
            let score = cosine_with_norms(query, query_norm, &record.vector, record.norm);
            (record.id.clone(), score)
        })
        .collect();

    scored.sort_by(|left, right| right.1.total_cmp(&left.1));
    scored.truncate(top_k);
    scored
}
