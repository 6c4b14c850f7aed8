//! Cosine similarity ranking.

use std::cmp::Ordering;

use ragscope_core::{Embedding, RagError, Result};

/// Cosine similarity of two vectors.
///
/// A zero-norm (or non-finite) vector scores `0.0` against anything.
/// Vectors of different dimension also score `0.0`; use [`try_score`] to
/// tell these cases apart.
pub fn score(a: &Embedding, b: &Embedding) -> f32 {
    try_score(a, b).unwrap_or(0.0)
}

/// Cosine similarity, reporting degenerate and mismatched vectors as errors.
pub fn try_score(a: &Embedding, b: &Embedding) -> Result<f32> {
    a.cosine_similarity(b)
}

/// Score every candidate against `query`, best first.
///
/// The sort is stable, so equal scores keep candidate order. Degenerate
/// candidates score `0.0`; a candidate whose dimension differs from the
/// query is an error.
pub fn rank<I: Clone>(query: &Embedding, candidates: &[(I, Embedding)]) -> Result<Vec<(I, f32)>> {
    score_all(query, candidates.iter().map(|(id, e)| (id.clone(), e)))
}

/// Like [`rank`], identifying candidates by their position in `embeddings`.
pub fn rank_indexed(query: &Embedding, embeddings: &[Embedding]) -> Result<Vec<(usize, f32)>> {
    score_all(query, embeddings.iter().enumerate())
}

fn score_all<'a, I>(
    query: &Embedding,
    candidates: impl Iterator<Item = (I, &'a Embedding)>,
) -> Result<Vec<(I, f32)>> {
    let mut scored = Vec::with_capacity(candidates.size_hint().0);

    for (id, embedding) in candidates {
        let s = match try_score(query, embedding) {
            Ok(s) => s,
            Err(RagError::DegenerateVector) => 0.0,
            Err(e) => return Err(e),
        };
        scored.push((id, s));
    }

    sort_descending(&mut scored);
    Ok(scored)
}

/// Stable sort by score, highest first.
fn sort_descending<I>(scored: &mut [(I, f32)]) {
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
}

/// The first `k` entries of a ranked list.
pub fn top_k<T>(ranked: &[T], k: usize) -> &[T] {
    &ranked[..k.min(ranked.len())]
}
