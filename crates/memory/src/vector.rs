//! Vector similarity and nearest-neighbour ranking.
//!
//! Pure-Rust implementations of:
//! - Cosine similarity
//! - Similarity scores mapped into `[0, 1]`
//! - Brute-force top-k ranking with a stable tie-break

use buddy_core::{IndexHit, IndexedMemory};
use std::cmp::Ordering;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if either vector is zero-length or empty.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Map cosine similarity onto `[0, 1]`: `(1 + cos) / 2`.
pub fn similarity_score(a: &[f32], b: &[f32]) -> f32 {
    ((1.0 + cosine_similarity(a, b)) / 2.0).clamp(0.0, 1.0)
}

/// Rank `memories` against `query` and keep the best `k`.
///
/// Descending score; equal scores fall back to ascending turn id so the
/// result is the same for the same index contents.
pub fn rank_nearest<'a, I>(memories: I, query: &[f32], k: usize) -> Vec<IndexHit>
where
    I: IntoIterator<Item = &'a IndexedMemory>,
{
    if k == 0 {
        return Vec::new();
    }

    let mut scored: Vec<IndexHit> = memories
        .into_iter()
        .map(|memory| IndexHit {
            score: similarity_score(&memory.embedding, query),
            memory: memory.clone(),
        })
        .collect();

    scored.sort_by(compare_hits);
    scored.truncate(k);
    scored
}

/// Ordering used by every index: best score first, then oldest turn id.
/// A NaN score ranks below every real one.
pub fn compare_hits(a: &IndexHit, b: &IndexHit) -> Ordering {
    rank_key(b.score)
        .total_cmp(&rank_key(a.score))
        .then_with(|| a.memory.turn_id.cmp(&b.memory.turn_id))
}

fn rank_key(score: f32) -> f32 {
    if score.is_nan() { f32::NEG_INFINITY } else { score }
}

/// Serialize an embedding as little-endian f32 bytes.
pub fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Inverse of [`embedding_to_blob`]. Trailing partial floats are ignored.
pub fn blob_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
