//! Embedder trait and vector utilities.
//!
//! [`Embedder`] is the narrow seam between the index and whatever turns
//! text into vectors. HTTP-backed implementations (Ollama, OpenAI) and the
//! retry/timeout decorator live in the `uridx` app crate; this module only
//! holds the trait plus pure helpers for similarity and BLOB encoding.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

/// Turns text into a fixed-length vector.
///
/// Every call for the same index must return vectors of the same length.
/// Failures are reported as [`crate::Error::EmbeddingUnavailable`],
/// [`crate::Error::EmbeddingRejected`] or [`crate::Error::EmbeddingTimeout`].
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier, recorded with the index (e.g. `"nomic-embed-text"`).
    fn model_name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[async_trait]
impl<E: Embedder + ?Sized> Embedder for Arc<E> {
    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        (**self).embed(text).await
    }
}

/// Encode a vector as little-endian `f32` bytes (`len × 4` bytes).
///
/// ```rust
/// use uridx_core::embedding::{blob_to_vec, vec_to_blob};
///
/// let v = vec![0.5f32, -1.0];
/// assert_eq!(blob_to_vec(&vec_to_blob(&v)), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Inverse of [`vec_to_blob`]. Trailing bytes that do not form a full
/// `f32` are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity of two vectors, clamped to `[-1.0, 1.0]`.
///
/// Returns `0.0` when either vector has zero norm, when the lengths
/// differ, or when the inputs are empty. Accumulates in `f64` so long
/// vectors of small components do not lose the result to rounding.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let sim = dot / (norm_a.sqrt() * norm_b.sqrt());
    if sim.is_nan() {
        return 0.0;
    }
    sim.clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_roundtrip_preserves_values() {
        let v = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&v)), v);
        assert_eq!(vec_to_blob(&v).len(), 20);
    }

    #[test]
    fn identical_vectors_score_one() {
        let v = [0.3f32, 2.0, -7.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn orthogonal_and_opposite() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn zero_vector_scores_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0, 0.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn mismatched_or_empty_inputs_score_zero() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn scores_stay_in_bounds() {
        let samples: [&[f32]; 4] = [
            &[1e-20, 1e-20, 1e-20],
            &[3.4e38, -3.4e38, 1.0],
            &[0.1, 0.2, 0.3],
            &[-5.0, 0.0, 5.0],
        ];
        for a in samples {
            for b in samples {
                let s = cosine_similarity(a, b);
                assert!((-1.0..=1.0).contains(&s), "{s} out of range for {a:?} · {b:?}");
            }
        }
    }
}
