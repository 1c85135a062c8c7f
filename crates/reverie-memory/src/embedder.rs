//! The embedding seam.
//!
//! The memory engine treats embedding as a black box: text in, fixed-length
//! vector out.  Network-backed implementations live in `reverie-runtime`;
//! this module only defines the [`Embedder`] trait, the cosine similarity
//! used by default, and [`HashingEmbedder`], a deterministic offline
//! embedder for tests and air-gapped evaluation runs.

use async_trait::async_trait;
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("cannot embed empty text")]
    EmptyInput,
    #[error("embedding backend failed: {0}")]
    Backend(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Embedder trait
// ─────────────────────────────────────────────────────────────────────────────

/// Turns text into a vector of a dimension that is fixed per deployment.
///
/// Implementations must be deterministic for identical input.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        cosine_similarity(a, b)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cosine similarity
// ─────────────────────────────────────────────────────────────────────────────

/// Compute the cosine similarity between two equal-length vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` if either vector has zero norm
/// or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HashingEmbedder
// ─────────────────────────────────────────────────────────────────────────────

/// Bag-of-words feature hashing into a fixed number of buckets.
///
/// Text is lower-cased and split on every non-alphanumeric character; each
/// token increments the bucket chosen by its FNV-1a hash and the result is
/// L2-normalised.  Texts that share vocabulary therefore score a positive
/// cosine similarity, which is all the retrieval layer needs offline.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub const DEFAULT_DIMENSION: usize = 256;

    /// `dimension` is raised to at least 1.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn bucket(&self, token: &str) -> usize {
        (fnv1a(token.as_bytes()) % self.dimension as u64) as usize
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMENSION)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        if text.trim().is_empty() {
            return Err(EmbedError::EmptyInput);
        }
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            vector[self.bucket(&token.to_lowercase())] += 1.0;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(PRIME))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── cosine_similarity ────────────────────────────────────────────────────

    #[test]
    fn cosine_identical_vectors_is_one() {
        let v = vec![1.0f32, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_vectors_is_zero() {
        let a = vec![1.0f32, 0.0, 0.0];
        let b = vec![0.0f32, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_opposite_vectors_is_minus_one() {
        let a = vec![1.0f32, 0.0];
        let b = vec![-1.0f32, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_zero_or_mismatched_vectors_return_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
    }

    // ── HashingEmbedder ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn hashing_embedder_is_deterministic_and_normalised() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed("Successful lever sequence 2-3-1").await.unwrap();
        let b = embedder.embed("Successful lever sequence 2-3-1").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn hashing_embedder_ignores_case_and_punctuation() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed("Maze, NAVIGATION!").await.unwrap();
        let b = embedder.embed("maze navigation").await.unwrap();
        assert!((embedder.similarity(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn shared_vocabulary_scores_higher_than_disjoint() {
        let embedder = HashingEmbedder::default();
        let query = embedder.embed("successful lever sequence puzzle solution").await.unwrap();
        let related = embedder.embed("Successful lever sequence 2-3-1 at attempt 4").await.unwrap();
        let unrelated = embedder.embed("goblin tavern music").await.unwrap();
        assert!(embedder.similarity(&query, &related) > embedder.similarity(&query, &unrelated));
        assert!(embedder.similarity(&query, &related) > 0.3);
    }

    #[tokio::test]
    async fn hashing_embedder_rejects_blank_text() {
        let embedder = HashingEmbedder::default();
        assert!(matches!(embedder.embed("   ").await, Err(EmbedError::EmptyInput)));
    }

    #[test]
    fn zero_dimension_is_raised_to_one() {
        assert_eq!(HashingEmbedder::new(0).dimension(), 1);
    }
}
