//! Text embedding for pages and documents.
//!
//! The embedder is a process-wide singleton constructed at startup and
//! shared across workers; implementations must be thread-safe. The
//! default backend is a deterministic feature-hashing embedder, so
//! embedding never depends on an external service and identical text
//! always produces identical vectors. Content ids and the Level-2 dedup
//! hash rely on that determinism.

use sha2::{Digest, Sha256};

use crate::models::l2_normalize;

/// Dimension of the default embedding space.
pub const EMBEDDING_DIM: usize = 384;

/// Model tag stored alongside every vector.
pub const DEFAULT_MODEL_NAME: &str = "feathash-384-v1";

/// Seam for embedding backends.
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;
    fn dim(&self) -> u32;
    /// Embed one text into a vector of `dim()` components.
    fn embed(&self, text: &str) -> Vec<f32>;

    /// Embed several texts. Backends with batch inference override this.
    fn embed_batch(&self, texts: &[String]) -> Vec<Vec<f32>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// Deterministic feature-hashing embedder.
///
/// Tokens are hashed into signed buckets; the result is L2-normalized.
/// Not a semantic model, but stable, fast, and dependency-free, which is
/// what the dedup tiers need.
pub struct HashEmbedder {
    dim: usize,
    model_name: String,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(EMBEDDING_DIM)
    }
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            model_name: DEFAULT_MODEL_NAME.to_string(),
        }
    }

    fn token_bucket(&self, token: &str) -> (usize, f32) {
        let digest = Sha256::digest(token.as_bytes());
        let hash = u64::from_le_bytes(digest[..8].try_into().expect("digest is 32 bytes"));
        let bucket = (hash % self.dim as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        (bucket, sign)
    }
}

impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dim(&self) -> u32 {
        self.dim as u32
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let lowered = token.to_lowercase();
            let (bucket, sign) = self.token_bucket(&lowered);
            vector[bucket] += sign;
        }

        l2_normalize(&mut vector);
        vector
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_is_deterministic() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("attention is all you need");
        let b = embedder.embed("attention is all you need");
        assert_eq!(a, b);
    }

    #[test]
    fn test_embedding_dimension() {
        let embedder = HashEmbedder::default();
        assert_eq!(embedder.embed("hello").len(), EMBEDDING_DIM);
        assert_eq!(embedder.dim(), EMBEDDING_DIM as u32);
    }

    #[test]
    fn test_different_text_different_vector() {
        let embedder = HashEmbedder::default();
        assert_ne!(
            embedder.embed("convolutional networks"),
            embedder.embed("transformer architectures")
        );
    }

    #[test]
    fn test_case_and_punctuation_insensitive() {
        let embedder = HashEmbedder::default();
        assert_eq!(
            embedder.embed("Deep Learning!"),
            embedder.embed("deep learning")
        );
    }

    #[test]
    fn test_output_is_normalized() {
        let embedder = HashEmbedder::default();
        let v = embedder.embed("some scholarly text about proteins");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let embedder = HashEmbedder::default();
        let v = embedder.embed("   \n\t ");
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_batch_matches_single() {
        let embedder = HashEmbedder::default();
        let texts = vec!["page one".to_string(), "page two".to_string()];
        let batch = embedder.embed_batch(&texts);
        assert_eq!(batch[0], embedder.embed("page one"));
        assert_eq!(batch[1], embedder.embed("page two"));
    }
}
