//! Embedding models and the content-id derivation.
//!
//! The byte convention for hashing vectors is little-endian IEEE-754.
//! Every place that fingerprints a vector must go through
//! [`vector_bytes_le`] or content ids stop matching across processes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One embedding per page of a paper.
///
/// Page numbers of a paper form a contiguous `1..N` range and all pages
/// share one `vector_dim`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageEmbedding {
    pub doc_id: String,
    pub page_number: u32,
    pub page_text: String,
    pub model_name: String,
    pub vector_dim: u32,
    pub vector: Vec<f32>,
}

/// Componentwise mean of a paper's page embeddings.
///
/// This is what `content_id` is computed from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentEmbedding {
    pub doc_id: String,
    pub model_name: String,
    pub vector_dim: u32,
    pub vector: Vec<f32>,
}

/// Serialize a vector as little-endian IEEE-754 bytes.
pub fn vector_bytes_le(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// SHA-256 fingerprint of a vector's LE byte representation, lowercase hex.
pub fn content_id_from_vector(vector: &[f32]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(vector_bytes_le(vector));
    hex::encode(hasher.finalize())
}

/// Componentwise mean across page vectors.
///
/// Returns `None` for an empty input or mismatched dimensions.
pub fn mean_vector(vectors: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = vectors.first()?;
    let dim = first.len();
    if vectors.iter().any(|v| v.len() != dim) {
        return None;
    }
    let mut mean = vec![0.0f32; dim];
    for v in vectors {
        for (m, x) in mean.iter_mut().zip(v) {
            *m += x;
        }
    }
    let n = vectors.len() as f32;
    for m in &mut mean {
        *m /= n;
    }
    Some(mean)
}

/// L2-normalize in place. Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Cosine similarity between two vectors of equal dimension.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}
