//! Duplicate-detection hashes and text normalization.
//!
//! Three hash rows per paper back the cheap dedup tiers: raw-byte MD5,
//! normalized content SHA-256, and a sample-embedding SHA-256. A fourth
//! table records uploads that resolved to an existing paper.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Level 0: MD5 over the raw upload bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileHash {
    pub doc_id: String,
    pub md5: String,
    pub file_size: u64,
    pub created_at: DateTime<Utc>,
}

impl FileHash {
    pub fn compute(doc_id: &str, content: &[u8]) -> Self {
        Self {
            doc_id: doc_id.to_string(),
            md5: format!("{:x}", md5::compute(content)),
            file_size: content.len() as u64,
            created_at: Utc::now(),
        }
    }
}

/// Level 1: SHA-256 over normalized PDF metadata plus the normalized text
/// of the first three pages. Matches additionally require equal page count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentHash {
    pub doc_id: String,
    pub sha256: String,
    pub page_count: u32,
    pub created_at: DateTime<Utc>,
}

impl ContentHash {
    pub fn compute(doc_id: &str, pdf_metadata: &str, first_pages: &[String], page_count: u32) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(normalize(pdf_metadata).as_bytes());
        for page in first_pages.iter().take(3) {
            hasher.update(normalize(page).as_bytes());
        }
        Self {
            doc_id: doc_id.to_string(),
            sha256: hex::encode(hasher.finalize()),
            page_count,
            created_at: Utc::now(),
        }
    }
}

/// Level 2: SHA-256 over the byte representation of a sample vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleEmbeddingHash {
    pub doc_id: String,
    pub sha256: String,
    /// Which pages fed the sample, e.g. `first_middle_last`.
    pub sample_strategy: String,
    pub vector_dim: u32,
    pub created_at: DateTime<Utc>,
}

impl SampleEmbeddingHash {
    pub fn compute(doc_id: &str, sample_vector: &[f32], strategy: &str) -> Self {
        let bytes = super::embedding::vector_bytes_le(sample_vector);
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Self {
            doc_id: doc_id.to_string(),
            sha256: hex::encode(hasher.finalize()),
            sample_strategy: strategy.to_string(),
            vector_dim: sample_vector.len() as u32,
            created_at: Utc::now(),
        }
    }
}

/// An upload that resolved to an existing paper instead of creating one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateReference {
    pub id: i64,
    /// The paper the upload collapsed onto.
    pub doc_id: String,
    pub uploaded_filename: String,
    /// Which tier matched: 0..=3.
    pub matched_tier: i32,
    /// Cosine similarity for Level-3 hits.
    pub similarity: Option<f32>,
    pub created_at: DateTime<Utc>,
}

/// Normalization used by the Level-1 content hash: lowercase, collapse
/// whitespace runs to single spaces, strip non-printable characters.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = true;
    for c in text.chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        } else if !c.is_control() {
            for lc in c.to_lowercase() {
                out.push(lc);
            }
            last_was_space = false;
        }
    }
    if out.ends_with(' ') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_lowercases_and_collapses() {
        assert_eq!(normalize("  Deep\t\tLearning\n FOR  Proteins "), "deep learning for proteins");
    }

    #[test]
    fn test_normalize_strips_control_chars() {
        assert_eq!(normalize("a\u{0007}b\u{0000}c"), "abc");
    }

    #[test]
    fn test_file_hash_is_md5_hex() {
        let h = FileHash::compute("d1", b"hello");
        assert_eq!(h.md5, "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(h.file_size, 5);
    }

    #[test]
    fn test_content_hash_ignores_case_and_spacing() {
        let a = ContentHash::compute("d1", "Title: Foo", &["Page ONE".into()], 8);
        let b = ContentHash::compute("d2", "title:  foo", &["page one".into()], 8);
        assert_eq!(a.sha256, b.sha256);
    }

    #[test]
    fn test_content_hash_uses_first_three_pages_only() {
        let pages: Vec<String> = (1..=5).map(|i| format!("page {}", i)).collect();
        let a = ContentHash::compute("d1", "m", &pages, 5);
        let b = ContentHash::compute("d1", "m", &pages[..3].to_vec(), 5);
        assert_eq!(a.sha256, b.sha256);
    }

    #[test]
    fn test_sample_embedding_hash_matches_contract() {
        let v = vec![0.5f32, -0.25];
        let h = SampleEmbeddingHash::compute("d1", &v, "first_middle_last");
        let mut hasher = Sha256::new();
        hasher.update(super::super::embedding::vector_bytes_le(&v));
        assert_eq!(h.sha256, hex::encode(hasher.finalize()));
        assert_eq!(h.vector_dim, 2);
    }
}
