//! Four-tier duplicate prevention.
//!
//! Tiers are tried in increasing cost; a hit at any tier returns the
//! previously ingested paper and short-circuits the rest of the
//! pipeline. Levels 0-2 are exact hash matches against the relational
//! store; Level 3 is cosine similarity against the vector index.

use std::sync::Arc;

use crate::embedder::Embedder;
use crate::error::{ProcessingError, Result};
use crate::models::{normalize, ContentHash, FileHash, SampleEmbeddingHash};
use crate::repository::PaperRepository;
use crate::vector::VectorIndex;

/// Tag recorded with the L2 hash describing how the sample was drawn.
pub const SAMPLE_STRATEGY: &str = "first_middle_last";

/// A duplicate match against an existing paper.
#[derive(Debug, Clone)]
pub struct DedupHit {
    pub doc_id: String,
    /// Which tier matched: 0..=3.
    pub tier: i32,
    /// Cosine similarity, present for Level-3 hits.
    pub similarity: Option<f32>,
}

/// Duplicate-prevention engine shared by all workers.
pub struct DedupEngine {
    papers: PaperRepository,
    vectors: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    l3_threshold: f32,
}

impl DedupEngine {
    pub fn new(
        papers: PaperRepository,
        vectors: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        l3_threshold: f32,
    ) -> Self {
        Self {
            papers,
            vectors,
            embedder,
            l3_threshold,
        }
    }

    /// Level 0: exact raw-byte match.
    pub async fn check_file_hash(&self, bytes: &[u8]) -> Result<Option<DedupHit>> {
        let md5_hex = format!("{:x}", md5::compute(bytes));
        let hit = self
            .papers
            .find_by_file_hash(&md5_hex)
            .await
            .map_err(ProcessingError::from)?;
        Ok(hit.map(|doc_id| DedupHit {
            doc_id,
            tier: 0,
            similarity: None,
        }))
    }

    /// Level 1: normalized metadata + first-three-pages text, with equal
    /// page count.
    pub async fn check_content_hash(
        &self,
        pdf_metadata: &str,
        pages: &[String],
        page_count: u32,
    ) -> Result<Option<DedupHit>> {
        let probe = ContentHash::compute("", pdf_metadata, pages, page_count);
        let hit = self
            .papers
            .find_by_content_hash(&probe.sha256, page_count)
            .await
            .map_err(ProcessingError::from)?;
        Ok(hit.map(|doc_id| DedupHit {
            doc_id,
            tier: 1,
            similarity: None,
        }))
    }

    /// Level 2: exact match on the sample-embedding hash.
    pub async fn check_sample_hash(&self, pages: &[String]) -> Result<Option<DedupHit>> {
        let sample = self.sample_vector(pages);
        let probe = SampleEmbeddingHash::compute("", &sample, SAMPLE_STRATEGY);
        let hit = self
            .papers
            .find_by_sample_hash(&probe.sha256)
            .await
            .map_err(ProcessingError::from)?;
        Ok(hit.map(|doc_id| DedupHit {
            doc_id,
            tier: 2,
            similarity: None,
        }))
    }

    /// Level 3: nearest neighbor in the vector index at or above the
    /// similarity threshold. Ties resolve to the oldest paper inside the
    /// index's search ordering.
    pub async fn check_vector_similarity(&self, doc_vector: &[f32]) -> Result<Option<DedupHit>> {
        let best = self.vectors.best_match_above(doc_vector, self.l3_threshold).await?;
        Ok(best.map(|hit| DedupHit {
            doc_id: hit.doc_id,
            tier: 3,
            similarity: Some(hit.similarity),
        }))
    }

    /// Whether a similarity constitutes a Level-3 duplicate. The
    /// threshold is inclusive.
    pub fn exceeds_threshold(&self, similarity: f32) -> bool {
        similarity >= self.l3_threshold
    }

    /// The deterministic sample vector feeding the Level-2 hash:
    /// normalized text of the first, middle, and last page, embedded as
    /// one input.
    pub fn sample_vector(&self, pages: &[String]) -> Vec<f32> {
        self.embedder.embed(&sample_text(pages))
    }

    /// Build the Level-2 hash row for a paper at finalization.
    pub fn sample_hash_for(&self, doc_id: &str, pages: &[String]) -> SampleEmbeddingHash {
        SampleEmbeddingHash::compute(doc_id, &self.sample_vector(pages), SAMPLE_STRATEGY)
    }

    /// Build the Level-0 hash row for a paper at finalization.
    pub fn file_hash_for(&self, doc_id: &str, bytes: &[u8]) -> FileHash {
        FileHash::compute(doc_id, bytes)
    }

    /// Build the Level-1 hash row for a paper at finalization.
    pub fn content_hash_for(
        &self,
        doc_id: &str,
        pdf_metadata: &str,
        pages: &[String],
        page_count: u32,
    ) -> ContentHash {
        ContentHash::compute(doc_id, pdf_metadata, pages, page_count)
    }
}

/// Deterministic page sample: first, middle, last (deduplicated for
/// short documents), normalized.
fn sample_text(pages: &[String]) -> String {
    if pages.is_empty() {
        return String::new();
    }
    let mut indices = vec![0, pages.len() / 2, pages.len() - 1];
    indices.dedup();
    indices
        .into_iter()
        .map(|i| normalize(&pages[i]))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::HashEmbedder;
    use crate::models::{DocumentEmbedding, PageEmbedding, Paper};
    use crate::repository::{DbContext, PaperBundle};
    use crate::vector::VectorEntry;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    async fn engine_with_stores() -> (DedupEngine, Arc<VectorIndex>, PaperRepository, tempfile::TempDir)
    {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite:{}", db_path.display());
        crate::repository::migrations::run_migrations(&url).await.unwrap();
        let ctx = DbContext::from_path(&db_path);

        let vectors = Arc::new(VectorIndex::open(&dir.path().join("vectors")).unwrap());
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::default());
        let engine = DedupEngine::new(ctx.papers(), vectors.clone(), embedder, 0.95);
        (engine, vectors, ctx.papers(), dir)
    }

    async fn seed_paper(engine: &DedupEngine, repo: &PaperRepository, doc_id: &str, bytes: &[u8]) {
        let pages = vec![format!("page text of {}", doc_id)];
        let vector = engine.sample_vector(&pages);
        let bundle = PaperBundle {
            paper: Paper::new(doc_id.into(), format!("{:0>64}", doc_id), "a.pdf".into()),
            pages: vec![PageEmbedding {
                doc_id: doc_id.into(),
                page_number: 1,
                page_text: pages[0].clone(),
                model_name: "test".into(),
                vector_dim: vector.len() as u32,
                vector: vector.clone(),
            }],
            document: DocumentEmbedding {
                doc_id: doc_id.into(),
                model_name: "test".into(),
                vector_dim: vector.len() as u32,
                vector: vector.clone(),
            },
            metadata: None,
            layout: None,
            file_hash: engine.file_hash_for(doc_id, bytes),
            content_hash: engine.content_hash_for(doc_id, "meta", &pages, 1),
            sample_hash: engine.sample_hash_for(doc_id, &pages),
        };
        repo.finalize(&bundle).await.unwrap();
    }

    #[tokio::test]
    async fn test_level0_exact_bytes() {
        let (engine, _vectors, repo, _dir) = engine_with_stores().await;
        seed_paper(&engine, &repo, "d1", b"raw pdf bytes").await;

        let hit = engine.check_file_hash(b"raw pdf bytes").await.unwrap().unwrap();
        assert_eq!(hit.doc_id, "d1");
        assert_eq!(hit.tier, 0);
        assert!(engine.check_file_hash(b"different").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_level1_requires_equal_page_count() {
        let (engine, _vectors, repo, _dir) = engine_with_stores().await;
        seed_paper(&engine, &repo, "d1", b"bytes-1").await;
        let pages = vec!["page text of d1".to_string()];

        let hit = engine
            .check_content_hash("meta", &pages, 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.tier, 1);
        assert!(engine
            .check_content_hash("meta", &pages, 2)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_level2_sample_hash() {
        let (engine, _vectors, repo, _dir) = engine_with_stores().await;
        seed_paper(&engine, &repo, "d1", b"bytes-1").await;

        let hit = engine
            .check_sample_hash(&["page text of d1".to_string()])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.tier, 2);
        assert!(engine
            .check_sample_hash(&["entirely different text".to_string()])
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_level3_similarity() {
        let (engine, vectors, _repo, _dir) = engine_with_stores().await;
        let mut pages_map = BTreeMap::new();
        pages_map.insert(1, vec![1.0, 0.0]);
        vectors
            .upsert(VectorEntry {
                doc_id: "d1".into(),
                content_id: "c".repeat(64),
                model_name: "test".into(),
                vector_dim: 2,
                document: vec![1.0, 0.0],
                pages: pages_map,
                created_at: chrono::Utc::now(),
            })
            .await
            .unwrap();

        let hit = engine
            .check_vector_similarity(&[1.0, 0.0])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.tier, 3);
        assert!(hit.similarity.unwrap() > 0.99);

        // Orthogonal vector is no duplicate.
        assert!(engine
            .check_vector_similarity(&[0.0, 1.0])
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_threshold_is_inclusive_at_exact_boundary() {
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(8));
        let dir = tempdir().unwrap();
        let vectors = Arc::new(VectorIndex::open(dir.path()).unwrap());
        let ctx = DbContext::from_path(&dir.path().join("unused.db"));
        let engine = DedupEngine::new(ctx.papers(), vectors, embedder, 0.95);

        assert!(!engine.exceeds_threshold(0.9499));
        assert!(engine.exceeds_threshold(0.9500));
        assert!(engine.exceeds_threshold(0.97));
    }

    #[test]
    fn test_sample_text_short_documents() {
        let one = vec!["Only Page".to_string()];
        assert_eq!(sample_text(&one), "only page");

        let two = vec!["First".to_string(), "Last".to_string()];
        // Indices 0, 1, 1 dedup to 0, 1.
        assert_eq!(sample_text(&two), "first last");

        assert_eq!(sample_text(&[]), "");
    }

    #[test]
    fn test_sample_text_picks_first_middle_last() {
        let pages: Vec<String> = (1..=5).map(|i| format!("Page {}", i)).collect();
        assert_eq!(sample_text(&pages), "page 1 page 3 page 5");
    }
}
