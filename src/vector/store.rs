//! Vector index implementation.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{ProcessingError, Result};
use crate::models::l2_normalize;

/// All vectors for one document: the document-level mean plus one vector
/// per page. Stored normalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorEntry {
    pub doc_id: String,
    pub content_id: String,
    pub model_name: String,
    pub vector_dim: u32,
    pub document: Vec<f32>,
    /// Page number -> normalized page vector.
    pub pages: BTreeMap<u32, Vec<f32>>,
    pub created_at: DateTime<Utc>,
}

/// A similarity-search match.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub doc_id: String,
    pub similarity: f32,
    pub created_at: DateTime<Utc>,
}

/// Thread-safe index over a directory of per-document segment files.
pub struct VectorIndex {
    dir: PathBuf,
    entries: RwLock<HashMap<String, VectorEntry>>,
}

/// Scan a directory into a doc-id -> entry map.
fn load_entries(dir: &Path) -> Result<HashMap<String, VectorEntry>> {
    let mut entries = HashMap::new();

    for item in std::fs::read_dir(dir)? {
        let path = item?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let data = std::fs::read(&path)?;
        match serde_json::from_slice::<VectorEntry>(&data) {
            Ok(entry) => {
                entries.insert(entry.doc_id.clone(), entry);
            }
            Err(e) => {
                tracing::warn!("Skipping unreadable vector segment {:?}: {}", path, e);
            }
        }
    }

    Ok(entries)
}

impl VectorIndex {
    /// Open an index directory, loading every existing segment.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let entries = load_entries(dir)?;

        Ok(Self {
            dir: dir.to_path_buf(),
            entries: RwLock::new(entries),
        })
    }

    /// Re-read every segment from disk, replacing the in-memory map.
    ///
    /// Called after a restore rewrites the index directory; queries
    /// issued while the reload runs see either the old or the new map,
    /// never a mix. Returns the number of entries loaded.
    pub async fn reload(&self) -> Result<usize> {
        std::fs::create_dir_all(&self.dir)?;
        let entries = load_entries(&self.dir)?;
        let count = entries.len();
        *self.entries.write().await = entries;
        Ok(count)
    }

    /// The directory backing this index.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn segment_path(&self, doc_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", doc_id))
    }

    /// Insert or replace all vectors for a document.
    ///
    /// Vectors are normalized here; callers pass raw embedder output.
    /// The segment file is written via a temp file and rename so a crash
    /// never leaves a half-written segment.
    pub async fn upsert(&self, mut entry: VectorEntry) -> Result<()> {
        l2_normalize(&mut entry.document);
        for vector in entry.pages.values_mut() {
            l2_normalize(vector);
        }

        let path = self.segment_path(&entry.doc_id);
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_vec(&entry)?;
        std::fs::write(&tmp, &data)?;
        std::fs::rename(&tmp, &path)?;

        self.entries.write().await.insert(entry.doc_id.clone(), entry);
        Ok(())
    }

    /// Remove a document's vectors from disk and memory.
    pub async fn remove(&self, doc_id: &str) -> Result<bool> {
        let existed = self.entries.write().await.remove(doc_id).is_some();
        let path = self.segment_path(doc_id);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(existed)
    }

    pub async fn get(&self, doc_id: &str) -> Option<VectorEntry> {
        self.entries.read().await.get(doc_id).cloned()
    }

    pub async fn contains(&self, doc_id: &str) -> bool {
        self.entries.read().await.contains_key(doc_id)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn doc_ids(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    /// Whether any entry carries this content id.
    pub async fn contains_content_id(&self, content_id: &str) -> bool {
        self.entries
            .read()
            .await
            .values()
            .any(|e| e.content_id == content_id)
    }

    /// Nearest documents by cosine similarity, best first. Ties resolve
    /// to the oldest entry.
    pub async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        if query.is_empty() {
            return Err(ProcessingError::InvalidInput("empty query vector".into()));
        }
        let mut normalized = query.to_vec();
        l2_normalize(&mut normalized);

        let entries = self.entries.read().await;
        let mut hits: Vec<SearchHit> = entries
            .values()
            .filter(|e| e.document.len() == normalized.len())
            .map(|e| SearchHit {
                doc_id: e.doc_id.clone(),
                similarity: dot(&e.document, &normalized),
                created_at: e.created_at,
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.created_at.cmp(&b.created_at))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    /// Best match at or above a similarity threshold, if any.
    pub async fn best_match_above(&self, query: &[f32], threshold: f32) -> Result<Option<SearchHit>> {
        let hits = self.search(query, 1).await?;
        Ok(hits.into_iter().next().filter(|h| h.similarity >= threshold))
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(doc_id: &str, document: Vec<f32>, age_secs: i64) -> VectorEntry {
        let mut pages = BTreeMap::new();
        pages.insert(1, document.clone());
        VectorEntry {
            doc_id: doc_id.into(),
            content_id: format!("{:0>64}", doc_id),
            model_name: "hash-embed-v1".into(),
            vector_dim: document.len() as u32,
            document,
            pages,
            created_at: Utc::now() - chrono::Duration::seconds(age_secs),
        }
    }

    #[tokio::test]
    async fn test_upsert_normalizes_and_persists() {
        let dir = tempdir().unwrap();
        let index = VectorIndex::open(dir.path()).unwrap();

        index.upsert(entry("d1", vec![3.0, 4.0], 0)).await.unwrap();

        let stored = index.get("d1").await.unwrap();
        assert!((stored.document[0] - 0.6).abs() < 1e-6);
        assert!((stored.document[1] - 0.8).abs() < 1e-6);

        // Reopen from disk.
        drop(index);
        let reopened = VectorIndex::open(dir.path()).unwrap();
        assert!(reopened.contains("d1").await);
        assert_eq!(reopened.len().await, 1);
    }

    #[tokio::test]
    async fn test_search_orders_by_similarity() {
        let dir = tempdir().unwrap();
        let index = VectorIndex::open(dir.path()).unwrap();
        index.upsert(entry("aligned", vec![1.0, 0.0], 0)).await.unwrap();
        index.upsert(entry("orthogonal", vec![0.0, 1.0], 0)).await.unwrap();
        index.upsert(entry("diagonal", vec![1.0, 1.0], 0)).await.unwrap();

        let hits = index.search(&[1.0, 0.0], 3).await.unwrap();
        assert_eq!(hits[0].doc_id, "aligned");
        assert_eq!(hits[1].doc_id, "diagonal");
        assert_eq!(hits[2].doc_id, "orthogonal");
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_tie_breaks_to_oldest() {
        let dir = tempdir().unwrap();
        let index = VectorIndex::open(dir.path()).unwrap();
        index.upsert(entry("newer", vec![1.0, 0.0], 10)).await.unwrap();
        index.upsert(entry("older", vec![1.0, 0.0], 1000)).await.unwrap();

        let hits = index.search(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits[0].doc_id, "older");
    }

    #[tokio::test]
    async fn test_best_match_respects_threshold() {
        let dir = tempdir().unwrap();
        let index = VectorIndex::open(dir.path()).unwrap();
        index.upsert(entry("d1", vec![1.0, 0.0], 0)).await.unwrap();

        // cos([1,1], [1,0]) = 1/sqrt(2) ~= 0.7071.
        let query = [1.0f32, 1.0];
        let hit = index.best_match_above(&query, 0.70).await.unwrap().unwrap();
        assert_eq!(hit.doc_id, "d1");
        assert!(index.best_match_above(&query, 0.71).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_deletes_segment() {
        let dir = tempdir().unwrap();
        let index = VectorIndex::open(dir.path()).unwrap();
        index.upsert(entry("d1", vec![1.0, 0.0], 0)).await.unwrap();

        assert!(index.remove("d1").await.unwrap());
        assert!(!index.contains("d1").await);
        assert!(!dir.path().join("d1.json").exists());
        assert!(!index.remove("d1").await.unwrap());
    }

    #[tokio::test]
    async fn test_reload_replaces_in_memory_map() {
        let dir = tempdir().unwrap();
        let index = VectorIndex::open(dir.path()).unwrap();
        index.upsert(entry("stale", vec![1.0, 0.0], 0)).await.unwrap();

        // Simulate a restore: the directory is rewritten behind the
        // index's back.
        std::fs::remove_file(dir.path().join("stale.json")).unwrap();
        let fresh = entry("fresh", vec![0.0, 1.0], 0);
        std::fs::write(
            dir.path().join("fresh.json"),
            serde_json::to_vec(&fresh).unwrap(),
        )
        .unwrap();

        // Until the reload, queries still see the old snapshot.
        assert!(index.contains("stale").await);
        assert!(!index.contains("fresh").await);

        let count = index.reload().await.unwrap();
        assert_eq!(count, 1);
        assert!(!index.contains("stale").await);
        assert!(index.contains("fresh").await);

        let hits = index.search(&[0.0, 1.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, "fresh");
    }

    #[tokio::test]
    async fn test_dimension_mismatch_excluded_from_search() {
        let dir = tempdir().unwrap();
        let index = VectorIndex::open(dir.path()).unwrap();
        index.upsert(entry("d2", vec![1.0, 0.0], 0)).await.unwrap();
        index.upsert(entry("d3", vec![1.0, 0.0, 0.0], 0)).await.unwrap();

        let hits = index.search(&[1.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, "d2");
    }
}
