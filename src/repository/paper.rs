//! Diesel-based paper repository for SQLite.
//!
//! The relational store is the system of record for papers and all of
//! their children. A paper's finalization writes every row in one
//! transaction; the unique index on `content_id` linearizes concurrent
//! ingestions of identical content.

use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};

use super::models::{
    ContentHashRecord, DocumentEmbeddingRecord, DuplicateReferenceRecord, FileHashRecord,
    LayoutRecord, MetadataRecord, NewDuplicateReference, PageEmbeddingRecord, PaperRecord,
    SampleHashRecord,
};
use super::pool::{AsyncSqlitePool, DieselError};
use crate::models::{
    ContentHash, DocumentEmbedding, DuplicateReference, FileHash, LayoutAnalysis, PageEmbedding,
    Paper, PaperMetadata, SampleEmbeddingHash,
};
use crate::schema::{
    content_hashes, document_embeddings, duplicate_references, file_hashes, layout_analyses,
    page_embeddings, paper_metadata, papers, sample_embedding_hashes,
};

/// Everything written by the finalize stage in one transaction.
pub struct PaperBundle {
    pub paper: Paper,
    pub pages: Vec<PageEmbedding>,
    pub document: DocumentEmbedding,
    pub metadata: Option<PaperMetadata>,
    pub layout: Option<LayoutAnalysis>,
    pub file_hash: FileHash,
    pub content_hash: ContentHash,
    pub sample_hash: SampleEmbeddingHash,
}

/// Shape used by the consistency checker to compare against the vector store.
#[derive(Debug, Clone)]
pub struct PaperVectorExpectation {
    pub doc_id: String,
    pub content_id: String,
    pub page_count: u32,
    pub vector_dim: u32,
    pub pending_vector_sync: bool,
}

/// Diesel-based paper repository with compile-time query checking.
#[derive(Clone)]
pub struct PaperRepository {
    pool: AsyncSqlitePool,
}

impl PaperRepository {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a paper and all of its children atomically.
    ///
    /// A unique-constraint violation on `content_id` means another job
    /// committed the same content first; the caller converts that into a
    /// duplicate reference instead of a new paper.
    pub async fn finalize(&self, bundle: &PaperBundle) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;

        let paper_row = PaperRecord::from_model(&bundle.paper);
        let page_rows: Vec<PageEmbeddingRecord> = bundle
            .pages
            .iter()
            .map(|p| PageEmbeddingRecord {
                doc_id: p.doc_id.clone(),
                page_number: p.page_number as i32,
                page_text: p.page_text.clone(),
                model_name: p.model_name.clone(),
                vector_dim: p.vector_dim as i32,
            })
            .collect();
        let doc_row = DocumentEmbeddingRecord {
            doc_id: bundle.document.doc_id.clone(),
            model_name: bundle.document.model_name.clone(),
            vector_dim: bundle.document.vector_dim as i32,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        let metadata_row = bundle.metadata.as_ref().map(MetadataRecord::from_model);
        let layout_row = bundle.layout.as_ref().map(LayoutRecord::from_model);
        let file_hash_row = FileHashRecord::from_model(&bundle.file_hash);
        let content_hash_row = ContentHashRecord::from_model(&bundle.content_hash);
        let sample_hash_row = SampleHashRecord::from_model(&bundle.sample_hash);

        conn.transaction::<_, DieselError, _>(|conn| {
            async move {
                diesel::insert_into(papers::table)
                    .values(&paper_row)
                    .execute(conn)
                    .await?;
                for page_row in &page_rows {
                    diesel::insert_into(page_embeddings::table)
                        .values(page_row)
                        .execute(conn)
                        .await?;
                }
                diesel::insert_into(document_embeddings::table)
                    .values(&doc_row)
                    .execute(conn)
                    .await?;
                if let Some(row) = &metadata_row {
                    diesel::insert_into(paper_metadata::table)
                        .values(row)
                        .execute(conn)
                        .await?;
                }
                if let Some(row) = &layout_row {
                    diesel::insert_into(layout_analyses::table)
                        .values(row)
                        .execute(conn)
                        .await?;
                }
                diesel::insert_into(file_hashes::table)
                    .values(&file_hash_row)
                    .execute(conn)
                    .await?;
                diesel::insert_into(content_hashes::table)
                    .values(&content_hash_row)
                    .execute(conn)
                    .await?;
                diesel::insert_into(sample_embedding_hashes::table)
                    .values(&sample_hash_row)
                    .execute(conn)
                    .await?;
                Ok(())
            }
            .scope_boxed()
        })
        .await
    }

    /// Get a paper by id.
    pub async fn get(&self, doc_id: &str) -> Result<Option<Paper>, DieselError> {
        let mut conn = self.pool.get().await?;
        let record: Option<PaperRecord> = papers::table
            .find(doc_id)
            .first(&mut conn)
            .await
            .optional()?;
        Ok(record.map(PaperRecord::into_model))
    }

    /// Get a paper by its content id.
    pub async fn get_by_content_id(&self, content_id: &str) -> Result<Option<Paper>, DieselError> {
        let mut conn = self.pool.get().await?;
        let record: Option<PaperRecord> = papers::table
            .filter(papers::content_id.eq(content_id))
            .first(&mut conn)
            .await
            .optional()?;
        Ok(record.map(PaperRecord::into_model))
    }

    /// List papers, newest first.
    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Paper>, DieselError> {
        let mut conn = self.pool.get().await?;
        let records: Vec<PaperRecord> = papers::table
            .order(papers::created_at.desc())
            .limit(limit)
            .offset(offset)
            .load(&mut conn)
            .await?;
        Ok(records.into_iter().map(PaperRecord::into_model).collect())
    }

    /// Count all papers.
    pub async fn count(&self) -> Result<u64, DieselError> {
        let mut conn = self.pool.get().await?;
        let count: i64 = papers::table.count().get_result(&mut conn).await?;
        Ok(count as u64)
    }

    /// Delete a paper. Children cascade through the foreign keys.
    pub async fn delete(&self, doc_id: &str) -> Result<bool, DieselError> {
        let mut conn = self.pool.get().await?;
        let deleted = diesel::delete(papers::table.find(doc_id))
            .execute(&mut conn)
            .await?;
        Ok(deleted > 0)
    }

    /// Update mutable paper fields (notes, quality, sync marker).
    pub async fn update(&self, paper: &Paper) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;
        diesel::update(papers::table.find(&paper.doc_id))
            .set((
                papers::ocr_quality.eq(paper.ocr_quality.as_str()),
                papers::processing_notes.eq(paper.processing_notes.as_deref()),
                papers::pending_vector_sync.eq(paper.pending_vector_sync as i32),
                papers::updated_at.eq(chrono::Utc::now().to_rfc3339()),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Set or clear the pending-vector-sync marker.
    pub async fn set_pending_vector_sync(
        &self,
        doc_id: &str,
        pending: bool,
    ) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;
        diesel::update(papers::table.find(doc_id))
            .set((
                papers::pending_vector_sync.eq(pending as i32),
                papers::updated_at.eq(chrono::Utc::now().to_rfc3339()),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Doc ids flagged for vector re-sync.
    pub async fn list_pending_vector_sync(&self) -> Result<Vec<String>, DieselError> {
        let mut conn = self.pool.get().await?;
        papers::table
            .filter(papers::pending_vector_sync.eq(1))
            .select(papers::doc_id)
            .load(&mut conn)
            .await
    }

    /// Level-0 lookup: exact raw-byte hash.
    pub async fn find_by_file_hash(&self, md5_hex: &str) -> Result<Option<String>, DieselError> {
        let mut conn = self.pool.get().await?;
        file_hashes::table
            .filter(file_hashes::md5.eq(md5_hex))
            .select(file_hashes::doc_id)
            .first(&mut conn)
            .await
            .optional()
    }

    /// Level-1 lookup: normalized content hash with matching page count.
    pub async fn find_by_content_hash(
        &self,
        sha256_hex: &str,
        page_count: u32,
    ) -> Result<Option<String>, DieselError> {
        let mut conn = self.pool.get().await?;
        content_hashes::table
            .filter(content_hashes::sha256.eq(sha256_hex))
            .filter(content_hashes::page_count.eq(page_count as i32))
            .select(content_hashes::doc_id)
            .first(&mut conn)
            .await
            .optional()
    }

    /// Level-2 lookup: sample-embedding hash.
    pub async fn find_by_sample_hash(&self, sha256_hex: &str) -> Result<Option<String>, DieselError> {
        let mut conn = self.pool.get().await?;
        sample_embedding_hashes::table
            .filter(sample_embedding_hashes::sha256.eq(sha256_hex))
            .select(sample_embedding_hashes::doc_id)
            .first(&mut conn)
            .await
            .optional()
    }

    /// Record an upload that resolved to an existing paper.
    pub async fn add_duplicate_reference(
        &self,
        doc_id: &str,
        uploaded_filename: &str,
        matched_tier: i32,
        similarity: Option<f32>,
    ) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;
        diesel::insert_into(duplicate_references::table)
            .values(&NewDuplicateReference {
                doc_id: doc_id.to_string(),
                uploaded_filename: uploaded_filename.to_string(),
                matched_tier,
                similarity,
                created_at: chrono::Utc::now().to_rfc3339(),
            })
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// All duplicate references pointing at a paper.
    pub async fn duplicate_references(
        &self,
        doc_id: &str,
    ) -> Result<Vec<DuplicateReference>, DieselError> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<DuplicateReferenceRecord> = duplicate_references::table
            .filter(duplicate_references::doc_id.eq(doc_id))
            .order(duplicate_references::created_at.asc())
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(|r| r.into_model()).collect())
    }

    /// Metadata for a paper, if any tier produced one.
    pub async fn get_metadata(&self, doc_id: &str) -> Result<Option<PaperMetadata>, DieselError> {
        let mut conn = self.pool.get().await?;
        let record: Option<MetadataRecord> = paper_metadata::table
            .find(doc_id)
            .first(&mut conn)
            .await
            .optional()?;
        Ok(record.map(MetadataRecord::into_model))
    }

    /// Layout analysis for a paper, if the analyzer produced one.
    pub async fn get_layout(&self, doc_id: &str) -> Result<Option<LayoutAnalysis>, DieselError> {
        let mut conn = self.pool.get().await?;
        let record: Option<LayoutRecord> = layout_analyses::table
            .find(doc_id)
            .first(&mut conn)
            .await
            .optional()?;
        Ok(record.map(LayoutRecord::into_model))
    }

    /// Ordered page rows for a paper (text plus embedding dimensions).
    pub async fn get_pages(&self, doc_id: &str) -> Result<Vec<PageEmbeddingRecord>, DieselError> {
        let mut conn = self.pool.get().await?;
        page_embeddings::table
            .filter(page_embeddings::doc_id.eq(doc_id))
            .order(page_embeddings::page_number.asc())
            .load(&mut conn)
            .await
    }

    /// A single page row.
    pub async fn get_page(
        &self,
        doc_id: &str,
        page_number: u32,
    ) -> Result<Option<PageEmbeddingRecord>, DieselError> {
        let mut conn = self.pool.get().await?;
        page_embeddings::table
            .find((doc_id, page_number as i32))
            .first(&mut conn)
            .await
            .optional()
    }

    /// Document-embedding bookkeeping row.
    pub async fn get_document_embedding(
        &self,
        doc_id: &str,
    ) -> Result<Option<DocumentEmbeddingRecord>, DieselError> {
        let mut conn = self.pool.get().await?;
        document_embeddings::table
            .find(doc_id)
            .first(&mut conn)
            .await
            .optional()
    }

    /// Keyword search over filenames, titles, abstracts, and page text.
    pub async fn search(&self, query: &str, limit: i64) -> Result<Vec<Paper>, DieselError> {
        let mut conn = self.pool.get().await?;
        let pattern = format!("%{}%", query);

        let mut matched: Vec<String> = paper_metadata::table
            .filter(
                paper_metadata::title
                    .like(&pattern)
                    .or(paper_metadata::abstract_text.like(&pattern)),
            )
            .select(paper_metadata::doc_id)
            .load(&mut conn)
            .await?;

        let by_text: Vec<String> = page_embeddings::table
            .filter(page_embeddings::page_text.like(&pattern))
            .select(page_embeddings::doc_id)
            .distinct()
            .load(&mut conn)
            .await?;
        matched.extend(by_text);

        let records: Vec<PaperRecord> = papers::table
            .filter(
                papers::filename
                    .like(&pattern)
                    .or(papers::doc_id.eq_any(&matched)),
            )
            .order(papers::created_at.desc())
            .limit(limit)
            .load(&mut conn)
            .await?;
        Ok(records.into_iter().map(PaperRecord::into_model).collect())
    }

    /// Per-paper expectations for the consistency checker.
    pub async fn vector_expectations(&self) -> Result<Vec<PaperVectorExpectation>, DieselError> {
        let mut conn = self.pool.get().await?;

        let paper_rows: Vec<(String, String, i32)> = papers::table
            .select((papers::doc_id, papers::content_id, papers::pending_vector_sync))
            .load(&mut conn)
            .await?;

        let page_counts: Vec<(String, i64)> = page_embeddings::table
            .group_by(page_embeddings::doc_id)
            .select((page_embeddings::doc_id, diesel::dsl::count_star()))
            .load(&mut conn)
            .await?;
        let dims: Vec<(String, i32)> = document_embeddings::table
            .select((document_embeddings::doc_id, document_embeddings::vector_dim))
            .load(&mut conn)
            .await?;

        let count_map: std::collections::HashMap<_, _> = page_counts.into_iter().collect();
        let dim_map: std::collections::HashMap<_, _> = dims.into_iter().collect();

        Ok(paper_rows
            .into_iter()
            .map(|(doc_id, content_id, pending)| PaperVectorExpectation {
                page_count: count_map.get(&doc_id).copied().unwrap_or(0) as u32,
                vector_dim: dim_map.get(&doc_id).copied().unwrap_or(0) as u32,
                doc_id,
                content_id,
                pending_vector_sync: pending != 0,
            })
            .collect())
    }

    /// Content ids that appear on more than one paper. The unique index
    /// prevents this going forward; a restored backup may still carry it.
    pub async fn duplicate_content_ids(&self) -> Result<Vec<(String, i64)>, DieselError> {
        let mut conn = self.pool.get().await?;
        papers::table
            .group_by(papers::content_id)
            .select((papers::content_id, diesel::dsl::count_star()))
            .having(diesel::dsl::count_star().gt(1))
            .load(&mut conn)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentHash, FileHash, OcrQuality, SampleEmbeddingHash};
    use tempfile::tempdir;

    async fn test_repo() -> (PaperRepository, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite:{}", db_path.display());
        super::super::migrations::run_migrations(&url).await.unwrap();
        (PaperRepository::new(AsyncSqlitePool::from_path(&db_path)), dir)
    }

    fn bundle(doc_id: &str, content_id: &str, md5: &str) -> PaperBundle {
        let paper = Paper::new(doc_id.into(), content_id.into(), "a.pdf".into());
        let pages = vec![
            PageEmbedding {
                doc_id: doc_id.into(),
                page_number: 1,
                page_text: "first page".into(),
                model_name: "hash-embed-v1".into(),
                vector_dim: 4,
                vector: vec![0.5; 4],
            },
            PageEmbedding {
                doc_id: doc_id.into(),
                page_number: 2,
                page_text: "second page".into(),
                model_name: "hash-embed-v1".into(),
                vector_dim: 4,
                vector: vec![0.25; 4],
            },
        ];
        let document = DocumentEmbedding {
            doc_id: doc_id.into(),
            model_name: "hash-embed-v1".into(),
            vector_dim: 4,
            vector: vec![0.375; 4],
        };
        PaperBundle {
            file_hash: FileHash {
                doc_id: doc_id.into(),
                md5: md5.into(),
                file_size: 10,
                created_at: chrono::Utc::now(),
            },
            content_hash: ContentHash::compute(doc_id, "meta", &["first page".into()], 2),
            sample_hash: SampleEmbeddingHash::compute(doc_id, &[0.5, 0.25], "first_middle_last"),
            paper,
            pages,
            document,
            metadata: None,
            layout: None,
        }
    }

    #[tokio::test]
    async fn test_finalize_and_get() {
        let (repo, _dir) = test_repo().await;
        repo.finalize(&bundle("d1", &"a".repeat(64), "m1")).await.unwrap();

        let paper = repo.get("d1").await.unwrap().unwrap();
        assert_eq!(paper.content_id, "a".repeat(64));
        assert_eq!(paper.ocr_quality, OcrQuality::Unknown);

        let pages = repo.get_pages("d1").await.unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].page_number, 1);
        assert_eq!(pages[1].page_number, 2);
    }

    #[tokio::test]
    async fn test_content_id_unique_constraint() {
        let (repo, _dir) = test_repo().await;
        repo.finalize(&bundle("d1", &"a".repeat(64), "m1")).await.unwrap();

        let err = repo
            .finalize(&bundle("d2", &"a".repeat(64), "m2"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DieselError::DatabaseError(diesel::result::DatabaseErrorKind::UniqueViolation, _)
        ));

        // The losing transaction left nothing behind.
        assert!(repo.get("d2").await.unwrap().is_none());
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_hash_lookups() {
        let (repo, _dir) = test_repo().await;
        let b = bundle("d1", &"a".repeat(64), "m1");
        let content_sha = b.content_hash.sha256.clone();
        let sample_sha = b.sample_hash.sha256.clone();
        repo.finalize(&b).await.unwrap();

        assert_eq!(repo.find_by_file_hash("m1").await.unwrap(), Some("d1".into()));
        assert_eq!(repo.find_by_file_hash("nope").await.unwrap(), None);
        assert_eq!(
            repo.find_by_content_hash(&content_sha, 2).await.unwrap(),
            Some("d1".into())
        );
        // Same hash, different page count: not a match.
        assert_eq!(repo.find_by_content_hash(&content_sha, 3).await.unwrap(), None);
        assert_eq!(
            repo.find_by_sample_hash(&sample_sha).await.unwrap(),
            Some("d1".into())
        );
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let (repo, _dir) = test_repo().await;
        repo.finalize(&bundle("d1", &"a".repeat(64), "m1")).await.unwrap();
        repo.add_duplicate_reference("d1", "b.pdf", 0, None).await.unwrap();

        assert!(repo.delete("d1").await.unwrap());
        assert!(repo.get_pages("d1").await.unwrap().is_empty());
        assert_eq!(repo.find_by_file_hash("m1").await.unwrap(), None);
        assert!(repo.duplicate_references("d1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pending_vector_sync_marker() {
        let (repo, _dir) = test_repo().await;
        repo.finalize(&bundle("d1", &"a".repeat(64), "m1")).await.unwrap();

        repo.set_pending_vector_sync("d1", true).await.unwrap();
        assert_eq!(repo.list_pending_vector_sync().await.unwrap(), vec!["d1".to_string()]);

        repo.set_pending_vector_sync("d1", false).await.unwrap();
        assert!(repo.list_pending_vector_sync().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_vector_expectations() {
        let (repo, _dir) = test_repo().await;
        repo.finalize(&bundle("d1", &"a".repeat(64), "m1")).await.unwrap();

        let expectations = repo.vector_expectations().await.unwrap();
        assert_eq!(expectations.len(), 1);
        assert_eq!(expectations[0].page_count, 2);
        assert_eq!(expectations[0].vector_dim, 4);
        assert!(!expectations[0].pending_vector_sync);
    }
}
