//! Diesel ORM models for database tables.
//!
//! These models provide compile-time type checking for database
//! operations. Conversions to and from the domain models live here so
//! repositories stay query-focused.

use diesel::prelude::*;

use super::{parse_datetime, parse_datetime_opt};
use crate::models::{
    BackupRecord, BackupSource, BackupStatus, BackupType, ContentHash, DuplicateReference,
    ExtractionTier, FileHash, JobPriority, JobStatus, LayoutAnalysis, OcrQuality, Paper,
    PaperMetadata, ProcessingJob, SampleEmbeddingHash,
};
use crate::schema;

/// Paper record from the database.
#[derive(Queryable, Selectable, Identifiable, Insertable, Debug, Clone)]
#[diesel(table_name = schema::papers)]
#[diesel(primary_key(doc_id))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PaperRecord {
    pub doc_id: String,
    pub content_id: String,
    pub filename: String,
    pub ocr_quality: String,
    pub ocr_regenerated: i32,
    pub original_file_path: Option<String>,
    pub processing_notes: Option<String>,
    pub pending_vector_sync: i32,
    pub created_at: String,
    pub updated_at: String,
}

impl PaperRecord {
    pub fn from_model(paper: &Paper) -> Self {
        Self {
            doc_id: paper.doc_id.clone(),
            content_id: paper.content_id.clone(),
            filename: paper.filename.clone(),
            ocr_quality: paper.ocr_quality.as_str().to_string(),
            ocr_regenerated: paper.ocr_regenerated as i32,
            original_file_path: paper
                .original_file_path
                .as_ref()
                .map(|p| p.display().to_string()),
            processing_notes: paper.processing_notes.clone(),
            pending_vector_sync: paper.pending_vector_sync as i32,
            created_at: paper.created_at.to_rfc3339(),
            updated_at: paper.updated_at.to_rfc3339(),
        }
    }

    pub fn into_model(self) -> Paper {
        Paper {
            doc_id: self.doc_id,
            content_id: self.content_id,
            filename: self.filename,
            ocr_quality: OcrQuality::from_str(&self.ocr_quality).unwrap_or(OcrQuality::Unknown),
            ocr_regenerated: self.ocr_regenerated != 0,
            original_file_path: self.original_file_path.map(Into::into),
            processing_notes: self.processing_notes,
            pending_vector_sync: self.pending_vector_sync != 0,
            created_at: parse_datetime(&self.created_at),
            updated_at: parse_datetime(&self.updated_at),
        }
    }
}

/// Page embedding row. Vectors live in the vector store; the relational
/// side keeps the page text and the dimensions needed to rebuild them.
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = schema::page_embeddings)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PageEmbeddingRecord {
    pub doc_id: String,
    pub page_number: i32,
    pub page_text: String,
    pub model_name: String,
    pub vector_dim: i32,
}

/// Document embedding row (vector itself is in the vector store).
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = schema::document_embeddings)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DocumentEmbeddingRecord {
    pub doc_id: String,
    pub model_name: String,
    pub vector_dim: i32,
    pub created_at: String,
}

/// Metadata record from the database.
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = schema::paper_metadata)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct MetadataRecord {
    pub doc_id: String,
    pub title: Option<String>,
    pub authors: String,
    pub journal: Option<String>,
    pub year: Option<i32>,
    pub doi: Option<String>,
    pub abstract_text: Option<String>,
    pub tier: String,
    pub created_at: String,
}

impl MetadataRecord {
    pub fn from_model(metadata: &PaperMetadata) -> Self {
        Self {
            doc_id: metadata.doc_id.clone(),
            title: metadata.title.clone(),
            authors: serde_json::to_string(&metadata.authors).unwrap_or_else(|_| "[]".into()),
            journal: metadata.journal.clone(),
            year: metadata.year,
            doi: metadata.doi.clone(),
            abstract_text: metadata.abstract_text.clone(),
            tier: metadata.tier.as_str().to_string(),
            created_at: metadata.created_at.to_rfc3339(),
        }
    }

    pub fn into_model(self) -> PaperMetadata {
        PaperMetadata {
            doc_id: self.doc_id,
            title: self.title,
            authors: serde_json::from_str(&self.authors).unwrap_or_default(),
            journal: self.journal,
            year: self.year,
            doi: self.doi,
            abstract_text: self.abstract_text,
            tier: ExtractionTier::from_str(&self.tier).unwrap_or(ExtractionTier::RuleBased),
            created_at: parse_datetime(&self.created_at),
        }
    }
}

/// Layout record from the database.
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = schema::layout_analyses)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct LayoutRecord {
    pub doc_id: String,
    pub page_count: i32,
    pub layout_json: String,
    pub created_at: String,
}

impl LayoutRecord {
    pub fn from_model(layout: &LayoutAnalysis) -> Self {
        Self {
            doc_id: layout.doc_id.clone(),
            page_count: layout.page_count as i32,
            layout_json: layout.layout_json.to_string(),
            created_at: layout.created_at.to_rfc3339(),
        }
    }

    pub fn into_model(self) -> LayoutAnalysis {
        LayoutAnalysis {
            doc_id: self.doc_id,
            page_count: self.page_count as u32,
            layout_json: serde_json::from_str(&self.layout_json)
                .unwrap_or(serde_json::Value::Null),
            created_at: parse_datetime(&self.created_at),
        }
    }
}

/// File hash row (Level 0).
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = schema::file_hashes)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct FileHashRecord {
    pub doc_id: String,
    pub md5: String,
    pub file_size: i64,
    pub created_at: String,
}

impl FileHashRecord {
    pub fn from_model(hash: &FileHash) -> Self {
        Self {
            doc_id: hash.doc_id.clone(),
            md5: hash.md5.clone(),
            file_size: hash.file_size as i64,
            created_at: hash.created_at.to_rfc3339(),
        }
    }
}

/// Content hash row (Level 1).
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = schema::content_hashes)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ContentHashRecord {
    pub doc_id: String,
    pub sha256: String,
    pub page_count: i32,
    pub created_at: String,
}

impl ContentHashRecord {
    pub fn from_model(hash: &ContentHash) -> Self {
        Self {
            doc_id: hash.doc_id.clone(),
            sha256: hash.sha256.clone(),
            page_count: hash.page_count as i32,
            created_at: hash.created_at.to_rfc3339(),
        }
    }
}

/// Sample embedding hash row (Level 2).
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = schema::sample_embedding_hashes)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SampleHashRecord {
    pub doc_id: String,
    pub sha256: String,
    pub sample_strategy: String,
    pub vector_dim: i32,
    pub created_at: String,
}

impl SampleHashRecord {
    pub fn from_model(hash: &SampleEmbeddingHash) -> Self {
        Self {
            doc_id: hash.doc_id.clone(),
            sha256: hash.sha256.clone(),
            sample_strategy: hash.sample_strategy.clone(),
            vector_dim: hash.vector_dim as i32,
            created_at: hash.created_at.to_rfc3339(),
        }
    }
}

/// Duplicate reference row for reads.
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = schema::duplicate_references)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DuplicateReferenceRecord {
    pub id: i32,
    pub doc_id: String,
    pub uploaded_filename: String,
    pub matched_tier: i32,
    pub similarity: Option<f32>,
    pub created_at: String,
}

impl DuplicateReferenceRecord {
    pub fn into_model(self) -> DuplicateReference {
        DuplicateReference {
            id: self.id as i64,
            doc_id: self.doc_id,
            uploaded_filename: self.uploaded_filename,
            matched_tier: self.matched_tier,
            similarity: self.similarity,
            created_at: parse_datetime(&self.created_at),
        }
    }
}

/// New duplicate reference for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::duplicate_references)]
pub struct NewDuplicateReference {
    pub doc_id: String,
    pub uploaded_filename: String,
    pub matched_tier: i32,
    pub similarity: Option<f32>,
    pub created_at: String,
}

/// Processing job record from the database.
#[derive(Queryable, Selectable, Identifiable, Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = schema::processing_jobs)]
#[diesel(primary_key(job_id))]
#[diesel(treat_none_as_null = true)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct JobRecord {
    pub job_id: String,
    pub filename: String,
    pub priority: String,
    pub status: String,
    pub progress_percentage: i32,
    pub current_step: Option<String>,
    pub steps_completed: String,
    pub steps_failed: String,
    pub error_message: Option<String>,
    pub paper_id: Option<String>,
    pub upload_path: String,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl JobRecord {
    pub fn from_model(job: &ProcessingJob) -> Self {
        let (paper_id, error_message) = match &job.status {
            JobStatus::Completed { paper_id } => (Some(paper_id.clone()), None),
            JobStatus::Failed { kind, message } => {
                (None, Some(format!("{}: {}", kind, message)))
            }
            _ => (job.paper_id.clone(), job.error_message.clone()),
        };
        let current_step = match &job.status {
            JobStatus::Processing { step } => Some(step.clone()),
            _ => job.current_step.clone(),
        };
        Self {
            job_id: job.job_id.clone(),
            filename: job.filename.clone(),
            priority: job.priority.as_str().to_string(),
            status: job.status.as_str().to_string(),
            progress_percentage: job.progress_percentage as i32,
            current_step,
            steps_completed: serde_json::to_string(&job.steps_completed)
                .unwrap_or_else(|_| "[]".into()),
            steps_failed: serde_json::to_string(&job.steps_failed)
                .unwrap_or_else(|_| "[]".into()),
            error_message,
            paper_id,
            upload_path: job.upload_path.display().to_string(),
            created_at: job.created_at.to_rfc3339(),
            started_at: job.started_at.map(|t| t.to_rfc3339()),
            completed_at: job.completed_at.map(|t| t.to_rfc3339()),
        }
    }

    pub fn into_model(self) -> ProcessingJob {
        let status = match self.status.as_str() {
            "uploaded" => JobStatus::Uploaded,
            "queued" => JobStatus::Queued,
            "processing" => JobStatus::Processing {
                step: self.current_step.clone().unwrap_or_default(),
            },
            "completed" => JobStatus::Completed {
                paper_id: self.paper_id.clone().unwrap_or_default(),
            },
            "failed" => {
                let raw = self.error_message.clone().unwrap_or_default();
                let (kind, message) = match raw.split_once(": ") {
                    Some((k, m)) => (k.to_string(), m.to_string()),
                    None => ("internal".to_string(), raw),
                };
                JobStatus::Failed { kind, message }
            }
            "cancelled" => JobStatus::Cancelled,
            _ => JobStatus::Uploaded,
        };
        ProcessingJob {
            job_id: self.job_id,
            filename: self.filename,
            priority: JobPriority::from_str(&self.priority).unwrap_or(JobPriority::Normal),
            status,
            progress_percentage: self.progress_percentage.clamp(0, 100) as u8,
            current_step: self.current_step,
            steps_completed: serde_json::from_str(&self.steps_completed).unwrap_or_default(),
            steps_failed: serde_json::from_str(&self.steps_failed).unwrap_or_default(),
            error_message: self.error_message,
            paper_id: self.paper_id,
            upload_path: self.upload_path.into(),
            created_at: parse_datetime(&self.created_at),
            started_at: parse_datetime_opt(self.started_at),
            completed_at: parse_datetime_opt(self.completed_at),
        }
    }
}

/// Backup record from the database.
#[derive(Queryable, Selectable, Identifiable, Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = schema::backup_records)]
#[diesel(primary_key(backup_id))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct BackupRecordRow {
    pub backup_id: String,
    pub backup_type: String,
    pub source: String,
    pub timestamp: String,
    pub artifact_path: String,
    pub size_bytes: i64,
    pub checksum: String,
    pub status: String,
    pub expire_date: String,
}

impl BackupRecordRow {
    pub fn from_model(record: &BackupRecord) -> Self {
        Self {
            backup_id: record.backup_id.clone(),
            backup_type: record.backup_type.as_str().to_string(),
            source: record.source.as_str().to_string(),
            timestamp: record.timestamp.to_rfc3339(),
            artifact_path: record.artifact_path.clone(),
            size_bytes: record.size_bytes as i64,
            checksum: record.checksum.clone(),
            status: record.status.as_str().to_string(),
            expire_date: record.expire_date.to_rfc3339(),
        }
    }

    pub fn into_model(self) -> BackupRecord {
        BackupRecord {
            backup_id: self.backup_id,
            backup_type: BackupType::from_str(&self.backup_type).unwrap_or(BackupType::Snapshot),
            source: BackupSource::from_str(&self.source).unwrap_or(BackupSource::Sqlite),
            timestamp: parse_datetime(&self.timestamp),
            artifact_path: self.artifact_path,
            size_bytes: self.size_bytes as u64,
            checksum: self.checksum,
            status: BackupStatus::from_str(&self.status).unwrap_or(BackupStatus::Failed),
            expire_date: parse_datetime(&self.expire_date),
        }
    }
}
