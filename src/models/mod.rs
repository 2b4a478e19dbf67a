//! Domain models for papers, embeddings, jobs, and backups.

pub mod backup;
pub mod embedding;
pub mod hashes;
pub mod job;
pub mod layout;
pub mod metadata;
pub mod paper;

pub use backup::{BackupRecord, BackupSource, BackupStatus, BackupType};
pub use embedding::{
    content_id_from_vector, cosine_similarity, l2_normalize, mean_vector, vector_bytes_le,
    DocumentEmbedding, PageEmbedding,
};
pub use hashes::{normalize, ContentHash, DuplicateReference, FileHash, SampleEmbeddingHash};
pub use job::{JobPriority, JobStatus, ProcessingJob, StepCompleted, StepFailed};
pub use layout::LayoutAnalysis;
pub use metadata::{ExtractionTier, PaperMetadata};
pub use paper::{OcrQuality, Paper};
