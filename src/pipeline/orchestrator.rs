//! Pipeline orchestrator: drives a job through the seven stages.
//!
//! Stages within a job run sequentially; the only concurrency is
//! between jobs. Must-succeed stages abort the job on failure, optional
//! stages degrade into a `steps_failed` entry. The duplicate tiers are
//! interleaved at the points where their inputs become available.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;

use super::Stage;
use crate::adapters::{LayoutClient, QualityClient};
use crate::dedup::{DedupEngine, DedupHit};
use crate::embedder::Embedder;
use crate::error::{ProcessingError, Result};
use crate::extract::MetadataCascade;
use crate::metrics::PerformanceTracker;
use crate::models::{
    content_id_from_vector, mean_vector, DocumentEmbedding, JobStatus, LayoutAnalysis,
    PageEmbedding, Paper, PaperMetadata, ProcessingJob, StepCompleted, StepFailed,
};
use crate::ocr::{OcrEngine, OcrError};
use crate::pdf;
use crate::repository::{PaperBundle, PaperRepository};
use crate::storage::DataLayout;
use crate::vector::{VectorEntry, VectorIndex};

/// Where the orchestrator publishes job-state transitions. The job
/// engine merges them into its live status map and the durable record.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn publish(&self, job: &ProcessingJob);
}

/// A sink that drops updates, for tests and one-shot CLI runs.
pub struct NoopSink;

#[async_trait]
impl ProgressSink for NoopSink {
    async fn publish(&self, _job: &ProcessingJob) {}
}

/// Everything a worker needs to process one document.
pub struct Orchestrator {
    paths: DataLayout,
    papers: PaperRepository,
    vectors: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    dedup: Arc<DedupEngine>,
    ocr: OcrEngine,
    quality: Arc<QualityClient>,
    layout: Arc<LayoutClient>,
    metadata: MetadataCascade,
    tracker: Arc<PerformanceTracker>,
}

/// State accumulated while a job moves through the stages.
#[derive(Default)]
struct StageContext {
    bytes: Vec<u8>,
    doc_id: String,
    page_count: u32,
    pdf_metadata: String,
    pages: Vec<String>,
    paper: Option<Paper>,
    page_vectors: Vec<Vec<f32>>,
    doc_vector: Vec<f32>,
    layout: Option<LayoutAnalysis>,
    extracted: Option<PaperMetadata>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        paths: DataLayout,
        papers: PaperRepository,
        vectors: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        dedup: Arc<DedupEngine>,
        ocr: OcrEngine,
        quality: Arc<QualityClient>,
        layout: Arc<LayoutClient>,
        metadata: MetadataCascade,
        tracker: Arc<PerformanceTracker>,
    ) -> Self {
        Self {
            paths,
            papers,
            vectors,
            embedder,
            dedup,
            ocr,
            quality,
            layout,
            metadata,
            tracker,
        }
    }

    /// Drive a job to a terminal state. Never panics the worker: every
    /// failure lands in the job's status.
    pub async fn run(&self, mut job: ProcessingJob, sink: &dyn ProgressSink) -> ProcessingJob {
        job.started_at = Some(Utc::now());
        self.tracker.job_started();

        let mut ctx = StageContext::default();
        let outcome = self.run_stages(&mut job, &mut ctx, sink).await;

        if let Err((stage, error)) = outcome {
            tracing::warn!(
                "Job {} failed at stage {}: {}",
                job.job_id,
                stage.name(),
                error
            );
            self.tracker.record_error(error.kind_str());
            job.status = JobStatus::Failed {
                kind: error.kind_str().to_string(),
                message: error.to_string(),
            };
            job.error_message = Some(format!("{}: {}", error.kind_str(), error));
            job.current_step = None;
            job.completed_at = Some(Utc::now());
            self.cleanup_artifacts(&ctx.doc_id);
        }

        let _ = std::fs::remove_file(&job.upload_path);
        self.tracker.job_finished();
        sink.publish(&job).await;
        job
    }

    async fn run_stages(
        &self,
        job: &mut ProcessingJob,
        ctx: &mut StageContext,
        sink: &dyn ProgressSink,
    ) -> std::result::Result<(), (Stage, ProcessingError)> {
        for stage in Stage::all() {
            self.start_stage(job, stage, sink).await;
            let started = Instant::now();

            let result = match stage {
                Stage::PersistUpload => self.stage_persist_upload(job, ctx).await,
                Stage::Ocr => self.stage_ocr(ctx).await,
                Stage::QualityAssessment => self.stage_quality(ctx).await,
                Stage::Embedding => self.stage_embedding(ctx).await,
                Stage::LayoutAnalysis => self.stage_layout(ctx).await,
                Stage::MetadataExtraction => self.stage_metadata(ctx).await,
                Stage::Finalize => self.stage_finalize(job, ctx).await,
            };

            let duration = started.elapsed();
            match result {
                Ok(StageOutcome::Continue) => {
                    self.tracker.record_stage(stage.name(), duration, true);
                    complete_step(job, stage, duration.as_secs_f64());
                    sink.publish(job).await;
                }
                Ok(StageOutcome::Duplicate(hit)) => {
                    self.tracker.record_stage(stage.name(), duration, true);
                    complete_step(job, stage, duration.as_secs_f64());
                    self.complete_as_duplicate(job, ctx, hit).await;
                    sink.publish(job).await;
                    return Ok(());
                }
                Err(e) if stage.must_succeed() => {
                    self.tracker.record_stage(stage.name(), duration, false);
                    return Err((stage, e));
                }
                Err(e) => {
                    // Optional stage: record and continue.
                    self.tracker.record_stage(stage.name(), duration, false);
                    self.tracker.record_error(e.kind_str());
                    tracing::info!(
                        "Optional stage {} skipped for job {}: {}",
                        stage.name(),
                        job.job_id,
                        e
                    );
                    job.steps_failed.push(StepFailed {
                        name: stage.name().to_string(),
                        reason: e.kind_str().to_string(),
                    });
                    if let Some(paper) = &mut ctx.paper {
                        paper.add_note(&format!("{} skipped: {}", stage.name(), e.kind_str()));
                    }
                    job.progress_percentage =
                        (job.progress_percentage + stage.weight()).min(100);
                    sink.publish(job).await;
                }
            }
        }

        Ok(())
    }

    async fn start_stage(&self, job: &mut ProcessingJob, stage: Stage, sink: &dyn ProgressSink) {
        job.status = JobStatus::Processing {
            step: stage.name().to_string(),
        };
        job.current_step = Some(stage.name().to_string());
        sink.publish(job).await;
    }

    /// Stage 1: stage the upload into the document store and set up the
    /// paper. Level-0 dedup runs first, on the raw bytes.
    async fn stage_persist_upload(
        &self,
        job: &ProcessingJob,
        ctx: &mut StageContext,
    ) -> Result<StageOutcome> {
        ctx.bytes = std::fs::read(&job.upload_path).map_err(|e| {
            ProcessingError::Internal(format!("staged upload unreadable: {}", e))
        })?;

        if let Some(hit) = self.dedup.check_file_hash(&ctx.bytes).await? {
            return Ok(StageOutcome::Duplicate(hit));
        }

        let info = pdf::read_info(&ctx.bytes)
            .map_err(|e| ProcessingError::InvalidInput(e.to_string()))?;
        ctx.page_count = info.page_count;
        ctx.pdf_metadata = info.metadata;
        ctx.doc_id = uuid::Uuid::new_v4().to_string();

        let pdf_path = self.paths.pdf_path(&ctx.doc_id);
        std::fs::write(&pdf_path, &ctx.bytes)?;

        // First-page preview is best effort; a missing renderer must not
        // fail ingestion.
        match self.render_preview(&ctx.doc_id) {
            Ok(()) => {}
            Err(e) => tracing::debug!("Preview rendering failed for {}: {}", ctx.doc_id, e),
        }

        ctx.paper = Some(Paper::new(
            ctx.doc_id.clone(),
            String::new(),
            job.filename.clone(),
        ));
        Ok(StageOutcome::Continue)
    }

    fn render_preview(&self, doc_id: &str) -> Result<()> {
        let workdir = tempfile::TempDir::new()?;
        let image = pdf::render_page_png(&self.paths.pdf_path(doc_id), 1, workdir.path(), 150)
            .map_err(|e| ProcessingError::Internal(e.to_string()))?;
        std::fs::copy(&image, self.paths.preview_path(doc_id))?;
        Ok(())
    }

    /// Stage 2: text extraction, with OCR when the text layer is
    /// unusable. Levels 1 and 2 run once page text exists.
    async fn stage_ocr(&self, ctx: &mut StageContext) -> Result<StageOutcome> {
        let extracted = pdf::extract_page_texts(&ctx.bytes).unwrap_or_else(|e| {
            tracing::debug!("Text-layer extraction failed, treating as scan: {}", e);
            Vec::new()
        });

        if pdf::has_usable_text_layer(&extracted) {
            ctx.pages = extracted;
        } else {
            self.run_ocr(ctx).await?;
        }

        // Page texts must line up 1..=page_count.
        ctx.pages.resize(ctx.page_count as usize, String::new());

        if let Some(hit) = self
            .dedup
            .check_content_hash(&ctx.pdf_metadata, &ctx.pages, ctx.page_count)
            .await?
        {
            return Ok(StageOutcome::Duplicate(hit));
        }
        if let Some(hit) = self.dedup.check_sample_hash(&ctx.pages).await? {
            return Ok(StageOutcome::Duplicate(hit));
        }

        Ok(StageOutcome::Continue)
    }

    async fn run_ocr(&self, ctx: &mut StageContext) -> Result<()> {
        if !self.ocr.is_available() {
            return Err(ProcessingError::Internal(
                "OCR required but tesseract/pdftoppm not installed".into(),
            ));
        }

        let pdf_path = self.paths.pdf_path(&ctx.doc_id);
        let doc_id = ctx.doc_id.clone();
        let page_count = ctx.page_count;

        let guess = self
            .ocr
            .detect_language(&pdf_path)
            .map_err(map_ocr_error)?;
        let language = self.pick_language(&pdf_path, guess).await;

        // Tesseract calls are blocking; keep them off the async runtime.
        let ocr = OcrEngine::new();
        let pdf_path_owned = pdf_path.clone();
        let language_owned = language.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            ocr.ocr_document(&pdf_path_owned, page_count, &language_owned)
        })
        .await
        .map_err(|e| ProcessingError::Internal(format!("OCR task panicked: {}", e)))?
        .map_err(map_ocr_error)?;

        ctx.pages = outcome.pages;

        if let Some(regenerated) = outcome.regenerated_pdf {
            // Preserve the original before replacing the text layer.
            let original_path = self.paths.original_path(&doc_id);
            std::fs::rename(&pdf_path, &original_path)?;
            std::fs::copy(&regenerated, &pdf_path)?;
            let _ = std::fs::remove_file(&regenerated);

            if let Some(paper) = &mut ctx.paper {
                paper.ocr_regenerated = true;
                paper.original_file_path = Some(original_path);
                paper.add_note(&format!("text layer regenerated via OCR ({})", language));
            }
        } else if let Some(paper) = &mut ctx.paper {
            paper.add_note(&format!("OCR text extracted ({})", language));
        }

        Ok(())
    }

    /// Resolve an ambiguous script to one language, using the quality
    /// scorer on first-page samples as the tiebreaker.
    async fn pick_language(
        &self,
        pdf_path: &std::path::Path,
        guess: crate::ocr::LanguageGuess,
    ) -> String {
        let fallback = guess.candidates[0].to_string();
        if !guess.is_ambiguous() || !self.quality.is_enabled() {
            return fallback;
        }

        let mut samples = Vec::new();
        for language in guess.candidates.iter().take(2) {
            match self.ocr.ocr_first_page(pdf_path, language) {
                Ok(text) => samples.push((language.to_string(), text)),
                Err(e) => tracing::debug!("Language sample OCR failed for {}: {}", language, e),
            }
        }

        match self.quality.pick_best_language(&samples).await {
            Some(language) => language,
            None => fallback,
        }
    }

    /// Stage 3 (optional): grade the text layer.
    async fn stage_quality(&self, ctx: &mut StageContext) -> Result<StageOutcome> {
        let sample = ctx
            .pages
            .first()
            .map(String::as_str)
            .unwrap_or_default();
        let assessment = self.quality.assess(sample).await?;
        if let Some(paper) = &mut ctx.paper {
            paper.ocr_quality = assessment.quality;
        }
        Ok(StageOutcome::Continue)
    }

    /// Stage 4: per-page embeddings, the document mean, and the content
    /// id. Level-3 dedup runs against the finished document vector.
    async fn stage_embedding(&self, ctx: &mut StageContext) -> Result<StageOutcome> {
        ctx.page_vectors = self.embedder.embed_batch(&ctx.pages);
        ctx.doc_vector = mean_vector(&ctx.page_vectors)
            .ok_or_else(|| ProcessingError::Internal("document has no page vectors".into()))?;

        let content_id = content_id_from_vector(&ctx.doc_vector);
        if let Some(paper) = &mut ctx.paper {
            paper.content_id = content_id;
        }

        if let Some(hit) = self.dedup.check_vector_similarity(&ctx.doc_vector).await? {
            return Ok(StageOutcome::Duplicate(hit));
        }
        Ok(StageOutcome::Continue)
    }

    /// Stage 5 (optional): layout analysis.
    async fn stage_layout(&self, ctx: &mut StageContext) -> Result<StageOutcome> {
        let payload = self.layout.analyze(&ctx.pages).await?;
        ctx.layout = Some(LayoutAnalysis::new(
            ctx.doc_id.clone(),
            ctx.page_count,
            payload,
        ));
        Ok(StageOutcome::Continue)
    }

    /// Stage 6 (optional): metadata cascade. Absent metadata is not an
    /// error; tier failures were already logged by the cascade.
    async fn stage_metadata(&self, ctx: &mut StageContext) -> Result<StageOutcome> {
        ctx.extracted = self.metadata.extract(&ctx.doc_id, &ctx.pages).await;
        if ctx.extracted.is_none() {
            if let Some(paper) = &mut ctx.paper {
                paper.add_note("no metadata extracted");
            }
        }
        Ok(StageOutcome::Continue)
    }

    /// Stage 7: one relational transaction, then the vector upsert.
    async fn stage_finalize(
        &self,
        job: &mut ProcessingJob,
        ctx: &mut StageContext,
    ) -> Result<StageOutcome> {
        let paper = ctx
            .paper
            .take()
            .ok_or_else(|| ProcessingError::Internal("paper context missing".into()))?;
        let doc_id = paper.doc_id.clone();
        let content_id = paper.content_id.clone();
        let model_name = self.embedder.model_name().to_string();
        let vector_dim = self.embedder.dim();

        let pages: Vec<PageEmbedding> = ctx
            .pages
            .iter()
            .zip(&ctx.page_vectors)
            .enumerate()
            .map(|(i, (text, vector))| PageEmbedding {
                doc_id: doc_id.clone(),
                page_number: (i + 1) as u32,
                page_text: text.clone(),
                model_name: model_name.clone(),
                vector_dim,
                vector: vector.clone(),
            })
            .collect();

        let bundle = PaperBundle {
            file_hash: self.dedup.file_hash_for(&doc_id, &ctx.bytes),
            content_hash: self.dedup.content_hash_for(
                &doc_id,
                &ctx.pdf_metadata,
                &ctx.pages,
                ctx.page_count,
            ),
            sample_hash: self.dedup.sample_hash_for(&doc_id, &ctx.pages),
            document: DocumentEmbedding {
                doc_id: doc_id.clone(),
                model_name: model_name.clone(),
                vector_dim,
                vector: ctx.doc_vector.clone(),
            },
            metadata: ctx.extracted.clone(),
            layout: ctx.layout.clone(),
            paper,
            pages,
        };

        match self.papers.finalize(&bundle).await {
            Ok(()) => {}
            Err(diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                info,
            )) if info.message().contains("content_id") => {
                // Another job committed identical content first. Convert
                // this upload into a Level-3 duplicate reference.
                let existing = self
                    .papers
                    .get_by_content_id(&content_id)
                    .await
                    .map_err(ProcessingError::from)?
                    .ok_or_else(|| {
                        ProcessingError::DataIntegrity(
                            "content_id conflict but no owning paper".into(),
                        )
                    })?;
                return Ok(StageOutcome::Duplicate(DedupHit {
                    doc_id: existing.doc_id,
                    tier: 3,
                    similarity: Some(1.0),
                }));
            }
            Err(e) => return Err(e.into()),
        }

        // The vector store write is deliberately outside the relational
        // transaction; a failure here is what pending_vector_sync marks.
        let mut page_map = BTreeMap::new();
        for (i, vector) in ctx.page_vectors.iter().enumerate() {
            page_map.insert((i + 1) as u32, vector.clone());
        }
        let entry = VectorEntry {
            doc_id: doc_id.clone(),
            content_id,
            model_name,
            vector_dim,
            document: ctx.doc_vector.clone(),
            pages: page_map,
            created_at: Utc::now(),
        };
        if let Err(e) = self.vectors.upsert(entry).await {
            tracing::warn!("Vector upsert failed for {}, marking for sync: {}", doc_id, e);
            self.papers
                .set_pending_vector_sync(&doc_id, true)
                .await
                .map_err(ProcessingError::from)?;
        }

        job.paper_id = Some(doc_id.clone());
        job.status = JobStatus::Completed { paper_id: doc_id };
        job.progress_percentage = 100;
        job.current_step = None;
        job.completed_at = Some(Utc::now());
        Ok(StageOutcome::Continue)
    }

    /// Resolve the job against an already-ingested paper.
    async fn complete_as_duplicate(
        &self,
        job: &mut ProcessingJob,
        ctx: &mut StageContext,
        hit: DedupHit,
    ) {
        if let Err(e) = self
            .papers
            .add_duplicate_reference(&hit.doc_id, &job.filename, hit.tier, hit.similarity)
            .await
        {
            tracing::warn!("Failed to record duplicate reference: {}", e);
        }

        // Stages after the hit were skipped to the cached result.
        for stage in Stage::all() {
            let name = stage.name();
            let seen = job.steps_completed.iter().any(|s| s.name == name)
                || job.steps_failed.iter().any(|s| s.name == name);
            if !seen {
                job.steps_completed.push(StepCompleted {
                    name: name.to_string(),
                    duration_s: 0.0,
                });
            }
        }

        tracing::info!(
            "Job {} resolved as level-{} duplicate of {}",
            job.job_id,
            hit.tier,
            hit.doc_id
        );
        self.cleanup_artifacts(&ctx.doc_id);
        job.paper_id = Some(hit.doc_id.clone());
        job.status = JobStatus::Completed { paper_id: hit.doc_id };
        job.progress_percentage = 100;
        job.current_step = None;
        job.completed_at = Some(Utc::now());
    }

    /// Remove files staged for a document that will not become a paper.
    fn cleanup_artifacts(&self, doc_id: &str) {
        if doc_id.is_empty() {
            return;
        }
        let _ = std::fs::remove_file(self.paths.pdf_path(doc_id));
        let _ = std::fs::remove_file(self.paths.preview_path(doc_id));
        let _ = std::fs::remove_file(self.paths.original_path(doc_id));
    }
}

enum StageOutcome {
    Continue,
    Duplicate(DedupHit),
}

fn map_ocr_error(e: OcrError) -> ProcessingError {
    ProcessingError::Internal(e.to_string())
}

fn complete_step(job: &mut ProcessingJob, stage: Stage, duration_s: f64) {
    job.steps_completed.push(StepCompleted {
        name: stage.name().to_string(),
        duration_s,
    });
    if !matches!(job.status, JobStatus::Completed { .. }) {
        job.progress_percentage = (job.progress_percentage + stage.weight()).min(100);
    } else {
        job.progress_percentage = 100;
    }
}
