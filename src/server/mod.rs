//! HTTP server for the ingestion system.
//!
//! The surface is deliberately small: upload/job/cancel around the job
//! engine, read endpoints over the two stores, search, and the admin
//! backup/consistency operations behind a bearer token.

mod admin;
mod handlers;
mod routes;

pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::adapters::{
    BreakerRegistry, LayoutClient, LlmExtractor, QualityClient, ALL_SERVICES, SERVICE_LAYOUT,
    SERVICE_LLM, SERVICE_OCR_QUALITY,
};
use crate::backup::{BackupService, ConsistencyChecker};
use crate::config::Settings;
use crate::dedup::DedupEngine;
use crate::embedder::{Embedder, HashEmbedder};
use crate::engine::JobEngine;
use crate::extract::MetadataCascade;
use crate::metrics::PerformanceTracker;
use crate::ocr::OcrEngine;
use crate::pipeline::Orchestrator;
use crate::repository::{DbContext, PaperRepository};
use crate::security::{FileValidator, UploadRateLimiter};
use crate::storage::DataLayout;
use crate::vector::VectorIndex;

/// Shared state for the web server. Everything is cheaply cloneable;
/// the heavyweight pieces sit behind `Arc`s built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<JobEngine>,
    pub papers: PaperRepository,
    pub vectors: Arc<VectorIndex>,
    pub embedder: Arc<dyn Embedder>,
    pub breakers: Arc<BreakerRegistry>,
    pub backups: Arc<BackupService>,
    pub checker: Arc<ConsistencyChecker>,
    pub tracker: Arc<PerformanceTracker>,
    pub rate_limiter: Arc<UploadRateLimiter>,
    pub paths: DataLayout,
    pub admin_token: Option<String>,
    /// Request body cap for the upload endpoints; slightly above the
    /// validator's limit so oversized files reach it and get a 413 with
    /// a reason instead of a bare connection error.
    pub max_body_bytes: usize,
}

impl AppState {
    /// Wire the full object graph from settings. Expects migrations to
    /// have run already.
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let paths = settings.data_layout();
        paths.ensure_directories()?;

        let ctx = DbContext::from_path(&paths.database_path());
        let papers = ctx.papers();

        let vectors = Arc::new(VectorIndex::open(&paths.vector_dir())?);
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::default());
        let tracker = Arc::new(PerformanceTracker::new());

        let breakers = Arc::new(BreakerRegistry::new(
            settings.breaker_config(),
            &ALL_SERVICES,
        ));
        let retry = settings.retry_policy();
        let quality = Arc::new(QualityClient::new(
            settings.quality.clone(),
            breakers.get(SERVICE_OCR_QUALITY).expect("registered service"),
            retry.clone(),
        ));
        let layout_client = Arc::new(LayoutClient::new(
            settings.layout.clone(),
            breakers.get(SERVICE_LAYOUT).expect("registered service"),
            retry.clone(),
        ));
        let llm = Arc::new(LlmExtractor::new(
            settings.llm.clone(),
            breakers.get(SERVICE_LLM).expect("registered service"),
            retry,
        ));

        let dedup = Arc::new(DedupEngine::new(
            papers.clone(),
            vectors.clone(),
            embedder.clone(),
            settings.dedup.l3_threshold,
        ));

        let orchestrator = Arc::new(Orchestrator::new(
            paths.clone(),
            papers.clone(),
            vectors.clone(),
            embedder.clone(),
            dedup,
            OcrEngine::new(),
            quality,
            layout_client,
            MetadataCascade::new(llm),
            tracker.clone(),
        ));

        let validator = FileValidator::new(settings.upload.clone(), paths.quarantine_dir());
        let engine = JobEngine::new(
            settings.engine_config(),
            ctx.jobs(),
            validator,
            paths.clone(),
            orchestrator,
        );

        let backups = Arc::new(BackupService::new(
            paths.clone(),
            ctx.backups(),
            settings.backup.clone(),
        ));
        let checker = Arc::new(ConsistencyChecker::new(
            papers.clone(),
            vectors.clone(),
            embedder.clone(),
        ));

        Ok(Self {
            engine,
            papers,
            vectors,
            embedder,
            breakers,
            backups,
            checker,
            tracker,
            rate_limiter: Arc::new(UploadRateLimiter::new(settings.rate.clone())),
            paths,
            admin_token: settings.admin_token.clone(),
            max_body_bytes: ((settings.upload.max_mb + 8) * 1024 * 1024) as usize,
        })
    }
}

/// Start the web server and all background tasks.
pub async fn serve(settings: &Settings) -> anyhow::Result<()> {
    crate::repository::migrations::run_migrations(&settings.database_url()).await?;

    let state = AppState::from_settings(settings)?;
    state.engine.start().await;
    tokio::spawn(crate::metrics::run_sampler(state.tracker.clone()));
    tokio::spawn(state.backups.clone().run_scheduler());
    tokio::spawn({
        let limiter = state.rate_limiter.clone();
        async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60 * 60));
            loop {
                interval.tick().await;
                limiter.prune();
            }
        }
    });

    let app = create_router(state);
    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port).parse()?;
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
