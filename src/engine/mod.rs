//! Asynchronous job engine.
//!
//! Accepts uploads, enqueues them under a strict-priority bounded
//! queue, and dispatches to a fixed pool of worker tasks. Live status
//! is served from an in-memory map that doubles as the write-through
//! cache for the durable job table.

mod queue;

pub use queue::PriorityQueue;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use tokio::sync::Notify;

use crate::error::{ProcessingError, Result};
use crate::models::{JobPriority, JobStatus, ProcessingJob};
use crate::pipeline::{Orchestrator, ProgressSink};
use crate::repository::JobRepository;
use crate::security::FileValidator;
use crate::storage::DataLayout;

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker pool size.
    pub max_concurrent: usize,
    /// Queue bound; submissions beyond it fail with `QueueFull`.
    pub max_queue_size: usize,
    /// How long terminal jobs are kept before the sweeper removes them.
    pub job_retention_days: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_queue_size: 100,
            job_retention_days: 7,
        }
    }
}

/// Result of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// The job already left the queue; running stages are never
    /// interrupted.
    CannotCancel,
    NotFound,
}

/// The job engine. Construct once, wrap in `Arc`, call [`JobEngine::start`].
pub struct JobEngine {
    config: EngineConfig,
    queue: Mutex<PriorityQueue<String>>,
    notify: Notify,
    jobs: DashMap<String, ProcessingJob>,
    job_repo: JobRepository,
    validator: FileValidator,
    paths: DataLayout,
    orchestrator: Arc<Orchestrator>,
    /// While set, `submit` rejects uploads and workers stop dequeuing.
    /// Queued jobs stay queued. Used by restore to quiesce the stores.
    paused: AtomicBool,
    /// Jobs currently owned by a worker, mid-pipeline.
    in_flight: AtomicUsize,
}

impl JobEngine {
    pub fn new(
        config: EngineConfig,
        job_repo: JobRepository,
        validator: FileValidator,
        paths: DataLayout,
        orchestrator: Arc<Orchestrator>,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(PriorityQueue::new(config.max_queue_size)),
            notify: Notify::new(),
            jobs: DashMap::new(),
            config,
            job_repo,
            validator,
            paths,
            orchestrator,
            paused: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
        })
    }

    /// Stop ingestion: reject new submissions and keep workers from
    /// taking more queued jobs. In-flight jobs run to completion; call
    /// [`JobEngine::wait_idle`] to drain them.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        tracing::info!("Job engine paused");
    }

    /// Resume dispatch after a pause.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
        tracing::info!("Job engine resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Wait until no worker owns a job. Returns false if the deadline
    /// passes first. Meaningful after [`JobEngine::pause`]; otherwise
    /// workers keep picking up queued work.
    pub async fn wait_idle(&self, timeout: std::time::Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.in_flight.load(Ordering::SeqCst) > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        true
    }

    /// Recover persisted state and launch workers plus the retention
    /// sweeper.
    pub async fn start(self: &Arc<Self>) {
        if let Err(e) = self.recover().await {
            tracing::warn!("Job recovery failed: {}", e);
        }

        for worker_id in 0..self.config.max_concurrent {
            let engine = self.clone();
            tokio::spawn(async move {
                engine.worker_loop(worker_id).await;
            });
        }

        let engine = self.clone();
        tokio::spawn(async move {
            engine.sweeper_loop().await;
        });
    }

    /// Requeue jobs that were waiting when the process stopped; jobs
    /// caught mid-flight are failed rather than silently rerun.
    async fn recover(&self) -> Result<()> {
        let pending = self
            .job_repo
            .list_non_terminal()
            .await
            .map_err(ProcessingError::from)?;

        for mut job in pending {
            match &job.status {
                JobStatus::Uploaded | JobStatus::Queued => {
                    if job.upload_path.exists() {
                        let job_id = job.job_id.clone();
                        job.status = JobStatus::Queued;
                        let priority = job.priority;
                        self.jobs.insert(job_id.clone(), job.clone());
                        let _ = self.job_repo.update(&job).await;
                        let pushed = {
                            let mut queue = self.queue.lock().expect("queue lock poisoned");
                            queue.push(priority, job_id).is_ok()
                        };
                        if pushed {
                            self.notify.notify_one();
                            continue;
                        }
                    }
                    self.mark_interrupted(job, "upload missing or queue full on restart")
                        .await;
                }
                JobStatus::Processing { .. } => {
                    self.mark_interrupted(job, "interrupted by restart").await;
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn mark_interrupted(&self, mut job: ProcessingJob, reason: &str) {
        job.status = JobStatus::Failed {
            kind: "internal".to_string(),
            message: reason.to_string(),
        };
        job.error_message = Some(format!("internal: {}", reason));
        job.completed_at = Some(Utc::now());
        self.jobs.insert(job.job_id.clone(), job.clone());
        let _ = self.job_repo.update(&job).await;
    }

    /// Accept an upload: validate, stage to disk, persist the job, and
    /// enqueue it.
    pub async fn submit(
        &self,
        bytes: &[u8],
        filename: &str,
        priority: JobPriority,
    ) -> Result<String> {
        if self.is_paused() {
            return Err(ProcessingError::ServiceUnavailable(
                "ingestion paused for restore".into(),
            ));
        }
        self.validator.validate(filename, bytes)?;

        let mut job = ProcessingJob::new(
            filename.to_string(),
            priority,
            // Path is finalized right below once the job id exists.
            std::path::PathBuf::new(),
        );
        job.upload_path = self.paths.temp_upload_path(&job.job_id);
        let job_id = job.job_id.clone();

        std::fs::write(&job.upload_path, bytes)
            .map_err(|e| ProcessingError::Internal(format!("failed to stage upload: {}", e)))?;

        // Record and map entries must exist before the id can be popped
        // from the queue; workers resolve jobs through them.
        job.status = JobStatus::Queued;
        self.job_repo
            .insert(&job)
            .await
            .map_err(ProcessingError::from)?;
        self.jobs.insert(job_id.clone(), job.clone());

        let pushed = {
            let mut queue = self.queue.lock().expect("queue lock poisoned");
            queue.push(priority, job_id.clone()).is_ok()
        };
        if !pushed {
            self.jobs.remove(&job_id);
            let _ = self.job_repo.delete(&job_id).await;
            let _ = std::fs::remove_file(&job.upload_path);
            return Err(ProcessingError::QueueFull);
        }

        self.notify.notify_one();
        Ok(job_id)
    }

    /// Live status for a job, falling back to the durable record for
    /// jobs that predate this process.
    pub async fn status(&self, job_id: &str) -> Result<Option<ProcessingJob>> {
        if let Some(job) = self.jobs.get(job_id) {
            return Ok(Some(job.clone()));
        }
        self.job_repo.get(job_id).await.map_err(ProcessingError::from)
    }

    /// Cancel a job that has not left the queue.
    pub async fn cancel(&self, job_id: &str) -> Result<CancelOutcome> {
        let Some(mut job) = self.jobs.get_mut(job_id) else {
            // Terminal jobs swept from the map may still exist durably.
            return match self.job_repo.get(job_id).await.map_err(ProcessingError::from)? {
                Some(_) => Ok(CancelOutcome::CannotCancel),
                None => Ok(CancelOutcome::NotFound),
            };
        };

        if !job.status.can_cancel() {
            return Ok(CancelOutcome::CannotCancel);
        }

        let removed = {
            let mut queue = self.queue.lock().expect("queue lock poisoned");
            queue.remove_where(|queued| queued == job_id).is_some()
        };
        if !removed {
            // A worker claimed it between the status check and the
            // queue sweep.
            return Ok(CancelOutcome::CannotCancel);
        }

        job.status = JobStatus::Cancelled;
        job.completed_at = Some(Utc::now());
        let _ = std::fs::remove_file(&job.upload_path);
        let snapshot = job.clone();
        drop(job);
        let _ = self.job_repo.update(&snapshot).await;
        Ok(CancelOutcome::Cancelled)
    }

    /// Jobs currently waiting in the queue.
    pub fn queue_depth(&self) -> usize {
        self.queue.lock().expect("queue lock poisoned").len()
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        tracing::debug!("Worker {} started", worker_id);
        loop {
            // The in-flight count is taken under the queue lock so a
            // paused drain never misses a job between pop and count.
            let job_id = {
                let mut queue = self.queue.lock().expect("queue lock poisoned");
                if self.paused.load(Ordering::SeqCst) {
                    None
                } else {
                    let popped = queue.pop();
                    if popped.is_some() {
                        self.in_flight.fetch_add(1, Ordering::SeqCst);
                    }
                    popped
                }
            };

            match job_id {
                Some(job_id) => {
                    self.process_job(job_id).await;
                    self.in_flight.fetch_sub(1, Ordering::SeqCst);
                }
                None => {
                    // Submissions store a wakeup permit; the timeout
                    // covers resume-after-pause, which does not.
                    let _ = tokio::time::timeout(
                        std::time::Duration::from_millis(500),
                        self.notify.notified(),
                    )
                    .await;
                }
            }
        }
    }

    /// Run one job end to end. A panicking pipeline fails the job, not
    /// the worker.
    async fn process_job(self: &Arc<Self>, job_id: String) {
        let Some(job) = self.jobs.get(&job_id).map(|j| j.clone()) else {
            tracing::warn!("Dequeued unknown job {}", job_id);
            return;
        };

        let orchestrator = self.orchestrator.clone();
        let sink: Arc<dyn ProgressSink> = self.clone();
        let handle =
            tokio::spawn(async move { orchestrator.run(job, sink.as_ref()).await });

        match handle.await {
            Ok(terminal) => {
                self.jobs.insert(job_id, terminal);
            }
            Err(join_error) => {
                tracing::error!("Job {} panicked: {}", job_id, join_error);
                if let Some(mut job) = self.jobs.get_mut(&job_id) {
                    job.status = JobStatus::Failed {
                        kind: "internal".to_string(),
                        message: "pipeline panicked".to_string(),
                    };
                    job.error_message = Some("internal: pipeline panicked".to_string());
                    job.completed_at = Some(Utc::now());
                    let snapshot = job.clone();
                    drop(job);
                    let _ = self.job_repo.update(&snapshot).await;
                }
            }
        }
    }

    /// Remove terminal jobs past retention and orphaned temp uploads.
    async fn sweeper_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(24 * 60 * 60));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The immediate first tick runs a sweep at startup.
        loop {
            interval.tick().await;
            self.sweep_once().await;
        }
    }

    async fn sweep_once(&self) {
        let retention = self.config.job_retention_days;
        match self
            .job_repo
            .sweep_terminal_older_than(retention, Utc::now())
            .await
        {
            Ok(swept) => {
                for (job_id, upload_path) in &swept {
                    self.jobs.remove(job_id);
                    let _ = std::fs::remove_file(upload_path);
                }
                if !swept.is_empty() {
                    tracing::info!("Swept {} terminal jobs", swept.len());
                }
            }
            Err(e) => tracing::warn!("Job sweep failed: {}", e),
        }

        let cutoff = Utc::now() - Duration::days(retention);
        match self.paths.sweep_temp(cutoff) {
            Ok(0) => {}
            Ok(n) => tracing::info!("Removed {} orphaned temp files", n),
            Err(e) => tracing::warn!("Temp sweep failed: {}", e),
        }
    }
}

#[async_trait]
impl ProgressSink for JobEngine {
    async fn publish(&self, job: &ProcessingJob) {
        self.jobs.insert(job.job_id.clone(), job.clone());
        if let Err(e) = self.job_repo.update(job).await {
            tracing::warn!("Failed to persist progress for {}: {}", job.job_id, e);
        }
    }
}
