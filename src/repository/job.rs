//! Diesel-based processing-job repository.

use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::models::JobRecord;
use super::pool::{AsyncSqlitePool, DieselError};
use crate::models::ProcessingJob;
use crate::schema::processing_jobs;

/// Repository for job persistence. Live status is served from the job
/// engine's in-memory map; this table is the durable record.
#[derive(Clone)]
pub struct JobRepository {
    pool: AsyncSqlitePool,
}

impl JobRepository {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a freshly accepted job.
    pub async fn insert(&self, job: &ProcessingJob) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;
        diesel::insert_into(processing_jobs::table)
            .values(&JobRecord::from_model(job))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Overwrite the stored state of a job.
    pub async fn update(&self, job: &ProcessingJob) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;
        let record = JobRecord::from_model(job);
        diesel::update(processing_jobs::table.find(&job.job_id))
            .set(&record)
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Fetch a job by id.
    pub async fn get(&self, job_id: &str) -> Result<Option<ProcessingJob>, DieselError> {
        let mut conn = self.pool.get().await?;
        let record: Option<JobRecord> = processing_jobs::table
            .find(job_id)
            .first(&mut conn)
            .await
            .optional()?;
        Ok(record.map(JobRecord::into_model))
    }

    /// Jobs that were queued or processing when the process stopped.
    pub async fn list_non_terminal(&self) -> Result<Vec<ProcessingJob>, DieselError> {
        let mut conn = self.pool.get().await?;
        let records: Vec<JobRecord> = processing_jobs::table
            .filter(processing_jobs::status.eq_any(vec!["uploaded", "queued", "processing"]))
            .order(processing_jobs::created_at.asc())
            .load(&mut conn)
            .await?;
        Ok(records.into_iter().map(JobRecord::into_model).collect())
    }

    /// Delete terminal jobs older than the retention window.
    ///
    /// Returns `(job_id, upload_path)` of the removed jobs so the caller
    /// can drop them from the live map and sweep orphaned files.
    pub async fn sweep_terminal_older_than(
        &self,
        retention_days: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<(String, String)>, DieselError> {
        let mut conn = self.pool.get().await?;
        let cutoff = (now - Duration::days(retention_days)).to_rfc3339();

        let terminal = vec!["completed", "failed", "cancelled"];
        let swept: Vec<(String, String)> = processing_jobs::table
            .filter(processing_jobs::status.eq_any(terminal.clone()))
            .filter(processing_jobs::created_at.lt(&cutoff))
            .select((processing_jobs::job_id, processing_jobs::upload_path))
            .load(&mut conn)
            .await?;

        diesel::delete(
            processing_jobs::table
                .filter(processing_jobs::status.eq_any(terminal))
                .filter(processing_jobs::created_at.lt(&cutoff)),
        )
        .execute(&mut conn)
        .await?;

        Ok(swept)
    }

    /// Remove a job record outright (rejected submissions).
    pub async fn delete(&self, job_id: &str) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;
        diesel::delete(processing_jobs::table.find(job_id))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Count jobs currently marked processing.
    pub async fn count_processing(&self) -> Result<u64, DieselError> {
        let mut conn = self.pool.get().await?;
        let count: i64 = processing_jobs::table
            .filter(processing_jobs::status.eq("processing"))
            .count()
            .get_result(&mut conn)
            .await?;
        Ok(count as u64)
    }
}
