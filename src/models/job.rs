//! Processing job models.
//!
//! A job is created on upload and owned by the job engine until it
//! reaches a terminal state. Status is a tagged enum; the flat string
//! form is what the database and the status payload carry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Scheduling priority. Strict ordering: urgent > high > normal > low,
/// FIFO within a band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Urgent,
    High,
    Normal,
    Low,
}

impl JobPriority {
    /// Band index for queue dispatch; lower dispatches first.
    pub fn band(&self) -> usize {
        match self {
            Self::Urgent => 0,
            Self::High => 1,
            Self::Normal => 2,
            Self::Low => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Urgent => "urgent",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "urgent" => Some(Self::Urgent),
            "high" => Some(Self::High),
            "normal" => Some(Self::Normal),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

/// Job lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted and persisted; not yet enqueued.
    Uploaded,
    /// Waiting in a priority band.
    Queued,
    /// A worker owns the job.
    Processing { step: String },
    /// Terminal: persisted and linked to a paper.
    Completed { paper_id: String },
    /// Terminal: a must-succeed stage failed.
    Failed { kind: String, message: String },
    /// Terminal: removed from the queue before dispatch.
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::Queued => "queued",
            Self::Processing { .. } => "processing",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled
        )
    }

    /// Cancellation is only honored before a worker takes the job.
    pub fn can_cancel(&self) -> bool {
        matches!(self, Self::Uploaded | Self::Queued)
    }
}

/// A stage that finished successfully, with its wall-clock duration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepCompleted {
    pub name: String,
    pub duration_s: f64,
}

/// An optional stage that failed and was skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepFailed {
    pub name: String,
    pub reason: String,
}

/// A pending, active, or terminal ingestion unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub job_id: String,
    pub filename: String,
    pub priority: JobPriority,
    pub status: JobStatus,
    /// Derived from stage weights; 0..=100.
    pub progress_percentage: u8,
    pub current_step: Option<String>,
    pub steps_completed: Vec<StepCompleted>,
    pub steps_failed: Vec<StepFailed>,
    pub error_message: Option<String>,
    /// Set iff completed and persisted.
    pub paper_id: Option<String>,
    /// Where the upload bytes are staged until finalization.
    pub upload_path: std::path::PathBuf,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ProcessingJob {
    pub fn new(filename: String, priority: JobPriority, upload_path: std::path::PathBuf) -> Self {
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            filename,
            priority,
            status: JobStatus::Uploaded,
            progress_percentage: 0,
            current_step: None,
            steps_completed: Vec::new(),
            steps_failed: Vec::new(),
            error_message: None,
            paper_id: None,
            upload_path,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}
