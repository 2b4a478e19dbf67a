//! Backup record models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a backup artifact contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupType {
    /// Relational file copy with compression.
    Snapshot,
    /// Snapshot plus vector-store tarball plus manifest.
    Full,
    /// Snapshot plus delta of vector files changed since the last full
    /// or incremental.
    Incremental,
    /// Atomic combined snapshot of both stores under one manifest.
    Unified,
}

impl BackupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot",
            Self::Full => "full",
            Self::Incremental => "incremental",
            Self::Unified => "unified",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "snapshot" => Some(Self::Snapshot),
            "full" => Some(Self::Full),
            "incremental" => Some(Self::Incremental),
            "unified" => Some(Self::Unified),
            _ => None,
        }
    }
}

/// Which store the artifact was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupSource {
    Sqlite,
    Chromadb,
    Unified,
}

impl BackupSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Chromadb => "chromadb",
            Self::Unified => "unified",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "sqlite" => Some(Self::Sqlite),
            "chromadb" => Some(Self::Chromadb),
            "unified" => Some(Self::Unified),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Completed,
    Failed,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One backup artifact on disk, with its recorded checksum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub backup_id: String,
    pub backup_type: BackupType,
    pub source: BackupSource,
    pub timestamp: DateTime<Utc>,
    /// Artifact path relative to the backups directory.
    pub artifact_path: String,
    pub size_bytes: u64,
    /// SHA-256 over the artifact bytes.
    pub checksum: String,
    pub status: BackupStatus,
    pub expire_date: DateTime<Utc>,
}

impl BackupRecord {
    /// Whether the retention window has elapsed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expire_date
    }
}
