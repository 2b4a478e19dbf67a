//! Backup, restore, and cross-store consistency checking.

mod consistency;
mod service;

pub use consistency::{
    ConsistencyChecker, ConsistencyIssue, ConsistencyReport, FixSummary, IssueClass, Severity,
};
pub use service::{sha256_file, BackupConfig, BackupService};
