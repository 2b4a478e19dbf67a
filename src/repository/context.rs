//! Database context for managing connections and repository access.
//!
//! Provides a unified entry point for database operations. Create one
//! context at startup, then hand out repositories to the services that
//! need them.

use std::path::Path;

use super::backup::BackupRepository;
use super::job::JobRepository;
use super::paper::PaperRepository;
use super::pool::AsyncSqlitePool;

/// Database context that owns the connection factory and builds repositories.
#[derive(Clone)]
pub struct DbContext {
    pool: AsyncSqlitePool,
}

impl DbContext {
    /// Create a context from a database file path.
    pub fn from_path(db_path: &Path) -> Self {
        Self {
            pool: AsyncSqlitePool::from_path(db_path),
        }
    }

    /// Create a context from a database URL.
    pub fn from_url(database_url: &str) -> Self {
        Self {
            pool: AsyncSqlitePool::new(database_url),
        }
    }

    pub fn pool(&self) -> &AsyncSqlitePool {
        &self.pool
    }

    pub fn papers(&self) -> PaperRepository {
        PaperRepository::new(self.pool.clone())
    }

    pub fn jobs(&self) -> JobRepository {
        JobRepository::new(self.pool.clone())
    }

    pub fn backups(&self) -> BackupRepository {
        BackupRepository::new(self.pool.clone())
    }
}
