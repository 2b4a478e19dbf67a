//! Diesel-based backup-record repository.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::models::BackupRecordRow;
use super::pool::{AsyncSqlitePool, DieselError};
use crate::models::BackupRecord;
use crate::schema::backup_records;

#[derive(Clone)]
pub struct BackupRepository {
    pool: AsyncSqlitePool,
}

impl BackupRepository {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, record: &BackupRecord) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;
        diesel::insert_into(backup_records::table)
            .values(&BackupRecordRow::from_model(record))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn get(&self, backup_id: &str) -> Result<Option<BackupRecord>, DieselError> {
        let mut conn = self.pool.get().await?;
        let row: Option<BackupRecordRow> = backup_records::table
            .find(backup_id)
            .first(&mut conn)
            .await
            .optional()?;
        Ok(row.map(BackupRecordRow::into_model))
    }

    /// All records, newest first.
    pub async fn list(&self) -> Result<Vec<BackupRecord>, DieselError> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<BackupRecordRow> = backup_records::table
            .order(backup_records::timestamp.desc())
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(BackupRecordRow::into_model).collect())
    }

    /// Mark a record failed (used when verification finds a checksum mismatch).
    pub async fn mark_failed(&self, backup_id: &str) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;
        diesel::update(backup_records::table.find(backup_id))
            .set(backup_records::status.eq("failed"))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Records whose retention window has elapsed.
    pub async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<BackupRecord>, DieselError> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<BackupRecordRow> = backup_records::table
            .filter(backup_records::expire_date.le(now.to_rfc3339()))
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(BackupRecordRow::into_model).collect())
    }

    pub async fn delete(&self, backup_id: &str) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;
        diesel::delete(backup_records::table.find(backup_id))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Latest completed full or incremental backup, for incremental deltas.
    pub async fn latest_vector_baseline(&self) -> Result<Option<BackupRecord>, DieselError> {
        let mut conn = self.pool.get().await?;
        let row: Option<BackupRecordRow> = backup_records::table
            .filter(backup_records::backup_type.eq_any(vec!["full", "incremental"]))
            .filter(backup_records::status.eq("completed"))
            .order(backup_records::timestamp.desc())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(row.map(BackupRecordRow::into_model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BackupSource, BackupStatus, BackupType};
    use chrono::Duration;
    use tempfile::tempdir;

    async fn test_repo() -> (BackupRepository, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite:{}", db_path.display());
        super::super::migrations::run_migrations(&url).await.unwrap();
        (BackupRepository::new(AsyncSqlitePool::from_path(&db_path)), dir)
    }

    fn record(id: &str, backup_type: BackupType, age_days: i64) -> BackupRecord {
        let created = Utc::now() - Duration::days(age_days);
        BackupRecord {
            backup_id: id.into(),
            backup_type,
            source: BackupSource::Sqlite,
            timestamp: created,
            artifact_path: format!("sqlite/{}.tar.gz", id),
            size_bytes: 128,
            checksum: "0".repeat(64),
            status: BackupStatus::Completed,
            expire_date: created + Duration::days(7),
        }
    }

    #[tokio::test]
    async fn test_insert_list_round_trip() {
        let (repo, _dir) = test_repo().await;
        repo.insert(&record("b1", BackupType::Snapshot, 0)).await.unwrap();
        repo.insert(&record("b2", BackupType::Unified, 1)).await.unwrap();

        let all = repo.list().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].backup_id, "b1"); // newest first
    }

    #[tokio::test]
    async fn test_expired_and_delete() {
        let (repo, _dir) = test_repo().await;
        repo.insert(&record("old", BackupType::Snapshot, 10)).await.unwrap();
        repo.insert(&record("new", BackupType::Snapshot, 0)).await.unwrap();

        let expired = repo.list_expired(Utc::now()).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].backup_id, "old");

        repo.delete("old").await.unwrap();
        assert!(repo.get("old").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_failed() {
        let (repo, _dir) = test_repo().await;
        repo.insert(&record("b1", BackupType::Full, 0)).await.unwrap();
        repo.mark_failed("b1").await.unwrap();
        let loaded = repo.get("b1").await.unwrap().unwrap();
        assert_eq!(loaded.status, BackupStatus::Failed);
    }

    #[tokio::test]
    async fn test_latest_vector_baseline_skips_snapshots() {
        let (repo, _dir) = test_repo().await;
        repo.insert(&record("s1", BackupType::Snapshot, 0)).await.unwrap();
        assert!(repo.latest_vector_baseline().await.unwrap().is_none());

        repo.insert(&record("f1", BackupType::Full, 2)).await.unwrap();
        repo.insert(&record("i1", BackupType::Incremental, 1)).await.unwrap();
        let latest = repo.latest_vector_baseline().await.unwrap().unwrap();
        assert_eq!(latest.backup_id, "i1");
    }
}
