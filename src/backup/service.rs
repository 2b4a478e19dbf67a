//! Backup creation, verification, retention, and restore.
//!
//! Artifacts are gzipped tarballs under `backups/{sqlite,chromadb,unified}`.
//! Every record stores the SHA-256 of its artifact; verification
//! recomputes and compares.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ProcessingError, Result};
use crate::models::{BackupRecord, BackupSource, BackupStatus, BackupType};
use crate::repository::BackupRepository;
use crate::storage::DataLayout;

/// Retention windows per backup cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Daily snapshots.
    #[serde(default = "default_daily")]
    pub daily_retention_days: i64,
    /// Weekly unified backups.
    #[serde(default = "default_weekly")]
    pub weekly_retention_days: i64,
    /// Monthly full backups.
    #[serde(default = "default_monthly")]
    pub monthly_retention_days: i64,
}

fn default_daily() -> i64 {
    7
}
fn default_weekly() -> i64 {
    30
}
fn default_monthly() -> i64 {
    90
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            daily_retention_days: default_daily(),
            weekly_retention_days: default_weekly(),
            monthly_retention_days: default_monthly(),
        }
    }
}

/// Manifest embedded in full, incremental, and unified artifacts.
#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    backup_type: String,
    created_at: DateTime<Utc>,
    files: Vec<ManifestEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestEntry {
    name: String,
    size_bytes: u64,
    sha256: String,
}

/// Creates and manages backup artifacts for both stores.
pub struct BackupService {
    paths: DataLayout,
    records: BackupRepository,
    config: BackupConfig,
}

impl BackupService {
    pub fn new(paths: DataLayout, records: BackupRepository, config: BackupConfig) -> Self {
        Self {
            paths,
            records,
            config,
        }
    }

    pub fn records(&self) -> &BackupRepository {
        &self.records
    }

    /// Create a backup of the requested type and record it.
    pub async fn create(&self, backup_type: BackupType) -> Result<BackupRecord> {
        let backup_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        let (entries, source, subdir, retention_days) = match backup_type {
            BackupType::Snapshot => (
                vec![self.database_entry()?],
                BackupSource::Sqlite,
                "sqlite",
                self.config.daily_retention_days,
            ),
            BackupType::Full => {
                let mut entries = vec![self.database_entry()?];
                entries.extend(self.vector_entries(None)?);
                (
                    entries,
                    BackupSource::Chromadb,
                    "chromadb",
                    self.config.monthly_retention_days,
                )
            }
            BackupType::Incremental => {
                let baseline = self
                    .records
                    .latest_vector_baseline()
                    .await
                    .map_err(ProcessingError::from)?
                    .map(|r| r.timestamp);
                let mut entries = vec![self.database_entry()?];
                entries.extend(self.vector_entries(baseline)?);
                (
                    entries,
                    BackupSource::Chromadb,
                    "chromadb",
                    self.config.weekly_retention_days,
                )
            }
            BackupType::Unified => {
                let mut entries = vec![self.database_entry()?];
                entries.extend(self.vector_entries(None)?);
                (
                    entries,
                    BackupSource::Unified,
                    "unified",
                    self.config.weekly_retention_days,
                )
            }
        };

        let artifact_rel = format!("{}/{}-{}.tar.gz", subdir, backup_type.as_str(), backup_id);
        let artifact_path = self.paths.backups_dir().join(&artifact_rel);

        let manifest = build_manifest(backup_type, now, &entries)?;
        write_tar_gz(&artifact_path, &entries, &manifest)?;

        let checksum = sha256_file(&artifact_path)?;
        let size_bytes = std::fs::metadata(&artifact_path)?.len();

        let record = BackupRecord {
            backup_id,
            backup_type,
            source,
            timestamp: now,
            artifact_path: artifact_rel,
            size_bytes,
            checksum,
            status: BackupStatus::Completed,
            expire_date: now + Duration::days(retention_days),
        };
        self.records
            .insert(&record)
            .await
            .map_err(ProcessingError::from)?;

        tracing::info!(
            "Created {} backup {} ({} bytes)",
            backup_type.as_str(),
            record.backup_id,
            size_bytes
        );
        Ok(record)
    }

    fn database_entry(&self) -> Result<(PathBuf, String)> {
        let db = self.paths.database_path();
        if !db.exists() {
            return Err(ProcessingError::Internal(
                "relational store file missing".into(),
            ));
        }
        Ok((db, "refbase.db".to_string()))
    }

    /// Vector segment files, optionally limited to those modified after
    /// the baseline (for incremental backups).
    fn vector_entries(
        &self,
        changed_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<(PathBuf, String)>> {
        let dir = self.paths.vector_dir();
        let mut entries = Vec::new();
        if !dir.exists() {
            return Ok(entries);
        }
        for item in std::fs::read_dir(&dir)? {
            let path = item?.path();
            if !path.is_file() {
                continue;
            }
            if let Some(cutoff) = changed_after {
                let modified: DateTime<Utc> = std::fs::metadata(&path)?.modified()?.into();
                if modified <= cutoff {
                    continue;
                }
            }
            let name = format!(
                "vectors/{}",
                path.file_name().unwrap_or_default().to_string_lossy()
            );
            entries.push((path, name));
        }
        entries.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(entries)
    }

    /// Recompute the artifact checksum and compare with the record.
    /// A mismatch marks the record failed.
    pub async fn verify(&self, backup_id: &str) -> Result<bool> {
        let record = self
            .records
            .get(backup_id)
            .await
            .map_err(ProcessingError::from)?
            .ok_or_else(|| ProcessingError::InvalidInput("unknown backup".into()))?;

        let artifact = self.paths.backups_dir().join(&record.artifact_path);
        let ok = artifact.exists() && sha256_file(&artifact)? == record.checksum;
        if !ok {
            tracing::error!("Backup {} failed verification", backup_id);
            self.records
                .mark_failed(backup_id)
                .await
                .map_err(ProcessingError::from)?;
        }
        Ok(ok)
    }

    /// Remove expired records and their artifacts.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let expired = self
            .records
            .list_expired(Utc::now())
            .await
            .map_err(ProcessingError::from)?;
        let count = expired.len();
        for record in expired {
            let artifact = self.paths.backups_dir().join(&record.artifact_path);
            if artifact.exists() {
                let _ = std::fs::remove_file(&artifact);
            }
            self.records
                .delete(&record.backup_id)
                .await
                .map_err(ProcessingError::from)?;
        }
        if count > 0 {
            tracing::info!("Removed {} expired backups", count);
        }
        Ok(count)
    }

    /// Restore a backup's files over the live stores.
    ///
    /// A safety unified backup of current state is taken first. This
    /// only replaces files: the caller must have paused and drained the
    /// job engine beforehand (`JobEngine::pause` + `wait_idle`) and must
    /// reload the vector index afterwards (`VectorIndex::reload`) so
    /// queries stop serving the pre-restore snapshot. The admin restore
    /// handler sequences all of this. Returns the restored backup type
    /// so the caller knows which stores changed.
    pub async fn restore(&self, backup_id: &str) -> Result<BackupType> {
        let record = self
            .records
            .get(backup_id)
            .await
            .map_err(ProcessingError::from)?
            .ok_or_else(|| ProcessingError::InvalidInput("unknown backup".into()))?;

        if !self.verify(backup_id).await? {
            return Err(ProcessingError::DataIntegrity(format!(
                "backup {} failed checksum verification",
                backup_id
            )));
        }

        let safety = self.create(BackupType::Unified).await?;
        tracing::info!("Safety backup {} created before restore", safety.backup_id);

        let artifact = self.paths.backups_dir().join(&record.artifact_path);
        let staging = tempfile::tempdir()?;
        unpack_tar_gz(&artifact, staging.path())?;

        let staged_db = staging.path().join("refbase.db");
        if staged_db.exists() {
            let live_db = self.paths.database_path();
            // Stale WAL sidecars would be replayed over the restored
            // file on the next open; the engine is drained, drop them.
            for suffix in ["-wal", "-shm"] {
                let sidecar = PathBuf::from(format!("{}{}", live_db.display(), suffix));
                if sidecar.exists() {
                    let _ = std::fs::remove_file(sidecar);
                }
            }
            std::fs::copy(&staged_db, &live_db)?;
            tracing::info!("Relational store restored from {}", backup_id);
        }

        let staged_vectors = staging.path().join("vectors");
        if staged_vectors.exists() {
            let live = self.paths.vector_dir();
            if record.backup_type != BackupType::Incremental && live.exists() {
                // Full and unified artifacts carry the complete index.
                std::fs::remove_dir_all(&live)?;
            }
            std::fs::create_dir_all(&live)?;
            for item in std::fs::read_dir(&staged_vectors)? {
                let path = item?.path();
                if let Some(name) = path.file_name() {
                    std::fs::copy(&path, live.join(name))?;
                }
            }
            tracing::info!("Vector store restored from {}", backup_id);
        }

        Ok(record.backup_type)
    }

    /// Periodic scheduler: daily snapshots, weekly unified, monthly
    /// full, plus the retention sweep. Checks hourly what is due.
    pub async fn run_scheduler(self: std::sync::Arc<Self>) {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60 * 60));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = self.run_due_backups().await {
                tracing::warn!("Scheduled backup pass failed: {}", e);
            }
        }
    }

    async fn run_due_backups(&self) -> Result<()> {
        let all = self.records.list().await.map_err(ProcessingError::from)?;
        let latest = |t: BackupType| {
            all.iter()
                .filter(|r| r.backup_type == t && r.status == BackupStatus::Completed)
                .map(|r| r.timestamp)
                .max()
        };
        let now = Utc::now();
        let due = |last: Option<DateTime<Utc>>, days: i64| {
            last.map(|t| now - t >= Duration::days(days)).unwrap_or(true)
        };

        if due(latest(BackupType::Snapshot), 1) {
            self.create(BackupType::Snapshot).await?;
        }
        if due(latest(BackupType::Unified), 7) {
            self.create(BackupType::Unified).await?;
        }
        if due(latest(BackupType::Full), 30) {
            self.create(BackupType::Full).await?;
        }

        self.sweep_expired().await?;
        Ok(())
    }
}

fn build_manifest(
    backup_type: BackupType,
    created_at: DateTime<Utc>,
    entries: &[(PathBuf, String)],
) -> Result<Manifest> {
    let mut files = Vec::with_capacity(entries.len());
    for (path, name) in entries {
        files.push(ManifestEntry {
            name: name.clone(),
            size_bytes: std::fs::metadata(path)?.len(),
            sha256: sha256_file(path)?,
        });
    }
    Ok(Manifest {
        backup_type: backup_type.as_str().to_string(),
        created_at,
        files,
    })
}

fn write_tar_gz(
    artifact: &Path,
    entries: &[(PathBuf, String)],
    manifest: &Manifest,
) -> Result<()> {
    if let Some(parent) = artifact.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(artifact)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for (path, name) in entries {
        builder
            .append_path_with_name(path, name)
            .map_err(|e| ProcessingError::Internal(format!("archive write failed: {}", e)))?;
    }

    let manifest_bytes = serde_json::to_vec_pretty(manifest)?;
    let mut header = tar::Header::new_gnu();
    header.set_size(manifest_bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "manifest.json", manifest_bytes.as_slice())
        .map_err(|e| ProcessingError::Internal(format!("manifest write failed: {}", e)))?;

    builder
        .into_inner()
        .and_then(|encoder| encoder.finish())
        .map_err(|e| ProcessingError::Internal(format!("archive finish failed: {}", e)))?;
    Ok(())
}

fn unpack_tar_gz(artifact: &Path, dest: &Path) -> Result<()> {
    let file = File::open(artifact)?;
    let decoder = GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);
    archive
        .unpack(dest)
        .map_err(|e| ProcessingError::Internal(format!("archive unpack failed: {}", e)))?;
    Ok(())
}

/// SHA-256 of a file's contents, streamed.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::DbContext;
    use tempfile::tempdir;

    async fn service() -> (BackupService, DataLayout, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        layout.ensure_directories().unwrap();

        let url = format!("sqlite:{}", layout.database_path().display());
        crate::repository::migrations::run_migrations(&url).await.unwrap();
        let ctx = DbContext::from_path(&layout.database_path());

        // Seed a vector segment so vector-bearing backups have content.
        std::fs::write(layout.vector_dir().join("doc1.json"), b"{\"doc_id\":\"doc1\"}").unwrap();

        (
            BackupService::new(layout.clone(), ctx.backups(), BackupConfig::default()),
            layout,
            dir,
        )
    }

    #[tokio::test]
    async fn test_snapshot_create_and_verify() {
        let (service, layout, _dir) = service().await;
        let record = service.create(BackupType::Snapshot).await.unwrap();

        assert_eq!(record.backup_type, BackupType::Snapshot);
        assert_eq!(record.source, BackupSource::Sqlite);
        assert_eq!(record.checksum.len(), 64);
        assert!(layout.backups_dir().join(&record.artifact_path).exists());
        assert!(service.verify(&record.backup_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_tampered_artifact_fails_verification() {
        let (service, layout, _dir) = service().await;
        let record = service.create(BackupType::Snapshot).await.unwrap();

        let artifact = layout.backups_dir().join(&record.artifact_path);
        std::fs::write(&artifact, b"tampered").unwrap();

        assert!(!service.verify(&record.backup_id).await.unwrap());
        let reloaded = service.records.get(&record.backup_id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, BackupStatus::Failed);
    }

    #[tokio::test]
    async fn test_unified_backup_contains_both_stores() {
        let (service, layout, _dir) = service().await;
        let record = service.create(BackupType::Unified).await.unwrap();

        let staging = tempdir().unwrap();
        unpack_tar_gz(
            &layout.backups_dir().join(&record.artifact_path),
            staging.path(),
        )
        .unwrap();

        assert!(staging.path().join("refbase.db").exists());
        assert!(staging.path().join("vectors/doc1.json").exists());
        let manifest: Manifest =
            serde_json::from_slice(&std::fs::read(staging.path().join("manifest.json")).unwrap())
                .unwrap();
        assert_eq!(manifest.backup_type, "unified");
        assert_eq!(manifest.files.len(), 2);
    }

    #[tokio::test]
    async fn test_incremental_skips_unchanged_segments() {
        let (service, _layout, _dir) = service().await;
        // Full backup establishes the baseline.
        service.create(BackupType::Full).await.unwrap();

        // Without changes, the incremental carries only the database.
        let entries = service
            .vector_entries(Some(Utc::now() + Duration::seconds(5)))
            .unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_restore_round_trip() {
        let (service, layout, _dir) = service().await;
        let record = service.create(BackupType::Unified).await.unwrap();

        // Damage both stores.
        std::fs::remove_file(layout.vector_dir().join("doc1.json")).unwrap();
        std::fs::write(layout.vector_dir().join("stray.json"), b"{}").unwrap();

        let restored_type = service.restore(&record.backup_id).await.unwrap();
        assert_eq!(restored_type, BackupType::Unified);
        assert!(layout.vector_dir().join("doc1.json").exists());
        // The stray segment was replaced along with the directory.
        assert!(!layout.vector_dir().join("stray.json").exists());
    }

    #[tokio::test]
    async fn test_sweep_expired_removes_artifacts() {
        let (service, layout, _dir) = service().await;
        let record = service.create(BackupType::Snapshot).await.unwrap();

        // Force-expire the record.
        let mut expired = record.clone();
        expired.expire_date = Utc::now() - Duration::days(1);
        service.records.delete(&record.backup_id).await.unwrap();
        service.records.insert(&expired).await.unwrap();

        let swept = service.sweep_expired().await.unwrap();
        assert_eq!(swept, 1);
        assert!(!layout.backups_dir().join(&record.artifact_path).exists());
        assert!(service.records.get(&record.backup_id).await.unwrap().is_none());
    }

    #[test]
    fn test_sha256_file_matches_known_digest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"hello").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
