//! On-disk layout for stored documents, images, and backups.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

/// Resolved directory layout under the data root.
///
/// ```text
/// data/
///   refbase.db          relational store
///   vectors/            vector index segments
///   pdfs/{doc_id}.pdf   stored documents
///   originals/          pre-OCR originals
///   images/{doc_id}_p1.png
///   temp/               staged uploads, swept with jobs
///   quarantine/         rejected uploads kept for inspection
///   backups/{sqlite,chromadb,unified}/
/// ```
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: &Path) -> Self {
        Self { root: root.to_path_buf() }
    }

    /// Create every directory the layout names.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        for dir in [
            self.pdfs_dir(),
            self.originals_dir(),
            self.images_dir(),
            self.temp_dir(),
            self.quarantine_dir(),
            self.vector_dir(),
            self.backups_dir().join("sqlite"),
            self.backups_dir().join("chromadb"),
            self.backups_dir().join("unified"),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn database_path(&self) -> PathBuf {
        self.root.join("refbase.db")
    }

    pub fn vector_dir(&self) -> PathBuf {
        self.root.join("vectors")
    }

    pub fn pdfs_dir(&self) -> PathBuf {
        self.root.join("pdfs")
    }

    pub fn originals_dir(&self) -> PathBuf {
        self.root.join("originals")
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join("images")
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root.join("temp")
    }

    pub fn quarantine_dir(&self) -> PathBuf {
        self.root.join("quarantine")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    /// Stored PDF for a paper.
    pub fn pdf_path(&self, doc_id: &str) -> PathBuf {
        self.pdfs_dir().join(format!("{}.pdf", doc_id))
    }

    /// Pre-OCR original for a paper whose text layer was regenerated.
    pub fn original_path(&self, doc_id: &str) -> PathBuf {
        self.originals_dir().join(format!("{}.pdf", doc_id))
    }

    /// First-page preview image.
    pub fn preview_path(&self, doc_id: &str) -> PathBuf {
        self.images_dir().join(format!("{}_p1.png", doc_id))
    }

    /// Staging path for an upload while its job is live.
    pub fn temp_upload_path(&self, job_id: &str) -> PathBuf {
        self.temp_dir().join(format!("{}.pdf", job_id))
    }

    /// Remove temp files older than the cutoff. Returns how many were
    /// deleted.
    pub fn sweep_temp(&self, cutoff: DateTime<Utc>) -> std::io::Result<usize> {
        let mut removed = 0;
        let temp = self.temp_dir();
        if !temp.exists() {
            return Ok(0);
        }
        for item in std::fs::read_dir(&temp)? {
            let path = item?.path();
            let Ok(meta) = std::fs::metadata(&path) else { continue };
            let Ok(modified) = meta.modified() else { continue };
            let modified: DateTime<Utc> = modified.into();
            if modified < cutoff && std::fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_paths_follow_layout() {
        let layout = DataLayout::new(Path::new("/data"));
        assert_eq!(layout.database_path(), PathBuf::from("/data/refbase.db"));
        assert_eq!(layout.pdf_path("d1"), PathBuf::from("/data/pdfs/d1.pdf"));
        assert_eq!(layout.preview_path("d1"), PathBuf::from("/data/images/d1_p1.png"));
        assert_eq!(layout.temp_upload_path("j1"), PathBuf::from("/data/temp/j1.pdf"));
        assert_eq!(layout.original_path("d1"), PathBuf::from("/data/originals/d1.pdf"));
    }

    #[test]
    fn test_ensure_directories() {
        let dir = tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        layout.ensure_directories().unwrap();

        assert!(layout.pdfs_dir().is_dir());
        assert!(layout.temp_dir().is_dir());
        assert!(layout.backups_dir().join("unified").is_dir());
    }

    #[test]
    fn test_sweep_temp_respects_cutoff() {
        let dir = tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        layout.ensure_directories().unwrap();

        let stale = layout.temp_upload_path("stale");
        std::fs::write(&stale, b"x").unwrap();

        // Everything is newer than a cutoff in the past.
        let removed = layout.sweep_temp(Utc::now() - chrono::Duration::hours(1)).unwrap();
        assert_eq!(removed, 0);
        assert!(stale.exists());

        // A future cutoff removes it.
        let removed = layout.sweep_temp(Utc::now() + chrono::Duration::hours(1)).unwrap();
        assert_eq!(removed, 1);
        assert!(!stale.exists());
    }
}
