//! Paper models for processed scholarly documents.
//!
//! A paper is identified two ways: `doc_id` is the opaque storage key
//! assigned at first ingestion, and `content_id` is derived from the
//! document's mean embedding so that re-uploads of the same content
//! collapse onto one record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Assessed quality of a paper's text layer after OCR scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrQuality {
    Good,
    Fair,
    Poor,
    Unknown,
}

impl OcrQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Fair => "fair",
            Self::Poor => "poor",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "good" => Some(Self::Good),
            "fair" => Some(Self::Fair),
            "poor" => Some(Self::Poor),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// A processed document.
///
/// Owns its page embeddings, document embedding, optional metadata and
/// layout, and the three duplicate-detection hashes. Children are removed
/// with the paper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paper {
    /// Opaque unique identifier, assigned on first successful ingestion.
    pub doc_id: String,
    /// 64-hex SHA-256 of the mean embedding's byte representation.
    pub content_id: String,
    /// Original upload filename.
    pub filename: String,
    /// Text-layer quality as judged by the quality scorer.
    pub ocr_quality: OcrQuality,
    /// True iff the stored PDF's text layer was rewritten by OCR.
    pub ocr_regenerated: bool,
    /// Pre-OCR original, present iff `ocr_regenerated`.
    pub original_file_path: Option<PathBuf>,
    /// Free-text notes accumulated by pipeline stages.
    pub processing_notes: Option<String>,
    /// Set when the vector-store upsert failed after the relational
    /// commit; cleared by the consistency checker.
    pub pending_vector_sync: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Paper {
    /// Create a new paper for a fresh ingestion.
    pub fn new(doc_id: String, content_id: String, filename: String) -> Self {
        let now = Utc::now();
        Self {
            doc_id,
            content_id,
            filename,
            ocr_quality: OcrQuality::Unknown,
            ocr_regenerated: false,
            original_file_path: None,
            processing_notes: None,
            pending_vector_sync: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a note, separated from prior notes by a newline.
    pub fn add_note(&mut self, note: &str) {
        match &mut self.processing_notes {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(note);
            }
            None => self.processing_notes = Some(note.to_string()),
        }
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ocr_quality_round_trip() {
        for q in [
            OcrQuality::Good,
            OcrQuality::Fair,
            OcrQuality::Poor,
            OcrQuality::Unknown,
        ] {
            assert_eq!(OcrQuality::from_str(q.as_str()), Some(q));
        }
        assert_eq!(OcrQuality::from_str("excellent"), None);
    }

    #[test]
    fn test_add_note_appends() {
        let mut paper = Paper::new("d1".into(), "c".repeat(64), "a.pdf".into());
        paper.add_note("layout analysis skipped");
        paper.add_note("metadata extracted via rule_based");
        let notes = paper.processing_notes.unwrap();
        assert_eq!(notes.lines().count(), 2);
    }

    #[test]
    fn test_new_paper_defaults() {
        let paper = Paper::new("d1".into(), "c".repeat(64), "a.pdf".into());
        assert_eq!(paper.ocr_quality, OcrQuality::Unknown);
        assert!(!paper.ocr_regenerated);
        assert!(paper.original_file_path.is_none());
        assert!(!paper.pending_vector_sync);
    }
}
