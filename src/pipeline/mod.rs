//! The seven-stage ingestion pipeline.

mod orchestrator;

pub use orchestrator::{NoopSink, Orchestrator, ProgressSink};

use serde::{Deserialize, Serialize};

/// Pipeline stages in execution order.
///
/// Weights drive the job progress percentage and sum to 100. Stages
/// marked must-succeed abort the job on failure; the others record a
/// failure entry and the pipeline continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    PersistUpload,
    Ocr,
    QualityAssessment,
    Embedding,
    LayoutAnalysis,
    MetadataExtraction,
    Finalize,
}

impl Stage {
    /// All stages in execution order.
    pub fn all() -> [Stage; 7] {
        [
            Stage::PersistUpload,
            Stage::Ocr,
            Stage::QualityAssessment,
            Stage::Embedding,
            Stage::LayoutAnalysis,
            Stage::MetadataExtraction,
            Stage::Finalize,
        ]
    }

    /// 1-based stage number.
    pub fn number(&self) -> u8 {
        match self {
            Stage::PersistUpload => 1,
            Stage::Ocr => 2,
            Stage::QualityAssessment => 3,
            Stage::Embedding => 4,
            Stage::LayoutAnalysis => 5,
            Stage::MetadataExtraction => 6,
            Stage::Finalize => 7,
        }
    }

    /// Progress weight; the seven weights sum to 100.
    pub fn weight(&self) -> u8 {
        match self {
            Stage::PersistUpload => 5,
            Stage::Ocr => 20,
            Stage::QualityAssessment => 10,
            Stage::Embedding => 25,
            Stage::LayoutAnalysis => 15,
            Stage::MetadataExtraction => 15,
            Stage::Finalize => 10,
        }
    }

    /// Whether failure aborts the job.
    pub fn must_succeed(&self) -> bool {
        matches!(
            self,
            Stage::PersistUpload | Stage::Ocr | Stage::Embedding | Stage::Finalize
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::PersistUpload => "persist_upload",
            Stage::Ocr => "ocr",
            Stage::QualityAssessment => "quality_assessment",
            Stage::Embedding => "embedding",
            Stage::LayoutAnalysis => "layout_analysis",
            Stage::MetadataExtraction => "metadata_extraction",
            Stage::Finalize => "finalize",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_sum_to_100() {
        let total: u32 = Stage::all().iter().map(|s| s.weight() as u32).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn test_stage_numbers_are_ordered() {
        let numbers: Vec<u8> = Stage::all().iter().map(|s| s.number()).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_must_succeed_set() {
        assert!(Stage::PersistUpload.must_succeed());
        assert!(Stage::Ocr.must_succeed());
        assert!(Stage::Embedding.must_succeed());
        assert!(Stage::Finalize.must_succeed());
        assert!(!Stage::QualityAssessment.must_succeed());
        assert!(!Stage::LayoutAnalysis.must_succeed());
        assert!(!Stage::MetadataExtraction.must_succeed());
    }

    #[test]
    fn test_names_are_unique() {
        let mut names: Vec<&str> = Stage::all().iter().map(|s| s.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 7);
    }
}
