//! Cross-store consistency checking and safe auto-repair.
//!
//! The relational store and the vector index share `doc_id`. They can
//! only diverge at one point (the non-transactional vector upsert after
//! finalization), but restores and operator mistakes widen that, so the
//! checker covers seven issue classes.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::Serialize;

use crate::embedder::Embedder;
use crate::error::{ProcessingError, Result};
use crate::models::mean_vector;
use crate::repository::PaperRepository;
use crate::vector::{VectorEntry, VectorIndex};

/// Page-count mismatches above this size are not auto-fixed; re-embedding
/// a very large document is operator-approved work.
const SMALL_SCALE_PAGES: u32 = 200;

/// The seven detectable discrepancy classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueClass {
    /// (1) Paper present, no vectors at all.
    PaperWithoutVector,
    /// (2) Vectors present, no owning paper.
    VectorWithoutPaper,
    /// (3) Page counts differ between the stores.
    PageCountMismatch,
    /// (4) Embedding dimensions differ.
    DimensionMismatch,
    /// (5) Relational content id absent from the vector index.
    ContentIdUnindexed,
    /// (6) Two papers share a content id.
    DuplicateContentId,
    /// (7) Finalization left the pending-vector-sync marker.
    PendingVectorSync,
}

impl IssueClass {
    /// Spec class number, 1..=7.
    pub fn number(&self) -> u8 {
        match self {
            Self::PaperWithoutVector => 1,
            Self::VectorWithoutPaper => 2,
            Self::PageCountMismatch => 3,
            Self::DimensionMismatch => 4,
            Self::ContentIdUnindexed => 5,
            Self::DuplicateContentId => 6,
            Self::PendingVectorSync => 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// One detected discrepancy.
#[derive(Debug, Clone, Serialize)]
pub struct ConsistencyIssue {
    pub class: IssueClass,
    pub severity: Severity,
    /// Paper or vector-entry id the issue is anchored to.
    pub doc_id: String,
    pub detail: String,
    /// Whether the safe auto-fix policy covers it.
    pub auto_fixable: bool,
}

/// Full check result.
#[derive(Debug, Clone, Serialize)]
pub struct ConsistencyReport {
    pub issues: Vec<ConsistencyIssue>,
    pub papers_checked: usize,
    pub vectors_checked: usize,
    /// 0-10 fleet-health summary.
    pub readiness_score: f32,
}

impl ConsistencyReport {
    pub fn count_at(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }
}

/// Outcome of an auto-fix pass.
#[derive(Debug, Clone, Serialize)]
pub struct FixSummary {
    pub fixed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Compares the two stores and repairs what is safe to repair.
pub struct ConsistencyChecker {
    papers: PaperRepository,
    vectors: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
}

impl ConsistencyChecker {
    pub fn new(
        papers: PaperRepository,
        vectors: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            papers,
            vectors,
            embedder,
        }
    }

    /// Enumerate both stores and report every discrepancy.
    pub async fn check(&self) -> Result<ConsistencyReport> {
        let expectations = self
            .papers
            .vector_expectations()
            .await
            .map_err(ProcessingError::from)?;
        let vector_ids: HashSet<String> = self.vectors.doc_ids().await.into_iter().collect();
        let paper_ids: HashSet<String> =
            expectations.iter().map(|e| e.doc_id.clone()).collect();

        let mut issues = Vec::new();

        for expectation in &expectations {
            if expectation.pending_vector_sync {
                issues.push(ConsistencyIssue {
                    class: IssueClass::PendingVectorSync,
                    severity: Severity::Low,
                    doc_id: expectation.doc_id.clone(),
                    detail: "finalization flagged this paper for vector re-sync".into(),
                    auto_fixable: true,
                });
            }

            let Some(entry) = self.vectors.get(&expectation.doc_id).await else {
                issues.push(ConsistencyIssue {
                    class: IssueClass::PaperWithoutVector,
                    severity: Severity::High,
                    doc_id: expectation.doc_id.clone(),
                    detail: "paper has no vectors in the index".into(),
                    auto_fixable: true,
                });
                // Class 5 collapses into class 1 when the whole entry is
                // gone; only report it when the entry exists but the
                // content id diverged.
                continue;
            };

            let vector_pages = entry.pages.len() as u32;
            if vector_pages != expectation.page_count {
                issues.push(ConsistencyIssue {
                    class: IssueClass::PageCountMismatch,
                    severity: Severity::Medium,
                    doc_id: expectation.doc_id.clone(),
                    detail: format!(
                        "relational store has {} pages, vector index has {}",
                        expectation.page_count, vector_pages
                    ),
                    auto_fixable: expectation.page_count <= SMALL_SCALE_PAGES,
                });
            }

            if entry.vector_dim != expectation.vector_dim {
                issues.push(ConsistencyIssue {
                    class: IssueClass::DimensionMismatch,
                    severity: Severity::High,
                    doc_id: expectation.doc_id.clone(),
                    detail: format!(
                        "relational store expects dim {}, vector index has {}",
                        expectation.vector_dim, entry.vector_dim
                    ),
                    // Dimension drift means a model change; report only.
                    auto_fixable: false,
                });
            }

            if entry.content_id != expectation.content_id {
                issues.push(ConsistencyIssue {
                    class: IssueClass::ContentIdUnindexed,
                    severity: Severity::High,
                    doc_id: expectation.doc_id.clone(),
                    detail: "indexed vectors do not carry the paper's content id".into(),
                    auto_fixable: false,
                });
            }
        }

        for vector_id in &vector_ids {
            if !paper_ids.contains(vector_id) {
                issues.push(ConsistencyIssue {
                    class: IssueClass::VectorWithoutPaper,
                    severity: Severity::Medium,
                    doc_id: vector_id.clone(),
                    detail: "vector entry has no owning paper".into(),
                    auto_fixable: false,
                });
            }
        }

        for (content_id, count) in self
            .papers
            .duplicate_content_ids()
            .await
            .map_err(ProcessingError::from)?
        {
            issues.push(ConsistencyIssue {
                class: IssueClass::DuplicateContentId,
                severity: Severity::Critical,
                doc_id: content_id,
                detail: format!("{} papers share this content id", count),
                auto_fixable: false,
            });
        }

        let readiness_score = readiness(&issues);
        Ok(ConsistencyReport {
            papers_checked: expectations.len(),
            vectors_checked: vector_ids.len(),
            issues,
            readiness_score,
        })
    }

    /// Apply the safe auto-fix policy: classes 1, 3 (small scale), and 7
    /// are repaired by re-embedding from the relational record and
    /// re-upserting into the vector index.
    pub async fn fix_safe(&self) -> Result<FixSummary> {
        let report = self.check().await?;
        let mut summary = FixSummary {
            fixed: 0,
            failed: 0,
            skipped: 0,
        };

        // A doc may appear in several fixable classes; repair it once.
        let mut repaired: HashSet<String> = HashSet::new();

        for issue in &report.issues {
            if !issue.auto_fixable {
                summary.skipped += 1;
                continue;
            }
            if repaired.contains(&issue.doc_id) {
                continue;
            }
            match self.reupsert_from_relational(&issue.doc_id).await {
                Ok(()) => {
                    repaired.insert(issue.doc_id.clone());
                    summary.fixed += 1;
                }
                Err(e) => {
                    tracing::error!("Auto-fix failed for {}: {}", issue.doc_id, e);
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Rebuild a paper's vectors from its stored page text. The
    /// embedder is deterministic, so the rebuilt vectors reproduce the
    /// paper's content id.
    async fn reupsert_from_relational(&self, doc_id: &str) -> Result<()> {
        let paper = self
            .papers
            .get(doc_id)
            .await
            .map_err(ProcessingError::from)?
            .ok_or_else(|| {
                ProcessingError::DataIntegrity(format!("paper {} disappeared mid-fix", doc_id))
            })?;
        let pages = self
            .papers
            .get_pages(doc_id)
            .await
            .map_err(ProcessingError::from)?;
        if pages.is_empty() {
            return Err(ProcessingError::DataIntegrity(format!(
                "paper {} has no page rows to rebuild from",
                doc_id
            )));
        }

        let texts: Vec<String> = pages.iter().map(|p| p.page_text.clone()).collect();
        let page_vectors = self.embedder.embed_batch(&texts);
        let document = mean_vector(&page_vectors).ok_or_else(|| {
            ProcessingError::Internal("mean of rebuilt page vectors undefined".into())
        })?;

        let mut page_map = BTreeMap::new();
        for (i, vector) in page_vectors.into_iter().enumerate() {
            page_map.insert((i + 1) as u32, vector);
        }

        self.vectors
            .upsert(VectorEntry {
                doc_id: doc_id.to_string(),
                content_id: paper.content_id.clone(),
                model_name: self.embedder.model_name().to_string(),
                vector_dim: self.embedder.dim(),
                document,
                pages: page_map,
                created_at: paper.created_at,
            })
            .await?;

        self.papers
            .set_pending_vector_sync(doc_id, false)
            .await
            .map_err(ProcessingError::from)?;
        Ok(())
    }
}

/// 0-10 health summary: start at 10, subtract per issue by severity.
fn readiness(issues: &[ConsistencyIssue]) -> f32 {
    let penalty: f32 = issues
        .iter()
        .map(|issue| match issue.severity {
            Severity::Critical => 4.0,
            Severity::High => 2.0,
            Severity::Medium => 1.0,
            Severity::Low => 0.5,
        })
        .sum();
    (10.0 - penalty).clamp(0.0, 10.0)
}
