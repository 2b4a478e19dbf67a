//! Bibliographic metadata extracted from papers.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

/// Which extraction tier produced a metadata record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionTier {
    /// JSON-schema-constrained LLM call.
    StructuredLlm,
    /// Free-form LLM call, parsed afterwards.
    SimpleLlm,
    /// Regex and heuristics over the first two pages.
    RuleBased,
}

impl ExtractionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StructuredLlm => "structured_llm",
            Self::SimpleLlm => "simple_llm",
            Self::RuleBased => "rule_based",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "structured_llm" => Some(Self::StructuredLlm),
            "simple_llm" => Some(Self::SimpleLlm),
            "rule_based" => Some(Self::RuleBased),
            _ => None,
        }
    }
}

/// Zero-or-one bibliographic record per paper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperMetadata {
    pub doc_id: String,
    pub title: Option<String>,
    /// Ordered author list.
    pub authors: Vec<String>,
    pub journal: Option<String>,
    pub year: Option<i32>,
    pub doi: Option<String>,
    pub abstract_text: Option<String>,
    /// Which cascade tier produced this record.
    pub tier: ExtractionTier,
    pub created_at: DateTime<Utc>,
}

impl PaperMetadata {
    /// A candidate is accepted when it has a non-empty title, at least one
    /// author, and a plausible year (or no year claim at all).
    pub fn passes_validation(&self) -> bool {
        let title_ok = self
            .title
            .as_deref()
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false);
        let authors_ok = self.authors.iter().any(|a| !a.trim().is_empty());
        let year_ok = match self.year {
            Some(y) => (1800..=Utc::now().year() + 1).contains(&y),
            None => true,
        };
        title_ok && authors_ok && year_ok
    }
}
