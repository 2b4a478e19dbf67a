//! Three-tier bibliographic metadata cascade.
//!
//! Tries structured-LLM, then simple-LLM, then rule-based heuristics;
//! the first candidate that passes validation wins and its tier is
//! recorded on the stored record. All tiers failing is not an error:
//! the paper simply has no metadata.

use std::sync::Arc;

use chrono::Utc;
use regex::Regex;

use crate::adapters::{LlmExtractor, MetadataFields};
use crate::models::{ExtractionTier, PaperMetadata};

/// Pages fed to extraction: rule-based reads the first two, the LLM
/// tiers get the same slice as text.
const EXTRACTION_PAGES: usize = 2;

/// Metadata extraction cascade over the LLM adapter plus local rules.
pub struct MetadataCascade {
    llm: Arc<LlmExtractor>,
}

impl MetadataCascade {
    pub fn new(llm: Arc<LlmExtractor>) -> Self {
        Self { llm }
    }

    /// Run the cascade for a document.
    ///
    /// Returns the first validated candidate, or `None` when every tier
    /// fails validation or errors out.
    pub async fn extract(&self, doc_id: &str, pages: &[String]) -> Option<PaperMetadata> {
        let text: String = pages
            .iter()
            .take(EXTRACTION_PAGES)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n\n");
        if text.trim().is_empty() {
            return None;
        }

        if self.llm.is_enabled() {
            match self.llm.extract_structured(&text).await {
                Ok(fields) => {
                    if let Some(metadata) =
                        validated(doc_id, fields, ExtractionTier::StructuredLlm)
                    {
                        return Some(metadata);
                    }
                    tracing::debug!("Structured extraction failed validation for {}", doc_id);
                }
                Err(e) => tracing::debug!("Structured extraction failed for {}: {}", doc_id, e),
            }

            match self.llm.extract_simple(&text).await {
                Ok(fields) => {
                    if let Some(metadata) = validated(doc_id, fields, ExtractionTier::SimpleLlm) {
                        return Some(metadata);
                    }
                    tracing::debug!("Simple extraction failed validation for {}", doc_id);
                }
                Err(e) => tracing::debug!("Simple extraction failed for {}: {}", doc_id, e),
            }
        }

        validated(doc_id, rule_based_extract(pages), ExtractionTier::RuleBased)
    }
}

fn validated(
    doc_id: &str,
    fields: MetadataFields,
    tier: ExtractionTier,
) -> Option<PaperMetadata> {
    let metadata = PaperMetadata {
        doc_id: doc_id.to_string(),
        title: fields.title,
        authors: fields.authors,
        journal: fields.journal,
        year: fields.year,
        doi: fields.doi,
        abstract_text: fields.abstract_text,
        tier,
        created_at: Utc::now(),
    };
    metadata.passes_validation().then_some(metadata)
}

/// Tier 3: regex and heuristics over the first two pages.
pub fn rule_based_extract(pages: &[String]) -> MetadataFields {
    let text: String = pages
        .iter()
        .take(EXTRACTION_PAGES)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("\n");

    let mut fields = MetadataFields {
        doi: find_doi(&text),
        year: find_year(&text),
        ..Default::default()
    };

    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    // Title: the first early line that reads like one.
    let title_idx = lines.iter().take(10).position(|line| looks_like_title(line));
    if let Some(idx) = title_idx {
        fields.title = Some(lines[idx].to_string());
        // Authors usually follow the title within a few lines.
        for line in lines.iter().skip(idx + 1).take(4) {
            let authors = parse_author_line(line);
            if !authors.is_empty() {
                fields.authors = authors;
                break;
            }
        }
    }

    fields
}

fn find_doi(text: &str) -> Option<String> {
    let re = Regex::new(r"10\.\d{4,9}/[-._;()/:A-Za-z0-9]+").expect("static regex");
    re.find(text)
        .map(|m| m.as_str().trim_end_matches(['.', ';', ',']).to_string())
}

fn find_year(text: &str) -> Option<i32> {
    let re = Regex::new(r"\b(1[89]\d{2}|20\d{2})\b").expect("static regex");
    let current = chrono::Datelike::year(&Utc::now());
    let result = re
        .find_iter(text)
        .filter_map(|m| m.as_str().parse::<i32>().ok())
        .find(|y| (1800..=current + 1).contains(y));
    result
}

fn looks_like_title(line: &str) -> bool {
    let words = line.split_whitespace().count();
    if !(3..=30).contains(&words) || line.len() < 15 || line.len() > 300 {
        return false;
    }
    // Running headers and footers are usually page numbers, URLs, or
    // journal banners in caps.
    if line.starts_with(|c: char| c.is_ascii_digit())
        || line.contains("http")
        || line.contains('@')
    {
        return false;
    }
    let letters = line.chars().filter(|c| c.is_alphabetic()).count();
    let upper = line
        .chars()
        .filter(|c| c.is_alphabetic() && c.is_uppercase())
        .count();
    letters > 0 && (upper as f32) / (letters as f32) < 0.9
}

fn parse_author_line(line: &str) -> Vec<String> {
    if line.len() > 250 || line.contains("http") {
        return Vec::new();
    }
    let name_re =
        Regex::new(r"^[A-Z][\p{L}.'-]*(\s+[A-Z][\p{L}.'-]*)+$").expect("static regex");

    let candidates: Vec<String> = line
        .split(&[',', ';'][..])
        .flat_map(|part| part.split(" and "))
        .map(|name| name.trim().trim_end_matches(['*', '1', '2', '3']).trim().to_string())
        .filter(|name| !name.is_empty())
        .collect();

    if !candidates.is_empty() && candidates.iter().all(|name| name_re.is_match(name)) {
        candidates
    } else {
        Vec::new()
    }
}
