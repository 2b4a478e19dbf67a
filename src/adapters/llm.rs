//! LLM metadata extraction adapter.
//!
//! Talks to an Ollama-compatible API. Two call shapes back the first
//! two tiers of the metadata cascade: a JSON-constrained call and a
//! free-form call whose output is parsed line by line.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::breaker::CircuitBreaker;
use super::http::{classify_transport_error, ensure_success};
use super::retry::{with_retry, RetryPolicy};
use crate::error::{ProcessingError, Result};

/// Prompt for the JSON-schema-constrained extraction tier.
pub const STRUCTURED_PROMPT: &str = r#"You are extracting bibliographic metadata from the first pages of a scholarly paper.

Return ONLY a JSON object with exactly these keys:
{"title": string, "authors": [string, ...], "journal": string or null, "year": integer or null, "doi": string or null, "abstract": string or null}

Rules:
- "title" is the paper title, not the journal name or a running header.
- "authors" is the ordered author list, one name per entry.
- "year" is the publication year as a number.
- Use null for anything not present in the text.

Paper text:
{content}"#;

/// Prompt for the free-form extraction tier.
pub const SIMPLE_PROMPT: &str = r#"Read the first pages of a scholarly paper and report its metadata, one field per line, exactly in this format:

Title: <title>
Authors: <author 1>; <author 2>; ...
Journal: <journal or unknown>
Year: <year or unknown>
DOI: <doi or unknown>

Paper text:
{content}"#;

/// Configuration for the LLM extraction service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Ollama-compatible API endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_timeout_s")]
    pub timeout_s: u64,
    /// Maximum characters of page text sent per request.
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_enabled() -> bool {
    true
}
fn default_endpoint() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "llama3.2:instruct".to_string()
}
fn default_timeout_s() -> u64 {
    120
}
fn default_max_content_chars() -> usize {
    12000
}
fn default_temperature() -> f32 {
    0.1
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            endpoint: default_endpoint(),
            model: default_model(),
            timeout_s: default_timeout_s(),
            max_content_chars: default_max_content_chars(),
            temperature: default_temperature(),
        }
    }
}

/// Raw metadata fields as an extraction tier produced them, before
/// validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetadataFields {
    pub title: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    pub journal: Option<String>,
    pub year: Option<i32>,
    pub doi: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
}

/// Ollama API request format.
#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a str>,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

/// Ollama API response format.
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

/// HTTP client for LLM metadata extraction, gated by its circuit breaker.
pub struct LlmExtractor {
    config: LlmConfig,
    client: reqwest::Client,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
}

impl LlmExtractor {
    pub fn new(config: LlmConfig, breaker: Arc<CircuitBreaker>, retry: RetryPolicy) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_s))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            config,
            client,
            breaker,
            retry,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn truncate_content<'a>(&self, text: &'a str) -> &'a str {
        match text.char_indices().nth(self.config.max_content_chars) {
            Some((idx, _)) => &text[..idx],
            None => text,
        }
    }

    async fn generate(&self, prompt: &str, json_format: bool) -> Result<String> {
        if !self.config.enabled {
            return Err(ProcessingError::ServiceUnavailable("llm disabled".into()));
        }

        let url = format!("{}/api/generate", self.config.endpoint);
        let request = OllamaRequest {
            model: &self.config.model,
            prompt,
            stream: false,
            format: json_format.then_some("json"),
            options: OllamaOptions {
                temperature: self.config.temperature,
            },
        };

        let url: &str = &url;
        let request = &request;
        self.breaker
            .call(|| with_retry(&self.retry, |_| self.generate_once(url, request)))
            .await
    }

    async fn generate_once(&self, url: &str, request: &OllamaRequest<'_>) -> Result<String> {
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| classify_transport_error("llm", e))?;
        let response = ensure_success("llm", response)?;
        let body: OllamaResponse = response.json().await.map_err(|e| {
            ProcessingError::ServiceUnavailable(format!("llm: bad response: {}", e))
        })?;
        Ok(body.response)
    }

    /// Tier 1: JSON-schema-constrained extraction.
    pub async fn extract_structured(&self, text: &str) -> Result<MetadataFields> {
        let prompt = STRUCTURED_PROMPT.replace("{content}", self.truncate_content(text));
        let response = self.generate(&prompt, true).await?;
        serde_json::from_str(&response).map_err(|e| {
            ProcessingError::ServiceUnavailable(format!("llm: unparseable JSON metadata: {}", e))
        })
    }

    /// Tier 2: free-form extraction, parsed afterwards.
    pub async fn extract_simple(&self, text: &str) -> Result<MetadataFields> {
        let prompt = SIMPLE_PROMPT.replace("{content}", self.truncate_content(text));
        let response = self.generate(&prompt, false).await?;
        Ok(parse_freeform_metadata(&response))
    }
}

/// Parse the line-per-field output of the simple tier.
pub fn parse_freeform_metadata(response: &str) -> MetadataFields {
    let mut fields = MetadataFields::default();

    for line in response.lines() {
        let line = line.trim();
        if let Some(value) = strip_field(line, "Title:") {
            fields.title = non_unknown(value);
        } else if let Some(value) = strip_field(line, "Authors:") {
            fields.authors = value
                .split(';')
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty() && a.to_lowercase() != "unknown")
                .collect();
        } else if let Some(value) = strip_field(line, "Journal:") {
            fields.journal = non_unknown(value);
        } else if let Some(value) = strip_field(line, "Year:") {
            fields.year = value.trim().parse().ok();
        } else if let Some(value) = strip_field(line, "DOI:") {
            fields.doi = non_unknown(value);
        }
    }

    fields
}

fn strip_field<'a>(line: &'a str, field: &str) -> Option<&'a str> {
    line.strip_prefix(field).map(str::trim)
}

fn non_unknown(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("unknown") {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_freeform_full() {
        let response = "Title: Attention Is All You Need\nAuthors: A. Vaswani; N. Shazeer\nJournal: NeurIPS\nYear: 2017\nDOI: 10.5555/3295222";
        let fields = parse_freeform_metadata(response);
        assert_eq!(fields.title.as_deref(), Some("Attention Is All You Need"));
        assert_eq!(fields.authors, vec!["A. Vaswani", "N. Shazeer"]);
        assert_eq!(fields.journal.as_deref(), Some("NeurIPS"));
        assert_eq!(fields.year, Some(2017));
        assert_eq!(fields.doi.as_deref(), Some("10.5555/3295222"));
    }

    #[test]
    fn test_parse_freeform_unknowns_become_none() {
        let response = "Title: Some Paper\nAuthors: A. Author\nJournal: unknown\nYear: unknown\nDOI: Unknown";
        let fields = parse_freeform_metadata(response);
        assert_eq!(fields.journal, None);
        assert_eq!(fields.year, None);
        assert_eq!(fields.doi, None);
    }

    #[test]
    fn test_parse_freeform_garbage_is_empty() {
        let fields = parse_freeform_metadata("I could not find any metadata, sorry!");
        assert!(fields.title.is_none());
        assert!(fields.authors.is_empty());
    }

    #[test]
    fn test_structured_fields_deserialization() {
        let json = r#"{"title": "T", "authors": ["A", "B"], "journal": null, "year": 2020, "doi": null, "abstract": "text"}"#;
        let fields: MetadataFields = serde_json::from_str(json).unwrap();
        assert_eq!(fields.title.as_deref(), Some("T"));
        assert_eq!(fields.authors.len(), 2);
        assert_eq!(fields.year, Some(2020));
        assert_eq!(fields.abstract_text.as_deref(), Some("text"));
    }
}
