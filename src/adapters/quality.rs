//! OCR quality scorer adapter.
//!
//! The scorer is an external model service that grades extracted text.
//! It backs the optional quality-assessment stage and breaks ties
//! during OCR language detection.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::breaker::CircuitBreaker;
use super::http::{classify_transport_error, ensure_success};
use super::retry::{with_retry, RetryPolicy};
use crate::error::{ProcessingError, Result};
use crate::models::OcrQuality;

/// Configuration for the quality scorer service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Scorer API endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Per-call timeout in seconds.
    #[serde(default = "default_timeout_s")]
    pub timeout_s: u64,
}

fn default_enabled() -> bool {
    true
}
fn default_endpoint() -> String {
    "http://localhost:8811".to_string()
}
fn default_timeout_s() -> u64 {
    60
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            endpoint: default_endpoint(),
            timeout_s: default_timeout_s(),
        }
    }
}

/// Scorer verdict for one text sample.
#[derive(Debug, Clone)]
pub struct QualityAssessment {
    pub quality: OcrQuality,
    pub score: f32,
}

#[derive(Serialize)]
struct AssessRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct AssessResponse {
    quality: String,
    #[serde(default)]
    score: f32,
}

/// HTTP client for the quality scorer, gated by its circuit breaker.
pub struct QualityClient {
    config: QualityConfig,
    client: reqwest::Client,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
}

impl QualityClient {
    pub fn new(config: QualityConfig, breaker: Arc<CircuitBreaker>, retry: RetryPolicy) -> Self {
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

    /// Grade a text sample.
    pub async fn assess(&self, text: &str) -> Result<QualityAssessment> {
        if !self.config.enabled {
            return Err(ProcessingError::ServiceUnavailable(
                "quality scorer disabled".into(),
            ));
        }

        let url = format!("{}/assess", self.config.endpoint);
        let url: &str = &url;
        self.breaker
            .call(|| with_retry(&self.retry, |_| self.assess_once(url, text)))
            .await
    }

    async fn assess_once(&self, url: &str, text: &str) -> Result<QualityAssessment> {
        let response = self
            .client
            .post(url)
            .json(&AssessRequest { text })
            .send()
            .await
            .map_err(|e| classify_transport_error("ocr_quality", e))?;
        let response = ensure_success("ocr_quality", response)?;
        let body: AssessResponse = response.json().await.map_err(|e| {
            ProcessingError::ServiceUnavailable(format!("ocr_quality: bad response: {}", e))
        })?;
        Ok(QualityAssessment {
            quality: OcrQuality::from_str(&body.quality).unwrap_or(OcrQuality::Unknown),
            score: body.score,
        })
    }

    /// Score several language candidates' OCR samples and pick the best.
    ///
    /// Returns `None` when no candidate could be scored.
    pub async fn pick_best_language(
        &self,
        samples: &[(String, String)],
    ) -> Option<String> {
        let mut best: Option<(String, f32)> = None;
        for (language, text) in samples {
            match self.assess(text).await {
                Ok(assessment) => {
                    if best
                        .as_ref()
                        .map(|(_, score)| assessment.score > *score)
                        .unwrap_or(true)
                    {
                        best = Some((language.clone(), assessment.score));
                    }
                }
                Err(e) => {
                    tracing::debug!("Language sample scoring failed for {}: {}", language, e);
                }
            }
        }
        best.map(|(language, _)| language)
    }
}
