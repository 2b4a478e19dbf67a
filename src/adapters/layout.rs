//! Layout analyzer adapter.
//!
//! The analyzer returns a structured description of sections,
//! paragraphs, tables, and figures per page. Its payload is stored
//! opaquely; only `page_count` is interpreted.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::breaker::CircuitBreaker;
use super::http::{classify_transport_error, ensure_success};
use super::retry::{with_retry, RetryPolicy};
use crate::error::{ProcessingError, Result};

/// Configuration for the layout analyzer service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_s")]
    pub timeout_s: u64,
}

fn default_enabled() -> bool {
    true
}
fn default_endpoint() -> String {
    "http://localhost:8812".to_string()
}
fn default_timeout_s() -> u64 {
    300
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            endpoint: default_endpoint(),
            timeout_s: default_timeout_s(),
        }
    }
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    pages: &'a [String],
}

/// HTTP client for the layout analyzer, gated by its circuit breaker.
pub struct LayoutClient {
    config: LayoutConfig,
    client: reqwest::Client,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
}

impl LayoutClient {
    pub fn new(config: LayoutConfig, breaker: Arc<CircuitBreaker>, retry: RetryPolicy) -> Self {
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

    /// Analyze page texts into the layout payload.
    pub async fn analyze(&self, pages: &[String]) -> Result<serde_json::Value> {
        if !self.config.enabled {
            return Err(ProcessingError::ServiceUnavailable(
                "layout analyzer disabled".into(),
            ));
        }

        let url = format!("{}/analyze", self.config.endpoint);
        let url: &str = &url;
        self.breaker
            .call(|| with_retry(&self.retry, |_| self.analyze_once(url, pages)))
            .await
    }

    async fn analyze_once(&self, url: &str, pages: &[String]) -> Result<serde_json::Value> {
        let response = self
            .client
            .post(url)
            .json(&AnalyzeRequest { pages })
            .send()
            .await
            .map_err(|e| classify_transport_error("layout", e))?;
        let response = ensure_success("layout", response)?;
        response.json().await.map_err(|e| {
            ProcessingError::ServiceUnavailable(format!("layout: bad response: {}", e))
        })
    }
}
