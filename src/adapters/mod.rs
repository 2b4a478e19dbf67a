//! External-service adapters with circuit breakers and retries.
//!
//! Only optional pipeline stages depend on these services; must-succeed
//! stages run entirely in-process.

mod breaker;
mod http;
mod layout;
mod llm;
mod quality;
mod retry;

pub use breaker::{BreakerConfig, BreakerRegistry, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use layout::{LayoutClient, LayoutConfig};
pub use llm::{parse_freeform_metadata, LlmConfig, LlmExtractor, MetadataFields};
pub use quality::{QualityAssessment, QualityClient, QualityConfig};
pub use retry::{with_retry, RetryPolicy};

/// Service names registered in the breaker registry.
pub const SERVICE_OCR_QUALITY: &str = "ocr_quality";
pub const SERVICE_LAYOUT: &str = "layout";
pub const SERVICE_LLM: &str = "llm";

/// All breaker-gated services.
pub const ALL_SERVICES: [&str; 3] = [SERVICE_OCR_QUALITY, SERVICE_LAYOUT, SERVICE_LLM];
