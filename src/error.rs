//! Error taxonomy shared across the ingestion core.
//!
//! Adapters translate raw transport and parse errors into these kinds;
//! the orchestrator decides per stage whether a kind is recoverable, and
//! HTTP handlers map kinds onto status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Classified failure for a job, a stage, or an HTTP request.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    /// Malformed or disallowed upload. Reported to the caller, not retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The job queue is at capacity. The caller retries or backs off.
    #[error("queue full")]
    QueueFull,

    /// Per-source upload rate limit exceeded.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// External dependency open-circuit or down.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Network failure or 5xx from a dependency. Retried with backoff
    /// inside the adapter before it surfaces here.
    #[error("transient transport error: {0}")]
    TransientTransport(String),

    /// Schema or constraint violation. Fatal for the job; the consistency
    /// checker picks up whatever state was left behind.
    #[error("data integrity: {0}")]
    DataIntegrity(String),

    /// Cooperative cancellation. Terminal.
    #[error("cancelled")]
    Cancelled,

    /// Bug or unexpected condition.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProcessingError {
    /// Short stable tag for persistence in `error_message` and metrics.
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::QueueFull => "queue_full",
            Self::RateLimited(_) => "rate_limited",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::TransientTransport(_) => "transient_transport",
            Self::DataIntegrity(_) => "data_integrity",
            Self::Cancelled => "cancelled",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether an optional pipeline stage may swallow this error and
    /// continue. InvalidInput and Internal always propagate.
    pub fn recoverable_as_skip(&self) -> bool {
        !matches!(self, Self::InvalidInput(_) | Self::Internal(_))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::TransientTransport(_) => StatusCode::BAD_GATEWAY,
            Self::DataIntegrity(_) => StatusCode::CONFLICT,
            Self::Cancelled => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<diesel::result::Error> for ProcessingError {
    fn from(e: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error};
        match &e {
            Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                ProcessingError::DataIntegrity(info.message().to_string())
            }
            Error::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, info) => {
                ProcessingError::DataIntegrity(info.message().to_string())
            }
            Error::NotFound => ProcessingError::DataIntegrity("row not found".to_string()),
            _ => ProcessingError::Internal(e.to_string()),
        }
    }
}

impl From<std::io::Error> for ProcessingError {
    fn from(e: std::io::Error) -> Self {
        ProcessingError::Internal(format!("io: {}", e))
    }
}

impl From<serde_json::Error> for ProcessingError {
    fn from(e: serde_json::Error) -> Self {
        ProcessingError::Internal(format!("json: {}", e))
    }
}

impl IntoResponse for ProcessingError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.kind_str(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ProcessingError>;
