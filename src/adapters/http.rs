//! Shared HTTP plumbing for service adapters.

use crate::error::{ProcessingError, Result};

/// Map a reqwest failure onto the error taxonomy. Connection problems
/// and timeouts are transient; anything else is the adapter's bug.
pub fn classify_transport_error(service: &str, error: reqwest::Error) -> ProcessingError {
    if error.is_timeout() || error.is_connect() || error.is_request() {
        ProcessingError::TransientTransport(format!("{}: {}", service, error))
    } else {
        ProcessingError::Internal(format!("{}: {}", service, error))
    }
}

/// Classify a non-success response: 5xx is retryable, 4xx fails the
/// call immediately.
pub fn classify_status(service: &str, status: reqwest::StatusCode) -> ProcessingError {
    if status.is_server_error() {
        ProcessingError::TransientTransport(format!("{}: HTTP {}", service, status))
    } else {
        ProcessingError::ServiceUnavailable(format!("{}: HTTP {}", service, status))
    }
}

/// Check a response status, passing successes through.
pub fn ensure_success(service: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(classify_status(service, status))
    }
}
