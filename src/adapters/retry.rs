//! Retry with exponential backoff for adapter calls.
//!
//! Only transport-level failures and 5xx responses are retried; a 4xx
//! is the service telling us the request itself is wrong.

use std::time::Duration;

use crate::error::{ProcessingError, Result};

/// Backoff schedule for one logical adapter call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base: Duration::from_millis(500),
            cap: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry (1-based), doubling each time.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Whether this error kind is worth retrying.
    pub fn is_retryable(error: &ProcessingError) -> bool {
        matches!(error, ProcessingError::TransientTransport(_))
    }
}

/// Run an operation with retries per the policy.
///
/// The operation receives the attempt number (1-based). Non-retryable
/// errors propagate immediately.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if RetryPolicy::is_retryable(&e) && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::debug!(
                    "Retrying after {:?} (attempt {} of {}): {}",
                    delay,
                    attempt,
                    policy.max_attempts,
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for(3), Duration::from_secs(2));
        assert_eq!(policy.delay_for(5), Duration::from_secs(8));
        // Cap holds no matter how many attempts.
        assert_eq!(policy.delay_for(30), Duration::from_secs(8));
    }

    #[test]
    fn test_only_transport_errors_retry() {
        assert!(RetryPolicy::is_retryable(&ProcessingError::TransientTransport("x".into())));
        assert!(!RetryPolicy::is_retryable(&ProcessingError::ServiceUnavailable("x".into())));
        assert!(!RetryPolicy::is_retryable(&ProcessingError::InvalidInput("x".into())));
        assert!(!RetryPolicy::is_retryable(&ProcessingError::Internal("x".into())));
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base: Duration::from_millis(1),
            cap: Duration::from_millis(2),
        };
        let calls = AtomicU32::new(0);

        let result = with_retry(&policy, |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ProcessingError::TransientTransport("flaky".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_propagate_error() {
        let policy = RetryPolicy {
            max_attempts: 2,
            base: Duration::from_millis(1),
            cap: Duration::from_millis(1),
        };
        let calls = AtomicU32::new(0);

        let result: Result<()> = with_retry(&policy, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProcessingError::TransientTransport("down".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);

        let result: Result<()> = with_retry(&policy, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProcessingError::ServiceUnavailable("4xx".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
