//! Per-source upload rate limiting.
//!
//! Sliding one-hour and one-day windows per client address. The
//! identifier is the socket address the listener saw; proxy headers are
//! deliberately not trusted.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ProcessingError, Result};

/// Upload rate limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_uploads_per_hour")]
    pub uploads_per_hour: u32,
    #[serde(default = "default_uploads_per_day")]
    pub uploads_per_day: u32,
}

fn default_uploads_per_hour() -> u32 {
    50
}
fn default_uploads_per_day() -> u32 {
    200
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            uploads_per_hour: default_uploads_per_hour(),
            uploads_per_day: default_uploads_per_day(),
        }
    }
}

struct SourceState {
    /// Upload timestamps within the last day, oldest first.
    uploads: Vec<DateTime<Utc>>,
}

/// In-process sliding-window limiter keyed by client IP.
pub struct UploadRateLimiter {
    config: RateLimitConfig,
    sources: Mutex<HashMap<IpAddr, SourceState>>,
}

impl UploadRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            sources: Mutex::new(HashMap::new()),
        }
    }

    /// Record an upload attempt, failing when either window is full.
    pub fn check_and_record(&self, source: IpAddr) -> Result<()> {
        self.check_and_record_at(source, Utc::now())
    }

    fn check_and_record_at(&self, source: IpAddr, now: DateTime<Utc>) -> Result<()> {
        let mut sources = self.sources.lock().expect("rate limiter lock poisoned");
        let state = sources
            .entry(source)
            .or_insert_with(|| SourceState { uploads: Vec::new() });

        let day_ago = now - Duration::days(1);
        state.uploads.retain(|t| *t > day_ago);

        if state.uploads.len() as u32 >= self.config.uploads_per_day {
            return Err(ProcessingError::RateLimited(format!(
                "daily upload limit of {} reached",
                self.config.uploads_per_day
            )));
        }

        let hour_ago = now - Duration::hours(1);
        let last_hour = state.uploads.iter().filter(|t| **t > hour_ago).count() as u32;
        if last_hour >= self.config.uploads_per_hour {
            return Err(ProcessingError::RateLimited(format!(
                "hourly upload limit of {} reached",
                self.config.uploads_per_hour
            )));
        }

        state.uploads.push(now);
        Ok(())
    }

    /// Drop sources with no recent activity. Called from the retention
    /// sweeper to bound memory.
    pub fn prune(&self) {
        let day_ago = Utc::now() - Duration::days(1);
        let mut sources = self.sources.lock().expect("rate limiter lock poisoned");
        sources.retain(|_, state| state.uploads.iter().any(|t| *t > day_ago));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([127, 0, 0, last])
    }

    fn limiter(per_hour: u32, per_day: u32) -> UploadRateLimiter {
        UploadRateLimiter::new(RateLimitConfig {
            uploads_per_hour: per_hour,
            uploads_per_day: per_day,
        })
    }

    #[test]
    fn test_hourly_limit() {
        let limiter = limiter(3, 100);
        let now = Utc::now();
        for _ in 0..3 {
            limiter.check_and_record_at(ip(1), now).unwrap();
        }
        let err = limiter.check_and_record_at(ip(1), now).unwrap_err();
        assert_eq!(err.kind_str(), "rate_limited");
    }

    #[test]
    fn test_hourly_window_slides() {
        let limiter = limiter(2, 100);
        let start = Utc::now();
        limiter.check_and_record_at(ip(1), start).unwrap();
        limiter.check_and_record_at(ip(1), start).unwrap();
        assert!(limiter.check_and_record_at(ip(1), start).is_err());

        // 61 minutes later the hourly window has rolled over.
        let later = start + Duration::minutes(61);
        assert!(limiter.check_and_record_at(ip(1), later).is_ok());
    }

    #[test]
    fn test_daily_limit_outlasts_hourly_window() {
        let limiter = limiter(100, 4);
        let start = Utc::now();
        for i in 0..4 {
            limiter
                .check_and_record_at(ip(1), start + Duration::hours(i * 2))
                .unwrap();
        }
        let err = limiter
            .check_and_record_at(ip(1), start + Duration::hours(9))
            .unwrap_err();
        assert_eq!(err.kind_str(), "rate_limited");

        // A day after the first upload there is room again.
        assert!(limiter
            .check_and_record_at(ip(1), start + Duration::hours(25))
            .is_ok());
    }

    #[test]
    fn test_sources_are_independent() {
        let limiter = limiter(1, 10);
        let now = Utc::now();
        limiter.check_and_record_at(ip(1), now).unwrap();
        assert!(limiter.check_and_record_at(ip(1), now).is_err());
        assert!(limiter.check_and_record_at(ip(2), now).is_ok());
    }

    #[test]
    fn test_prune_drops_idle_sources() {
        let limiter = limiter(10, 10);
        let old = Utc::now() - Duration::days(2);
        limiter.check_and_record_at(ip(1), old).unwrap();
        limiter.prune();
        assert!(limiter.sources.lock().unwrap().is_empty());
    }
}
