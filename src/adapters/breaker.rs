//! Circuit breakers for outbound service calls.
//!
//! Every external dependency is gated by its own breaker. While a
//! breaker is open no outbound call is made; after the open window one
//! probe is allowed through, and its outcome decides whether the
//! circuit closes again.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{ProcessingError, Result};

/// Breaker tuning, shared by all services unless overridden.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Failures within the rolling window that trip the circuit.
    pub failure_threshold: u32,
    /// Rolling window for counting failures.
    pub window: Duration,
    /// How long the circuit stays open before allowing a probe.
    pub open_duration: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(60),
            open_duration: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Point-in-time view of a breaker for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub service: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u64,
    pub total_calls: u64,
    pub total_failures: u64,
    pub last_error: Option<String>,
    pub opened_at: Option<DateTime<Utc>>,
}

struct BreakerInner {
    state: CircuitState,
    /// Failure instants within the rolling window.
    recent_failures: VecDeque<Instant>,
    success_count: u64,
    total_calls: u64,
    total_failures: u64,
    last_error: Option<String>,
    opened_at: Option<Instant>,
    opened_at_wall: Option<DateTime<Utc>>,
    probe_in_flight: bool,
}

/// Per-service circuit breaker. Shared across workers behind an `Arc`.
pub struct CircuitBreaker {
    service: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(service: &str, config: BreakerConfig) -> Self {
        Self {
            service: service.to_string(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                recent_failures: VecDeque::new(),
                success_count: 0,
                total_calls: 0,
                total_failures: 0,
                last_error: None,
                opened_at: None,
                opened_at_wall: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Ask permission to make an outbound call.
    ///
    /// Open circuits fail fast; a half-open circuit admits exactly one
    /// probe at a time.
    pub fn acquire(&self) -> Result<()> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");

        if inner.state == CircuitState::Open {
            let elapsed = inner
                .opened_at
                .map(|t| t.elapsed() >= self.config.open_duration)
                .unwrap_or(true);
            if elapsed {
                inner.state = CircuitState::HalfOpen;
                inner.probe_in_flight = false;
            }
        }

        match inner.state {
            CircuitState::Closed => {
                inner.total_calls += 1;
                Ok(())
            }
            CircuitState::HalfOpen if !inner.probe_in_flight => {
                inner.probe_in_flight = true;
                inner.total_calls += 1;
                Ok(())
            }
            _ => Err(ProcessingError::ServiceUnavailable(format!(
                "{} circuit open",
                self.service
            ))),
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.success_count += 1;
        if inner.state == CircuitState::HalfOpen {
            // Probe succeeded: close and reset counters.
            inner.state = CircuitState::Closed;
            inner.recent_failures.clear();
            inner.probe_in_flight = false;
            inner.opened_at = None;
            inner.opened_at_wall = None;
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self, error: &str) {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.total_failures += 1;
        inner.last_error = Some(error.to_string());

        match inner.state {
            CircuitState::HalfOpen => {
                // Probe failed: back to open.
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                inner.opened_at_wall = Some(Utc::now());
                inner.probe_in_flight = false;
            }
            CircuitState::Closed => {
                inner.recent_failures.push_back(now);
                let window = self.config.window;
                while let Some(front) = inner.recent_failures.front() {
                    if front.elapsed() > window {
                        inner.recent_failures.pop_front();
                    } else {
                        break;
                    }
                }
                if inner.recent_failures.len() as u32 >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                    inner.opened_at_wall = Some(Utc::now());
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Run an operation through the breaker.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        self.acquire()?;
        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure(&e.to_string());
                Err(e)
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        // Report the state an acquire would observe, including the
        // open -> half_open transition once the window has elapsed.
        let inner = self.inner.lock().expect("breaker lock poisoned");
        if inner.state == CircuitState::Open {
            let elapsed = inner
                .opened_at
                .map(|t| t.elapsed() >= self.config.open_duration)
                .unwrap_or(true);
            if elapsed {
                return CircuitState::HalfOpen;
            }
        }
        inner.state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().expect("breaker lock poisoned");
        BreakerSnapshot {
            service: self.service.clone(),
            state: inner.state,
            failure_count: inner.recent_failures.len() as u32,
            success_count: inner.success_count,
            total_calls: inner.total_calls,
            total_failures: inner.total_failures,
            last_error: inner.last_error.clone(),
            opened_at: inner.opened_at_wall,
        }
    }
}

/// All breakers in the process, keyed by service name.
pub struct BreakerRegistry {
    breakers: HashMap<String, std::sync::Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig, services: &[&str]) -> Self {
        let breakers = services
            .iter()
            .map(|s| {
                (
                    s.to_string(),
                    std::sync::Arc::new(CircuitBreaker::new(s, config.clone())),
                )
            })
            .collect();
        Self { breakers }
    }

    pub fn get(&self, service: &str) -> Option<std::sync::Arc<CircuitBreaker>> {
        self.breakers.get(service).cloned()
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snaps: Vec<_> = self.breakers.values().map(|b| b.snapshot()).collect();
        snaps.sort_by(|a, b| a.service.cmp(&b.service));
        snaps
    }
}
