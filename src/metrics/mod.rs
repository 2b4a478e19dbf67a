//! Performance tracking: stage timings, error taxonomy counts, and
//! system resource samples.
//!
//! Samples go into a fixed ring buffer (24 h at 1 Hz) so the tracker's
//! memory use is bounded no matter how long the process runs.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sysinfo::System;

/// Ring-buffer capacity: one day of 1 Hz samples.
const SAMPLE_CAPACITY: usize = 24 * 60 * 60;

/// Aggregate for one pipeline stage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageStats {
    pub runs: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_duration_s: f64,
}

impl StageStats {
    pub fn success_rate(&self) -> f64 {
        if self.runs == 0 {
            return 1.0;
        }
        self.successes as f64 / self.runs as f64
    }

    pub fn mean_duration_s(&self) -> f64 {
        if self.runs == 0 {
            return 0.0;
        }
        self.total_duration_s / self.runs as f64
    }
}

/// One system resource sample.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceSample {
    pub at: DateTime<Utc>,
    pub cpu_percent: f32,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
}

#[derive(Default)]
struct TrackerInner {
    stages: HashMap<String, StageStats>,
    errors: HashMap<String, u64>,
    samples: VecDeque<ResourceSample>,
}

/// Process-wide performance tracker, shared behind an `Arc`.
pub struct PerformanceTracker {
    inner: Mutex<TrackerInner>,
    active_jobs: AtomicI64,
}

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TrackerInner::default()),
            active_jobs: AtomicI64::new(0),
        }
    }

    /// Record one stage execution.
    pub fn record_stage(&self, stage: &str, duration: Duration, success: bool) {
        let mut inner = self.inner.lock().expect("tracker lock poisoned");
        let stats = inner.stages.entry(stage.to_string()).or_default();
        stats.runs += 1;
        if success {
            stats.successes += 1;
        } else {
            stats.failures += 1;
        }
        stats.total_duration_s += duration.as_secs_f64();
    }

    /// Count an error by its taxonomy kind.
    pub fn record_error(&self, kind: &str) {
        let mut inner = self.inner.lock().expect("tracker lock poisoned");
        *inner.errors.entry(kind.to_string()).or_default() += 1;
    }

    pub fn job_started(&self) {
        self.active_jobs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_finished(&self) {
        self.active_jobs.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active_jobs(&self) -> i64 {
        self.active_jobs.load(Ordering::Relaxed)
    }

    /// Push a resource sample, evicting the oldest once full.
    pub fn push_sample(&self, sample: ResourceSample) {
        let mut inner = self.inner.lock().expect("tracker lock poisoned");
        if inner.samples.len() >= SAMPLE_CAPACITY {
            inner.samples.pop_front();
        }
        inner.samples.push_back(sample);
    }

    pub fn stage_stats(&self) -> HashMap<String, StageStats> {
        self.inner.lock().expect("tracker lock poisoned").stages.clone()
    }

    pub fn error_counts(&self) -> HashMap<String, u64> {
        self.inner.lock().expect("tracker lock poisoned").errors.clone()
    }

    pub fn latest_sample(&self) -> Option<ResourceSample> {
        self.inner
            .lock()
            .expect("tracker lock poisoned")
            .samples
            .back()
            .cloned()
    }

    /// JSON snapshot for the monitoring surface.
    pub fn export_json(&self) -> serde_json::Value {
        let inner = self.inner.lock().expect("tracker lock poisoned");
        let stages: serde_json::Map<String, serde_json::Value> = inner
            .stages
            .iter()
            .map(|(name, stats)| {
                (
                    name.clone(),
                    serde_json::json!({
                        "runs": stats.runs,
                        "successes": stats.successes,
                        "failures": stats.failures,
                        "success_rate": stats.success_rate(),
                        "mean_duration_s": stats.mean_duration_s(),
                    }),
                )
            })
            .collect();

        serde_json::json!({
            "active_jobs": self.active_jobs(),
            "stages": stages,
            "errors": inner.errors,
            "latest_sample": inner.samples.back(),
            "sample_count": inner.samples.len(),
        })
    }

    /// CSV export of the resource samples.
    pub fn export_samples_csv(&self) -> String {
        let inner = self.inner.lock().expect("tracker lock poisoned");
        let mut out = String::from("at,cpu_percent,memory_used_bytes,memory_total_bytes\n");
        for sample in &inner.samples {
            out.push_str(&format!(
                "{},{:.2},{},{}\n",
                sample.at.to_rfc3339(),
                sample.cpu_percent,
                sample.memory_used_bytes,
                sample.memory_total_bytes
            ));
        }
        out
    }
}

/// Run the 1 Hz resource sampler until the process exits.
pub async fn run_sampler(tracker: std::sync::Arc<PerformanceTracker>) {
    let mut system = System::new();
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        system.refresh_cpu_usage();
        system.refresh_memory();

        let cpu_percent = system.global_cpu_usage();
        tracker.push_sample(ResourceSample {
            at: Utc::now(),
            cpu_percent,
            memory_used_bytes: system.used_memory(),
            memory_total_bytes: system.total_memory(),
        });
    }
}
