//! Configuration for the ingestion system.
//!
//! Every option has a default; a TOML file and a handful of environment
//! variables override them. Sections mirror the subsystems they tune.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::adapters::{BreakerConfig, LayoutConfig, LlmConfig, QualityConfig, RetryPolicy};
use crate::backup::BackupConfig;
use crate::engine::EngineConfig;
use crate::security::{RateLimitConfig, SecurityConfig};
use crate::storage::DataLayout;

/// Circuit-breaker tuning section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_open_duration_s")]
    pub open_duration_s: u64,
    /// Timeout for the half-open probe call.
    #[serde(default = "default_probe_timeout_s")]
    pub probe_timeout_s: u64,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_open_duration_s() -> u64 {
    60
}
fn default_probe_timeout_s() -> u64 {
    30
}

impl Default for CircuitSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            open_duration_s: default_open_duration_s(),
            probe_timeout_s: default_probe_timeout_s(),
        }
    }
}

/// Retry tuning section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_s")]
    pub base_s: f64,
    #[serde(default = "default_cap_s")]
    pub cap_s: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_s() -> f64 {
    0.5
}
fn default_cap_s() -> f64 {
    8.0
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_s: default_base_s(),
            cap_s: default_cap_s(),
        }
    }
}

/// Duplicate-prevention tuning section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupSettings {
    /// Cosine similarity at or above this is a Level-3 duplicate.
    #[serde(default = "default_l3_threshold")]
    pub l3_threshold: f32,
}

fn default_l3_threshold() -> f32 {
    0.95
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            l3_threshold: default_l3_threshold(),
        }
    }
}

/// Top-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Data root holding the database, stored PDFs, vectors, backups.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bearer token for the /admin endpoints. Unset disables them.
    #[serde(default)]
    pub admin_token: Option<String>,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    #[serde(default = "default_job_retention_days")]
    pub job_retention_days: i64,

    #[serde(default)]
    pub circuit: CircuitSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub dedup: DedupSettings,
    #[serde(default)]
    pub upload: SecurityConfig,
    #[serde(default)]
    pub rate: RateLimitConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub layout: LayoutConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub backup: BackupConfig,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("refbase")
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8060
}
fn default_max_concurrent() -> usize {
    3
}
fn default_max_queue_size() -> usize {
    100
}
fn default_job_retention_days() -> i64 {
    7
}

impl Settings {
    /// Load settings: file (if present), then environment overrides.
    pub fn load(config_path: Option<&Path>) -> anyhow::Result<Self> {
        let mut settings = match config_path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                toml::from_str(&raw)?
            }
            None => {
                let default_path = Self::default_config_path();
                if default_path.exists() {
                    let raw = std::fs::read_to_string(&default_path)?;
                    toml::from_str(&raw)?
                } else {
                    Self::with_defaults()
                }
            }
        };

        if let Ok(dir) = std::env::var("REFBASE_DATA_DIR") {
            settings.data_dir = PathBuf::from(shellexpand::tilde(&dir).into_owned());
        }
        if let Ok(token) = std::env::var("REFBASE_ADMIN_TOKEN") {
            settings.admin_token = Some(token);
        }

        Ok(settings)
    }

    /// Defaults without touching the filesystem or environment.
    pub fn with_defaults() -> Self {
        toml::from_str("").expect("defaults are total")
    }

    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("refbase")
            .join("config.toml")
    }

    pub fn data_layout(&self) -> DataLayout {
        DataLayout::new(&self.data_dir)
    }

    pub fn database_url(&self) -> String {
        format!("sqlite:{}", self.data_layout().database_path().display())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_concurrent: self.max_concurrent,
            max_queue_size: self.max_queue_size,
            job_retention_days: self.job_retention_days,
        }
    }

    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.circuit.failure_threshold,
            window: std::time::Duration::from_secs(60),
            open_duration: std::time::Duration::from_secs(self.circuit.open_duration_s),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base: std::time::Duration::from_secs_f64(self.retry.base_s),
            cap: std::time::Duration::from_secs_f64(self.retry.cap_s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let settings = Settings::with_defaults();
        assert_eq!(settings.max_concurrent, 3);
        assert_eq!(settings.max_queue_size, 100);
        assert_eq!(settings.job_retention_days, 7);
        assert_eq!(settings.circuit.failure_threshold, 5);
        assert_eq!(settings.circuit.open_duration_s, 60);
        assert_eq!(settings.retry.max_attempts, 3);
        assert_eq!(settings.retry.base_s, 0.5);
        assert_eq!(settings.retry.cap_s, 8.0);
        assert_eq!(settings.dedup.l3_threshold, 0.95);
        assert_eq!(settings.upload.max_mb, 100);
        assert_eq!(settings.upload.min_bytes, 1024);
        assert_eq!(settings.rate.uploads_per_hour, 50);
        assert_eq!(settings.rate.uploads_per_day, 200);
        assert_eq!(settings.backup.daily_retention_days, 7);
        assert_eq!(settings.backup.weekly_retention_days, 30);
        assert_eq!(settings.backup.monthly_retention_days, 90);
        assert!(settings.admin_token.is_none());
    }

    #[test]
    fn test_partial_toml_overrides() {
        let settings: Settings = toml::from_str(
            r#"
            max_concurrent = 8

            [dedup]
            l3_threshold = 0.9

            [upload]
            max_mb = 10
            "#,
        )
        .unwrap();
        assert_eq!(settings.max_concurrent, 8);
        assert_eq!(settings.dedup.l3_threshold, 0.9);
        assert_eq!(settings.upload.max_mb, 10);
        // Untouched sections keep their defaults.
        assert_eq!(settings.max_queue_size, 100);
        assert_eq!(settings.circuit.failure_threshold, 5);
    }

    #[test]
    fn test_retry_policy_conversion() {
        let settings = Settings::with_defaults();
        let policy = settings.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base, std::time::Duration::from_millis(500));
        assert_eq!(policy.cap, std::time::Duration::from_secs(8));
    }
}
