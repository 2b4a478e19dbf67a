//! File-security validation for uploads.
//!
//! Checks run in increasing cost order: size bounds, extension,
//! magic-byte agreement with the claimed type, then a scan for byte
//! patterns that indicate active content. Rejected uploads either
//! bounce with `InvalidInput` or land in the quarantine directory.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ProcessingError, Result};

/// Byte patterns that flag a PDF as carrying active content. Matching
/// any of these rejects the upload.
const SUSPICIOUS_PATTERNS: [&[u8]; 6] = [
    b"/JavaScript",
    b"/JS (",
    b"/Launch",
    b"/OpenAction",
    b"/EmbeddedFile",
    b"/AA <<",
];

/// Allowed upload extensions.
const ALLOWED_EXTENSIONS: [&str; 1] = ["pdf"];

/// Upload validation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Smallest acceptable upload in bytes.
    #[serde(default = "default_min_bytes")]
    pub min_bytes: u64,
    /// Largest acceptable upload in megabytes.
    #[serde(default = "default_max_mb")]
    pub max_mb: u64,
    /// Keep rejected files for inspection instead of dropping them.
    #[serde(default)]
    pub quarantine_enabled: bool,
}

fn default_min_bytes() -> u64 {
    1024
}
fn default_max_mb() -> u64 {
    100
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            min_bytes: default_min_bytes(),
            max_mb: default_max_mb(),
            quarantine_enabled: false,
        }
    }
}

/// Validates upload bytes before a job is created.
pub struct FileValidator {
    config: SecurityConfig,
    quarantine_dir: PathBuf,
}

impl FileValidator {
    pub fn new(config: SecurityConfig, quarantine_dir: PathBuf) -> Self {
        Self {
            config,
            quarantine_dir,
        }
    }

    /// Validate an upload. On rejection with quarantine enabled, the
    /// bytes are preserved under the quarantine directory before the
    /// error is returned.
    pub fn validate(&self, filename: &str, bytes: &[u8]) -> Result<()> {
        match self.check(filename, bytes) {
            Ok(()) => Ok(()),
            Err(e) => {
                if self.config.quarantine_enabled {
                    if let Err(io_err) = self.quarantine(filename, bytes) {
                        tracing::warn!("Failed to quarantine {}: {}", filename, io_err);
                    }
                }
                Err(e)
            }
        }
    }

    fn check(&self, filename: &str, bytes: &[u8]) -> Result<()> {
        let size = bytes.len() as u64;
        if size < self.config.min_bytes {
            return Err(ProcessingError::InvalidInput(format!(
                "file too small ({} bytes, minimum {})",
                size, self.config.min_bytes
            )));
        }
        let max_bytes = self.config.max_mb * 1024 * 1024;
        if size > max_bytes {
            return Err(ProcessingError::InvalidInput(format!(
                "file too large ({} bytes, maximum {})",
                size, max_bytes
            )));
        }

        let extension = std::path::Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(ProcessingError::InvalidInput(format!(
                "extension '{}' not allowed",
                extension
            )));
        }

        if !bytes.starts_with(b"%PDF-") {
            return Err(ProcessingError::InvalidInput(
                "content is not a PDF (bad magic bytes)".into(),
            ));
        }

        // The infer sniffer cross-checks the magic against the full
        // signature table, catching polyglot headers.
        if let Some(kind) = infer::get(bytes) {
            if kind.mime_type() != "application/pdf" {
                return Err(ProcessingError::InvalidInput(format!(
                    "content sniffed as {} rather than application/pdf",
                    kind.mime_type()
                )));
            }
        }

        for pattern in SUSPICIOUS_PATTERNS {
            if contains(bytes, pattern) {
                return Err(ProcessingError::InvalidInput(format!(
                    "suspicious content: {}",
                    String::from_utf8_lossy(pattern).trim()
                )));
            }
        }

        Ok(())
    }

    fn quarantine(&self, filename: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.quarantine_dir)?;
        let safe_name: String = filename
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        let path = self
            .quarantine_dir
            .join(format!("{}-{}", uuid::Uuid::new_v4(), safe_name));
        std::fs::write(&path, bytes)?;
        tracing::warn!("Quarantined rejected upload at {:?}", path);
        Ok(path)
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
