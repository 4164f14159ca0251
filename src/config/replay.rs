//! Replay run configuration
//!
//! The options struct is serialized verbatim into the run report so a result
//! file always records how it was produced.

use crate::error::{ReplayError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default trace file location
pub const DEFAULT_TRACE_PATH: &str = "logs/logs.ndjson";

/// Default directory for result documents
pub const DEFAULT_REPORT_DIR: &str = "results";

/// Fixed per-request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Configuration for a replay run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayConfig {
    /// Path to the NDJSON trace file
    pub trace_path: PathBuf,
    /// Maximum trace window in minutes, measured on original timestamps (0 = unlimited)
    pub duration_minutes: u64,
    /// Maximum number of records to replay (0 = unlimited)
    pub max_records: usize,
    /// Number of independent client handles per pool
    pub pool_size: usize,
    /// Partition client pools by content format
    pub client_per_format: bool,
    /// HTTP protocol version (1 or 2)
    pub http_version: u8,
    /// Host (or host:port) override for every record URL
    pub target: Option<String>,
    /// Rewrite record URLs to https
    pub force_tls: bool,
    /// Skip TLS certificate verification
    pub insecure: bool,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Directory the report is written to
    pub report_dir: PathBuf,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            trace_path: PathBuf::from(DEFAULT_TRACE_PATH),
            duration_minutes: 0,
            max_records: 0,
            pool_size: 1,
            client_per_format: false,
            http_version: 1,
            target: None,
            force_tls: false,
            insecure: true,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            report_dir: PathBuf::from(DEFAULT_REPORT_DIR),
        }
    }
}

impl ReplayConfig {
    /// Per-request timeout as a [`Duration`]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Validate a replay configuration
pub fn validate_config(config: &ReplayConfig) -> Result<()> {
    if config.pool_size == 0 {
        return Err(ReplayError::ConfigValidation(
            "pool size must be at least 1".to_string(),
        ));
    }

    if config.http_version != 1 && config.http_version != 2 {
        return Err(ReplayError::ConfigValidation(format!(
            "unsupported HTTP version: {} (expected 1 or 2)",
            config.http_version
        )));
    }

    if config.timeout_secs == 0 {
        return Err(ReplayError::ConfigValidation(
            "request timeout must be greater than zero".to_string(),
        ));
    }

    Ok(())
}
