//! Error types for retrace

use std::io;
use thiserror::Error;

/// Result type alias for retrace operations
pub type Result<T> = std::result::Result<T, ReplayError>;

/// Main error type for retrace
///
/// Only trace loading and report writing are fatal; per-record decode
/// failures and per-request transport failures degrade into the metrics
/// instead of surfacing here.
#[derive(Error, Debug)]
pub enum ReplayError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    /// Trace file loading errors
    #[error("Trace error: {0}")]
    Trace(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Report serialization or write errors
    #[error("Report error: {0}")]
    Report(String),
}

impl From<serde_json::Error> for ReplayError {
    fn from(err: serde_json::Error) -> Self {
        ReplayError::Report(err.to_string())
    }
}
