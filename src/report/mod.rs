//! Run report writing
//!
//! One JSON document per run: the options that produced it, the resolved
//! target, run metadata and the ordered metric groups. The file name is
//! derived from the run's completion timestamp.

use crate::config::ReplayConfig;
use crate::error::{ReplayError, Result};
use crate::metrics::MetricGroup;
use crate::trace::TraceRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Complete report document for one run
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub options: ReplayConfig,
    pub target: String,
    pub http_version: u8,
    pub date: DateTime<Utc>,
    pub num_logs: usize,
    pub metrics: Vec<MetricGroup>,
}

impl Report {
    /// Assemble a report dated now
    pub fn new(
        config: ReplayConfig,
        target: String,
        num_logs: usize,
        metrics: Vec<MetricGroup>,
    ) -> Self {
        let http_version = config.http_version;
        Self {
            options: config,
            target,
            http_version,
            date: Utc::now(),
            num_logs,
            metrics,
        }
    }
}

/// The address a run actually drove requests at: the configured override,
/// or the first record's host when none was given
pub fn resolved_target(config: &ReplayConfig, records: &[TraceRecord]) -> String {
    if let Some(target) = &config.target {
        return target.clone();
    }
    records
        .first()
        .and_then(|r| r.url.host_str())
        .unwrap_or_default()
        .to_string()
}

/// Write the report under `dir` as `results_<unix_ts>.json`
pub fn write_report(report: &Report, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .map_err(|e| ReplayError::Report(format!("failed to create {:?}: {}", dir, e)))?;

    let path = dir.join(format!("results_{}.json", report.date.timestamp()));
    let json = serde_json::to_string_pretty(report)?;
    fs::write(&path, json)
        .map_err(|e| ReplayError::Report(format!("failed to write {:?}: {}", path, e)))?;

    info!(path = %path.display(), groups = report.metrics.len(), "report written");
    Ok(path)
}
