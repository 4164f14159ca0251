//! Trace file decoding
//!
//! A trace is one JSON object per line, produced by the gateway's request
//! logger. Records are rewritten once at load time: timestamps are shifted
//! forward so the replay starts a few seconds in the future while keeping the
//! original inter-arrival spacing, and the target host can be overridden to
//! point at a test node. Lines that fail to decode, or that carry no content
//! format, are skipped and never count toward the record limit.

use crate::config::ReplayConfig;
use crate::error::{ReplayError, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use tracing::debug;
use url::Url;

/// Delay before the first record becomes due, so pool construction and
/// scheduler startup never eat into the measured window.
const START_BUFFER_MS: i64 = 3000;

/// One replayable request from the trace
#[derive(Debug, Clone)]
pub struct TraceRecord {
    /// Target URL, post host/scheme override
    pub url: Url,
    /// Rescheduled dispatch time (original timestamp plus the run offset)
    pub scheduled_at: DateTime<Utc>,
    /// Content format tag ("car", "raw", ...)
    pub format: String,
    /// Cache-hit flag as recorded at trace time; informational only, never
    /// reconciled with the hit observed at replay time
    pub recorded_cache_hit: bool,
    /// HTTP status as recorded at trace time
    pub recorded_status: u16,
}

/// Wire shape of one trace line
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRecord {
    url: String,
    start_time: DateTime<Utc>,
    #[serde(default)]
    format: Option<String>,
    cache_hit: bool,
    http_status_code: u16,
}

/// Load and rewrite the trace for a run
///
/// Returns records in file order with non-decreasing scheduled times (the
/// trace is assumed chronologically sorted; no re-sort happens here). Only a
/// file open/read failure is an error; bad lines degrade to debug logs.
pub fn load_trace(config: &ReplayConfig) -> Result<Vec<TraceRecord>> {
    let file = File::open(&config.trace_path).map_err(|e| {
        ReplayError::Trace(format!(
            "failed to open trace {:?}: {}",
            config.trace_path, e
        ))
    })?;
    let reader = BufReader::new(file);

    let mut records = Vec::new();
    let mut first_original: Option<DateTime<Utc>> = None;
    let mut offset = ChronoDuration::zero();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;

        let raw: RawRecord = match serde_json::from_str(&line) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(line = line_no + 1, error = %e, "skipping undecodable trace line");
                continue;
            }
        };

        let format = match raw.format {
            Some(f) if !f.is_empty() => f,
            _ => continue,
        };

        let mut url = match Url::parse(&raw.url) {
            Ok(url) => url,
            Err(e) => {
                debug!(line = line_no + 1, error = %e, "skipping trace line with invalid URL");
                continue;
            }
        };

        let original_ts = raw.start_time;
        let first = *first_original.get_or_insert_with(|| {
            offset = Utc::now() - original_ts + ChronoDuration::milliseconds(START_BUFFER_MS);
            original_ts
        });

        if let Some(target) = &config.target {
            override_host(&mut url, target);
        }
        if config.force_tls && url.scheme() == "http" {
            let _ = url.set_scheme("https");
        }

        records.push(TraceRecord {
            url,
            scheduled_at: original_ts + offset,
            format,
            recorded_cache_hit: raw.cache_hit,
            recorded_status: raw.http_status_code,
        });

        if config.duration_minutes != 0 {
            let window = original_ts - first;
            if window.num_milliseconds() as f64 / 60_000.0 > config.duration_minutes as f64 {
                break;
            }
        }

        if config.max_records != 0 && records.len() >= config.max_records {
            break;
        }
    }

    Ok(records)
}

/// Point a record URL at the override target, replacing host and port
///
/// Accepts `host`, `host:port` and bracketed IPv6 (`[::1]`, `[::1]:8080`).
/// A target the URL parser rejects leaves the record URL unchanged.
fn override_host(url: &mut Url, target: &str) {
    let (host, port) = split_target(target);
    if url.set_host(Some(host)).is_ok() {
        let _ = url.set_port(port);
    }
}

fn split_target(target: &str) -> (&str, Option<u16>) {
    if target.starts_with('[') {
        // Bracketed IPv6: only a suffix after the closing bracket is a port.
        match target.split_once(']') {
            Some((head, suffix)) => {
                let host = &target[..head.len() + 1];
                let port = suffix.strip_prefix(':').and_then(|p| p.parse().ok());
                (host, port)
            }
            None => (target, None),
        }
    } else {
        match target.rsplit_once(':') {
            Some((host, p)) if !host.contains(':') => match p.parse::<u16>() {
                Ok(port) => (host, Some(port)),
                Err(_) => (target, None),
            },
            _ => (target, None),
        }
    }
}
