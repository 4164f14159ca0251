//! Result aggregation
//!
//! Partitions the run's outcomes into (status, format, cache-hit) groups and
//! summarizes each as latency percentiles plus timeout tallies. Only status
//! 200 (success) and status 0 (no response at all) are trend-worthy; other
//! statuses are excluded from the emitted metrics entirely.

use crate::probe::{ProbeFailure, RequestOutcome};
use serde::Serialize;
use std::collections::HashMap;

/// Composite grouping key
///
/// A genuine struct key, so format values can never collide with a
/// delimiter the way a joined string key could.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub status: u16,
    pub format: String,
    pub cache_hit: bool,
}

/// p50/p90/p95/p99 of one latency series
#[derive(Debug, Clone, Serialize)]
pub struct Percentiles {
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Timeout counters per group
///
/// Other failure categories are not tallied separately; they only show up
/// as reduced counts elsewhere.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorTally {
    #[serde(rename = "timeoutAwaitingHeaders")]
    pub timeout_awaiting_headers: u64,
    #[serde(rename = "timeoutReadingBody")]
    pub timeout_reading_body: u64,
}

/// Summary of one outcome group
///
/// Field names mirror the report format of the trace producer.
#[derive(Debug, Clone, Serialize)]
pub struct MetricGroup {
    pub status: u16,
    pub format: String,
    #[serde(rename = "cacheHit")]
    pub cache_hit: bool,
    #[serde(rename = "ttfb_ms")]
    pub ttfb_ms: Percentiles,
    #[serde(rename = "duration_ms")]
    pub duration_ms: Percentiles,
    #[serde(rename = "numLogs")]
    pub count: usize,
    pub errors: ErrorTally,
}

/// Aggregate a full outcome set into ordered metric groups
///
/// Groups are sorted by descending count, tie-broken on the key itself so
/// equal-sized groups always emit in the same order. Input ordering carries
/// no meaning; probes complete in any order.
pub fn compute_metrics(outcomes: &[RequestOutcome]) -> Vec<MetricGroup> {
    let mut groups: HashMap<GroupKey, Vec<&RequestOutcome>> = HashMap::new();

    for outcome in outcomes {
        if outcome.status != 200 && outcome.status != 0 {
            continue;
        }
        let key = GroupKey {
            status: outcome.status,
            format: outcome.format.clone(),
            cache_hit: outcome.cache_hit,
        };
        groups.entry(key).or_default().push(outcome);
    }

    let mut metrics: Vec<MetricGroup> = groups
        .into_iter()
        .map(|(key, members)| summarize_group(key, &members))
        .collect();

    metrics.sort_by(|a, b| {
        b.count.cmp(&a.count).then_with(|| {
            (a.status, a.format.as_str(), a.cache_hit).cmp(&(
                b.status,
                b.format.as_str(),
                b.cache_hit,
            ))
        })
    });

    metrics
}

fn summarize_group(key: GroupKey, members: &[&RequestOutcome]) -> MetricGroup {
    let mut ttfb: Vec<f64> = members.iter().map(|o| o.ttfb_ms as f64).collect();
    ttfb.sort_by(f64::total_cmp);

    let mut duration: Vec<f64> = members.iter().map(|o| o.duration_ms as f64).collect();
    duration.sort_by(f64::total_cmp);

    let mut errors = ErrorTally::default();
    for outcome in members {
        match outcome.failure {
            Some(ProbeFailure::TimeoutAwaitingHeaders) => errors.timeout_awaiting_headers += 1,
            Some(ProbeFailure::TimeoutReadingBody) => errors.timeout_reading_body += 1,
            _ => {}
        }
    }

    MetricGroup {
        status: key.status,
        format: key.format,
        cache_hit: key.cache_hit,
        ttfb_ms: summarize(&ttfb),
        duration_ms: summarize(&duration),
        count: members.len(),
        errors,
    }
}

fn summarize(sorted: &[f64]) -> Percentiles {
    Percentiles {
        p50: percentile(sorted, 50.0),
        p90: percentile(sorted, 90.0),
        p95: percentile(sorted, 95.0),
        p99: percentile(sorted, 99.0),
    }
}

/// Percentile of a sorted series by linear interpolation between ranks
///
/// Callers guarantee a non-empty input; groups are only created when at
/// least one outcome lands in them.
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }

    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;

    if lo == hi {
        sorted[lo]
    } else {
        sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
    }
}
