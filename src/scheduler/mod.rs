//! Replay scheduler
//!
//! Walks the ordered record sequence with a cursor and releases each record
//! as soon as the wall clock reaches its rescheduled timestamp, without ever
//! waiting for earlier probes to finish. Probes run as independent spawned
//! tasks; the scheduler's readiness poll is the only sleep on the
//! coordinating path. The run drains to completion: every dispatched probe
//! is joined before the outcome set is returned.

use crate::probe::RequestOutcome;
use crate::trace::TraceRecord;
use chrono::Utc;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// Readiness re-check interval; the trace's own timestamp resolution bounds
/// the precision this needs.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Running counters reported once per completed probe
struct ReplayProgress {
    total: usize,
    completed: AtomicU64,
    bytes: AtomicU64,
    started: Instant,
}

impl ReplayProgress {
    fn new(total: usize) -> Self {
        Self {
            total,
            completed: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    fn observe(&self, outcome: &RequestOutcome) {
        let completed = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        let bytes =
            self.bytes.fetch_add(outcome.bytes_received, Ordering::Relaxed) + outcome.bytes_received;

        let elapsed = self.started.elapsed().as_secs_f64();
        let (rps, mbps) = if elapsed > 0.0 {
            (
                completed as f64 / elapsed,
                bytes as f64 / (1024.0 * 1024.0) / elapsed,
            )
        } else {
            (0.0, 0.0)
        };

        info!(
            completed,
            total = self.total,
            percent = completed as f64 / self.total as f64 * 100.0,
            rps,
            mbps,
            status = outcome.status,
            ttfb_ms = outcome.ttfb_ms,
            duration_ms = outcome.duration_ms,
            "request completed"
        );
    }
}

/// Replay records on their rescheduled timeline
///
/// `dispatch` turns one record into a probe future; each future is spawned
/// the moment its record is due, so a slow probe never delays the release of
/// later records. Completion order is unconstrained — outcomes land in the
/// shared collection as probes finish.
pub async fn replay_records<F, Fut>(records: Vec<TraceRecord>, dispatch: F) -> Vec<RequestOutcome>
where
    F: Fn(TraceRecord) -> Fut,
    Fut: Future<Output = RequestOutcome> + Send + 'static,
{
    let total = records.len();
    let outcomes = Arc::new(Mutex::new(Vec::with_capacity(total)));
    let progress = Arc::new(ReplayProgress::new(total));
    let mut handles = Vec::with_capacity(total);

    let mut cursor = 0;
    while cursor < records.len() {
        if records[cursor].scheduled_at <= Utc::now() {
            let record = records[cursor].clone();
            cursor += 1;

            let fut = dispatch(record);
            let outcomes = Arc::clone(&outcomes);
            let progress = Arc::clone(&progress);
            handles.push(tokio::spawn(async move {
                let outcome = fut.await;
                progress.observe(&outcome);
                outcomes.lock().push(outcome);
            }));
        } else {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    let _ = futures::future::join_all(handles).await;

    match Arc::try_unwrap(outcomes) {
        Ok(mutex) => mutex.into_inner(),
        Err(arc) => arc.lock().clone(),
    }
}
