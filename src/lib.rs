//! Retrace - Gateway Trace Replay
//!
//! Replays a captured trace of gateway HTTP requests against a target host,
//! re-creating the original arrival pattern, and summarizes latency and
//! cache-hit behavior as percentile statistics:
//!
//! - **Time-accurate scheduling**: records are released on the trace's own
//!   timeline, not at a fixed request rate
//! - **Bounded connection reuse**: a fixed pool of long-lived clients,
//!   optionally partitioned by content format
//! - **Fine-grained timing**: time-to-first-byte from the streaming body,
//!   total duration on success and failure alike
//! - **Graceful degradation**: transport failures become metrics, never
//!   crashes
//!
//! # Quick Start
//!
//! ```no_run
//! use retrace::{ClientPool, ReplayConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> retrace::Result<()> {
//!     let config = ReplayConfig::default();
//!     retrace::config::validate_config(&config)?;
//!
//!     let records = retrace::trace::load_trace(&config)?;
//!     let pool = Arc::new(ClientPool::new(&config)?);
//!
//!     let outcomes = retrace::scheduler::replay_records(records, move |record| {
//!         let pool = Arc::clone(&pool);
//!         async move {
//!             let client = pool.checkout(&record.format);
//!             retrace::probe::send_request(&record, &client).await
//!         }
//!     })
//!     .await;
//!
//!     let metrics = retrace::metrics::compute_metrics(&outcomes);
//!     println!("{} metric groups", metrics.len());
//!     Ok(())
//! }
//! ```

/// Run configuration and validation
pub mod config;

/// Error types
pub mod error;

/// Result aggregation into percentile groups
pub mod metrics;

/// Connection pool of reusable HTTP clients
pub mod pool;

/// Single-request prober with streaming-body measurement
pub mod probe;

/// Run report document and writer
pub mod report;

/// Time-accurate record release and probe fan-out
pub mod scheduler;

/// Trace file decoding and load-time rewrites
pub mod trace;

pub use config::ReplayConfig;
pub use error::{ReplayError, Result};
pub use metrics::MetricGroup;
pub use pool::ClientPool;
pub use probe::{ProbeFailure, RequestOutcome};
pub use trace::TraceRecord;

/// Retrace version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Retrace name
pub const NAME: &str = env!("CARGO_PKG_NAME");
