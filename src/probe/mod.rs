//! Request prober
//!
//! Issues a single GET for one trace record and measures it: time to first
//! body byte, total duration, bytes received under a hard download cap, the
//! cache-hit header and the status code. The prober never fails outright;
//! every transport problem is folded into the returned [`RequestOutcome`] so
//! a bad target shows up as a timeout spike in the metrics instead of a
//! crashed run.

use crate::trace::TraceRecord;
use reqwest::header::{HeaderMap, ACCEPT, USER_AGENT};
use reqwest::Client;
use std::fmt;
use tokio::time::Instant;
use tracing::trace;

/// Hard cap on bytes read from any single response body
pub const MAX_DOWNLOAD_BYTES: u64 = 50 * 1024 * 1024;

/// Header the gateway uses to advertise cache state
const CACHE_STATUS_HEADER: &str = "saturn-cache-status";

/// Sentinel value marking a cache hit
const CACHE_HIT_VALUE: &str = "HIT";

/// Identifying user agent sent with every probe
const PROBE_USER_AGENT: &str = concat!("retrace/", env!("CARGO_PKG_VERSION"));

/// Result of probing one trace record
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    /// Milliseconds to the first response body byte; 0 if none ever arrived
    pub ttfb_ms: u64,
    /// Cache hit as observed at replay time
    pub cache_hit: bool,
    /// Response status, or 0 if no response was received
    pub status: u16,
    /// Content format tag, copied from the record
    pub format: String,
    /// Milliseconds from request start to completion or failure
    pub duration_ms: u64,
    /// Bytes received, capped at [`MAX_DOWNLOAD_BYTES`]
    pub bytes_received: u64,
    /// What went wrong, if anything
    pub failure: Option<ProbeFailure>,
}

/// Failure classification for a probe
///
/// Derived from the transport's own error category rather than re-invented:
/// a timeout is attributed to the phase the error surfaced in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    /// The request timed out before any response headers arrived
    TimeoutAwaitingHeaders,
    /// Headers arrived but the body read timed out
    TimeoutReadingBody,
    /// Any other transport error, carrying the underlying error text
    Transport(String),
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeFailure::TimeoutAwaitingHeaders => write!(f, "timeout awaiting headers"),
            ProbeFailure::TimeoutReadingBody => write!(f, "timeout reading body"),
            ProbeFailure::Transport(msg) => write!(f, "transport error: {}", msg),
        }
    }
}

/// Map a content format to its Accept media type
fn accept_header(format: &str) -> Option<&'static str> {
    match format {
        "car" => Some("application/vnd.ipld.car"),
        "raw" => Some("application/vnd.ipld.raw"),
        _ => None,
    }
}

/// Whether the response headers mark a cache hit
pub fn is_cache_hit(headers: &HeaderMap) -> bool {
    headers
        .get(CACHE_STATUS_HEADER)
        .and_then(|v| v.to_str().ok())
        == Some(CACHE_HIT_VALUE)
}

fn classify_send_error(err: &reqwest::Error) -> ProbeFailure {
    if err.is_timeout() {
        ProbeFailure::TimeoutAwaitingHeaders
    } else {
        ProbeFailure::Transport(err.to_string())
    }
}

fn classify_read_error(err: &reqwest::Error) -> ProbeFailure {
    if err.is_timeout() {
        ProbeFailure::TimeoutReadingBody
    } else {
        ProbeFailure::Transport(err.to_string())
    }
}

/// Probe one record with the default download cap
pub async fn send_request(record: &TraceRecord, client: &Client) -> RequestOutcome {
    send_request_with_cap(record, client, MAX_DOWNLOAD_BYTES).await
}

/// Probe one record, reading at most `max_bytes` of body
pub async fn send_request_with_cap(
    record: &TraceRecord,
    client: &Client,
    max_bytes: u64,
) -> RequestOutcome {
    let start = Instant::now();

    let mut request = client
        .get(record.url.as_str())
        .header(USER_AGENT, PROBE_USER_AGENT);
    if let Some(accept) = accept_header(&record.format) {
        request = request.header(ACCEPT, accept);
    }

    let mut outcome = RequestOutcome {
        ttfb_ms: 0,
        cache_hit: false,
        status: 0,
        format: record.format.clone(),
        duration_ms: 0,
        bytes_received: 0,
        failure: None,
    };

    match request.send().await {
        Ok(mut response) => {
            outcome.status = response.status().as_u16();
            outcome.cache_hit = is_cache_hit(response.headers());

            let mut first_byte: Option<u64> = None;
            let mut received: u64 = 0;

            loop {
                match response.chunk().await {
                    Ok(Some(chunk)) => {
                        if first_byte.is_none() && !chunk.is_empty() {
                            first_byte = Some(start.elapsed().as_millis() as u64);
                        }
                        received += chunk.len() as u64;
                        if received >= max_bytes {
                            received = max_bytes;
                            if let Err(e) = drain_body(&mut response).await {
                                outcome.failure = Some(classify_read_error(&e));
                            }
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        // Keep the partial byte count and observed TTFB.
                        outcome.failure = Some(classify_read_error(&e));
                        break;
                    }
                }
            }

            outcome.ttfb_ms = first_byte.unwrap_or(0);
            outcome.bytes_received = received;
        }
        Err(e) => {
            outcome.failure = Some(classify_send_error(&e));
        }
    }

    outcome.duration_ms = start.elapsed().as_millis() as u64;
    trace!(
        url = %record.url,
        status = outcome.status,
        ttfb_ms = outcome.ttfb_ms,
        duration_ms = outcome.duration_ms,
        "probe finished"
    );
    outcome
}

/// Consume the remainder of a capped body so the connection can be reused
async fn drain_body(response: &mut reqwest::Response) -> reqwest::Result<()> {
    while response.chunk().await?.is_some() {}
    Ok(())
}
