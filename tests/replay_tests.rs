//! End-to-end tests for the replay engine
//!
//! These tests spin up actual HTTP backends and drive the full pipeline:
//! trace decode, scheduling, probing over the client pool, aggregation and
//! report writing.

use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use retrace::report::{resolved_target, write_report, Report};
use retrace::{metrics, probe, scheduler, trace};
use retrace::{ClientPool, ProbeFailure, ReplayConfig, RequestOutcome, TraceRecord};
use std::io::Write;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Test backend that serves gateway-shaped responses and counts requests
struct TestBackend {
    addr: SocketAddr,
    request_count: Arc<AtomicU32>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl TestBackend {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let request_count = Arc::new(AtomicU32::new(0));
        let count = request_count.clone();

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        if let Ok((stream, _)) = result {
                            let count = count.clone();
                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                let service = service_fn(move |req| {
                                    count.fetch_add(1, Ordering::SeqCst);
                                    handle(req)
                                });
                                let _ = http1::Builder::new()
                                    .serve_connection(io, service)
                                    .await;
                            });
                        }
                    }
                    _ = &mut shutdown_rx => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            request_count,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    fn request_count(&self) -> u32 {
        self.request_count.load(Ordering::SeqCst)
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestBackend {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn handle(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let path = req.uri().path().to_string();
    let response = match path.as_str() {
        "/hit" => Response::builder()
            .status(200)
            .header("saturn-cache-status", "HIT")
            .body(Full::new(Bytes::from_static(b"cached block data")))
            .unwrap(),
        "/miss" => Response::builder()
            .status(200)
            .header("saturn-cache-status", "MISS")
            .body(Full::new(Bytes::from_static(b"origin block data")))
            .unwrap(),
        "/slow" => {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Response::new(Full::new(Bytes::from_static(b"late")))
        }
        "/big" => Response::new(Full::new(Bytes::from(vec![0u8; 8192]))),
        "/notfound" => Response::builder()
            .status(404)
            .body(Full::new(Bytes::from_static(b"no such block")))
            .unwrap(),
        _ => Response::new(Full::new(Bytes::from_static(b"ok"))),
    };
    Ok(response)
}

/// Dispatch stub for runs that must never release a record
async fn no_dispatch(record: TraceRecord) -> RequestOutcome {
    panic!("nothing should be dispatched for {}", record.url)
}

fn due_record(url: &str, format: &str) -> TraceRecord {
    TraceRecord {
        url: url::Url::parse(url).unwrap(),
        scheduled_at: chrono::Utc::now() - chrono::Duration::seconds(5),
        format: format.to_string(),
        recorded_cache_hit: false,
        recorded_status: 200,
    }
}

// ============================================================================
// Prober
// ============================================================================

#[tokio::test]
async fn test_probe_success_with_cache_hit() {
    let backend = TestBackend::start().await;
    let pool = ClientPool::new(&ReplayConfig::default()).unwrap();
    let client = pool.checkout("raw");

    let record = due_record(&backend.url("/hit"), "raw");
    let outcome = probe::send_request(&record, &client).await;

    assert_eq!(outcome.status, 200);
    assert!(outcome.cache_hit);
    assert_eq!(outcome.bytes_received, 17);
    assert!(outcome.failure.is_none());
    assert!(outcome.duration_ms >= outcome.ttfb_ms);
    assert_eq!(backend.request_count(), 1);
}

#[tokio::test]
async fn test_probe_miss_classification() {
    let backend = TestBackend::start().await;
    let pool = ClientPool::new(&ReplayConfig::default()).unwrap();
    let client = pool.checkout("car");

    let record = due_record(&backend.url("/miss"), "car");
    let outcome = probe::send_request(&record, &client).await;

    assert_eq!(outcome.status, 200);
    assert!(!outcome.cache_hit);
    assert_eq!(outcome.format, "car");
}

#[tokio::test]
async fn test_probe_connection_refused() {
    // Bind and immediately drop a listener so the port is free but closed.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let pool = ClientPool::new(&ReplayConfig::default()).unwrap();
    let client = pool.checkout("raw");

    let record = due_record(&format!("http://{}/x", addr), "raw");
    let outcome = probe::send_request(&record, &client).await;

    assert_eq!(outcome.status, 0);
    assert_eq!(outcome.ttfb_ms, 0);
    assert_eq!(outcome.bytes_received, 0);
    assert!(matches!(outcome.failure, Some(ProbeFailure::Transport(_))));
}

#[tokio::test]
async fn test_probe_timeout_awaiting_headers() {
    let backend = TestBackend::start().await;
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(200))
        .build()
        .unwrap();

    let record = due_record(&backend.url("/slow"), "raw");
    let outcome = probe::send_request(&record, &client).await;

    assert_eq!(outcome.status, 0);
    assert_eq!(outcome.ttfb_ms, 0);
    assert_eq!(outcome.failure, Some(ProbeFailure::TimeoutAwaitingHeaders));
    assert!(outcome.duration_ms >= 150);
}

/// Backend that declares a 1000-byte body, streams a 16-byte prefix after a
/// short delay, then stalls with the connection open for `stall` before
/// closing it with the body incomplete.
async fn start_stalling_backend(stall: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        if let Ok((mut stream, _)) = listener.accept().await {
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;

            let head =
                b"HTTP/1.1 200 OK\r\ncontent-length: 1000\r\nsaturn-cache-status: MISS\r\n\r\n";
            let _ = stream.write_all(head).await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = stream.write_all(&[0x42; 16]).await;
            tokio::time::sleep(stall).await;
        }
    });

    addr
}

#[tokio::test]
async fn test_probe_body_read_timeout_keeps_partial_progress() {
    let addr = start_stalling_backend(Duration::from_secs(5)).await;
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(400))
        .build()
        .unwrap();

    let record = due_record(&format!("http://{}/partial", addr), "raw");
    let outcome = probe::send_request(&record, &client).await;

    // Headers arrived, part of the body arrived, then the read timed out;
    // partial byte count and observed TTFB survive the failure.
    assert_eq!(outcome.status, 200);
    assert_eq!(outcome.bytes_received, 16);
    assert!(outcome.ttfb_ms > 0);
    assert_eq!(outcome.failure, Some(ProbeFailure::TimeoutReadingBody));
}

#[tokio::test]
async fn test_probe_connection_dropped_mid_body() {
    let addr = start_stalling_backend(Duration::from_millis(100)).await;
    let pool = ClientPool::new(&ReplayConfig::default()).unwrap();
    let client = pool.checkout("raw");

    let record = due_record(&format!("http://{}/partial", addr), "raw");
    let outcome = probe::send_request(&record, &client).await;

    assert_eq!(outcome.status, 200);
    assert_eq!(outcome.bytes_received, 16);
    assert!(outcome.ttfb_ms > 0);
    assert!(matches!(outcome.failure, Some(ProbeFailure::Transport(_))));
}

#[tokio::test]
async fn test_probe_download_cap() {
    let backend = TestBackend::start().await;
    let pool = ClientPool::new(&ReplayConfig::default()).unwrap();
    let client = pool.checkout("raw");

    let record = due_record(&backend.url("/big"), "raw");
    let outcome = probe::send_request_with_cap(&record, &client, 1024).await;

    assert_eq!(outcome.status, 200);
    assert_eq!(outcome.bytes_received, 1024);
    assert!(outcome.failure.is_none());
}

// ============================================================================
// Replay pipeline
// ============================================================================

#[tokio::test]
async fn test_replay_pipeline_grouping_scenario() {
    let backend = TestBackend::start().await;

    // raw/hit, car/miss, raw/miss, all 200.
    let records = vec![
        due_record(&backend.url("/hit"), "raw"),
        due_record(&backend.url("/miss"), "car"),
        due_record(&backend.url("/miss"), "raw"),
    ];

    let pool = Arc::new(ClientPool::new(&ReplayConfig::default()).unwrap());
    let outcomes = scheduler::replay_records(records, move |record| {
        let pool = Arc::clone(&pool);
        async move {
            let client = pool.checkout(&record.format);
            probe::send_request(&record, &client).await
        }
    })
    .await;

    assert_eq!(outcomes.len(), 3);
    assert_eq!(backend.request_count(), 3);

    let groups = metrics::compute_metrics(&outcomes);
    assert_eq!(groups.len(), 3);
    for group in &groups {
        assert_eq!(group.status, 200);
        assert_eq!(group.count, 1);
        // Single-sample group: every percentile equals the one sample.
        assert_eq!(group.ttfb_ms.p50, group.ttfb_ms.p99);
        assert_eq!(group.duration_ms.p50, group.duration_ms.p99);
    }

    assert!(groups.iter().any(|g| g.format == "raw" && g.cache_hit));
    assert!(groups.iter().any(|g| g.format == "raw" && !g.cache_hit));
    assert!(groups.iter().any(|g| g.format == "car" && !g.cache_hit));
}

#[tokio::test]
async fn test_non_success_statuses_probed_but_not_emitted() {
    let backend = TestBackend::start().await;

    let records = vec![
        due_record(&backend.url("/hit"), "raw"),
        due_record(&backend.url("/notfound"), "raw"),
    ];

    let pool = Arc::new(ClientPool::new(&ReplayConfig::default()).unwrap());
    let outcomes = scheduler::replay_records(records, move |record| {
        let pool = Arc::clone(&pool);
        async move {
            let client = pool.checkout(&record.format);
            probe::send_request(&record, &client).await
        }
    })
    .await;

    // Both were probed, only the 200 is trend-worthy.
    assert_eq!(outcomes.len(), 2);
    let groups = metrics::compute_metrics(&outcomes);
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].status, 200);
}

// ============================================================================
// Trace file to report
// ============================================================================

#[tokio::test]
async fn test_trace_file_to_report_end_to_end() {
    let backend = TestBackend::start().await;

    let mut trace_file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        trace_file,
        r#"{{"url":"{}","startTime":"2023-05-01T10:00:00.000Z","format":"raw","cacheHit":true,"httpStatusCode":200}}"#,
        backend.url("/hit")
    )
    .unwrap();
    writeln!(
        trace_file,
        r#"{{"url":"{}","startTime":"2023-05-01T10:00:00.100Z","format":"car","cacheHit":false,"httpStatusCode":200}}"#,
        backend.url("/miss")
    )
    .unwrap();
    writeln!(trace_file, "not json at all").unwrap();

    let report_dir = tempfile::tempdir().unwrap();
    let config = ReplayConfig {
        trace_path: trace_file.path().to_path_buf(),
        report_dir: report_dir.path().to_path_buf(),
        ..Default::default()
    };

    let records = trace::load_trace(&config).unwrap();
    assert_eq!(records.len(), 2);

    let num_logs = records.len();
    let target = resolved_target(&config, &records);
    assert_eq!(target, "127.0.0.1");

    let pool = Arc::new(ClientPool::new(&config).unwrap());
    let outcomes = scheduler::replay_records(records, move |record| {
        let pool = Arc::clone(&pool);
        async move {
            let client = pool.checkout(&record.format);
            probe::send_request(&record, &client).await
        }
    })
    .await;

    assert_eq!(outcomes.len(), 2);

    let groups = metrics::compute_metrics(&outcomes);
    let report = Report::new(config.clone(), target, num_logs, groups);
    let path = write_report(&report, &config.report_dir).unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["numLogs"], 2);
    assert_eq!(json["metrics"].as_array().unwrap().len(), 2);
    assert_eq!(json["options"]["httpVersion"], 1);
}

#[tokio::test]
async fn test_empty_trace_produces_empty_report() {
    let trace_file = tempfile::NamedTempFile::new().unwrap();
    let report_dir = tempfile::tempdir().unwrap();
    let config = ReplayConfig {
        trace_path: trace_file.path().to_path_buf(),
        report_dir: report_dir.path().to_path_buf(),
        ..Default::default()
    };

    let records = trace::load_trace(&config).unwrap();
    assert!(records.is_empty());

    let outcomes = scheduler::replay_records(records, no_dispatch).await;
    assert!(outcomes.is_empty());

    let groups = metrics::compute_metrics(&outcomes);
    let report = Report::new(config.clone(), String::new(), 0, groups);
    let path = write_report(&report, &config.report_dir).unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["numLogs"], 0);
    assert!(json["metrics"].as_array().unwrap().is_empty());
}
