//! Retrace - Gateway Trace Replay
//!
//! Replays captured gateway request traces to measure latency and
//! cache-hit behavior under realistic timing and concurrency.

use clap::{Args, Parser, Subcommand};
use retrace::config::{DEFAULT_REPORT_DIR, DEFAULT_TIMEOUT_SECS, DEFAULT_TRACE_PATH};
use retrace::report::Report;
use retrace::{config, metrics, probe, report, scheduler, trace};
use retrace::{ClientPool, ReplayConfig, NAME, VERSION};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Retrace - Gateway Trace Replay
#[derive(Parser)]
#[command(name = NAME)]
#[command(version = VERSION)]
#[command(about = "Replays captured gateway request traces to measure latency and cache behavior")]
#[command(
    long_about = "Retrace replays a previously captured trace of gateway HTTP \
    requests against a target host, re-creating the original request arrival \
    pattern, and summarizes latency and cache-hit behavior as percentile \
    statistics written to a JSON report."
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log format (pretty, json, compact)
    #[arg(long, default_value = "pretty")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a trace against a target
    Run(RunArgs),

    /// Decode a trace file and print a summary
    Validate {
        /// Path to the NDJSON trace file
        #[arg(short = 'f', long, default_value = DEFAULT_TRACE_PATH)]
        trace: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Path to the NDJSON trace file
    #[arg(short = 'f', long, default_value = DEFAULT_TRACE_PATH)]
    trace: PathBuf,

    /// Trace window in minutes, measured on original timestamps (0 = unlimited)
    #[arg(short, long, default_value_t = 0)]
    duration: u64,

    /// Number of records to replay (0 = unlimited)
    #[arg(short, long, default_value_t = 0)]
    num: usize,

    /// Number of client handles per pool
    #[arg(short, long, default_value_t = 1)]
    clients: usize,

    /// Use a separate client pool for each content format
    #[arg(long)]
    client_per_format: bool,

    /// HTTP version (1 or 2)
    #[arg(long = "http", default_value_t = 1)]
    http_version: u8,

    /// Host (or host:port) override for every record URL
    #[arg(long)]
    target: Option<String>,

    /// Rewrite record URLs to https
    #[arg(long)]
    force_tls: bool,

    /// Verify TLS certificates (off by default; test targets often run self-signed)
    #[arg(long)]
    verify_tls: bool,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout: u64,

    /// Directory the report is written to
    #[arg(long, default_value = DEFAULT_REPORT_DIR)]
    report_dir: PathBuf,
}

impl From<RunArgs> for ReplayConfig {
    fn from(args: RunArgs) -> Self {
        ReplayConfig {
            trace_path: args.trace,
            duration_minutes: args.duration,
            max_records: args.num,
            pool_size: args.clients,
            client_per_format: args.client_per_format,
            http_version: args.http_version,
            target: args.target,
            force_tls: args.force_tls,
            insecure: !args.verify_tls,
            timeout_secs: args.timeout,
            report_dir: args.report_dir,
        }
    }
}

#[tokio::main]
async fn main() -> retrace::Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level, &cli.log_format);

    match cli.command {
        Commands::Run(args) => run_replay(args.into()).await,
        Commands::Validate { trace } => validate_trace(trace),
    }
}

/// Initialize logging based on CLI flags
fn init_logging(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("retrace={}", level)));

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        "compact" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }
}

/// Run a full replay: load, schedule, probe, aggregate, report
async fn run_replay(config: ReplayConfig) -> retrace::Result<()> {
    info!("Starting {} v{}", NAME, VERSION);

    config::validate_config(&config)?;

    let records = trace::load_trace(&config)?;
    info!(
        records = records.len(),
        trace = %config.trace_path.display(),
        "trace loaded"
    );

    let num_logs = records.len();
    let target = report::resolved_target(&config, &records);
    let pool = Arc::new(ClientPool::new(&config)?);
    info!(
        pool_size = pool.size(),
        partitions = pool.partitions(),
        target = %target,
        http_version = config.http_version,
        "replay starting"
    );

    let dispatch_pool = Arc::clone(&pool);
    let outcomes = scheduler::replay_records(records, move |record| {
        let pool = Arc::clone(&dispatch_pool);
        async move {
            let client = pool.checkout(&record.format);
            probe::send_request(&record, &client).await
        }
    })
    .await;

    let groups = metrics::compute_metrics(&outcomes);
    let report_dir = config.report_dir.clone();
    let report = Report::new(config, target, num_logs, groups);
    let path = report::write_report(&report, &report_dir)?;

    info!(
        outcomes = outcomes.len(),
        groups = report.metrics.len(),
        path = %path.display(),
        "replay complete"
    );
    Ok(())
}

/// Decode a trace file and print what a run would replay
fn validate_trace(trace: PathBuf) -> retrace::Result<()> {
    println!("Validating trace: {:?}", trace);

    let config = ReplayConfig {
        trace_path: trace,
        ..Default::default()
    };

    match trace::load_trace(&config) {
        Ok(records) => {
            println!("\n\u{2713} Trace is replayable!");
            println!("\nSummary:");
            println!("  Records: {}", records.len());

            let mut by_format: BTreeMap<&str, usize> = BTreeMap::new();
            let mut recorded_hits = 0;
            for record in &records {
                *by_format.entry(record.format.as_str()).or_default() += 1;
                if record.recorded_cache_hit {
                    recorded_hits += 1;
                }
            }
            for (format, count) in by_format {
                println!("  Format '{}': {}", format, count);
            }
            println!("  Recorded cache hits: {}", recorded_hits);

            if let (Some(first), Some(last)) = (records.first(), records.last()) {
                let window = last.scheduled_at - first.scheduled_at;
                println!("  Window: {:.1}s", window.num_milliseconds() as f64 / 1000.0);
            }

            Ok(())
        }
        Err(e) => {
            println!("\n\u{2717} Trace is not replayable!");
            println!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
