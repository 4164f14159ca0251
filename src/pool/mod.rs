//! Connection pool manager
//!
//! A [`ClientPool`] owns a fixed set of long-lived `reqwest` clients, built
//! once at startup and shared read-only for the run. Each client carries its
//! own underlying connection pool, so N handles bound the run to N
//! independent connection pools. Checkout picks uniformly at random among
//! the handles, spreading load so one slow connection cannot pin a whole
//! partition of the trace behind it.

use crate::config::ReplayConfig;
use crate::error::{ReplayError, Result};
use rand::Rng;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Formats that get their own partition when `client_per_format` is set
const PARTITION_FORMATS: &[&str] = &["car", "raw"];

/// Partition key for records whose format has no dedicated pool
const DEFAULT_PARTITION: &str = "";

/// How long idle connections are kept for reuse
const IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Fixed-size set of reusable HTTP client handles
pub struct ClientPool {
    partitions: HashMap<String, Vec<Client>>,
    size: usize,
}

impl ClientPool {
    /// Build the pool from the run configuration
    pub fn new(config: &ReplayConfig) -> Result<Self> {
        if config.pool_size == 0 {
            return Err(ReplayError::ConfigValidation(
                "pool size must be at least 1".to_string(),
            ));
        }

        let mut partitions = HashMap::new();
        partitions.insert(DEFAULT_PARTITION.to_string(), build_clients(config)?);

        if config.client_per_format {
            for format in PARTITION_FORMATS {
                partitions.insert(format.to_string(), build_clients(config)?);
            }
        }

        debug!(
            size = config.pool_size,
            partitions = partitions.len(),
            http_version = config.http_version,
            "client pool initialized"
        );

        Ok(Self {
            partitions,
            size: config.pool_size,
        })
    }

    /// Hand out a client for one request
    ///
    /// Formats without a dedicated partition use the default one. The
    /// returned handle is a cheap clone sharing the underlying connection
    /// pool; nothing is checked out exclusively.
    pub fn checkout(&self, format: &str) -> Client {
        let clients = self
            .partitions
            .get(format)
            .unwrap_or_else(|| &self.partitions[DEFAULT_PARTITION]);

        let index = if clients.len() == 1 {
            0
        } else {
            rand::thread_rng().gen_range(0..clients.len())
        };
        clients[index].clone()
    }

    /// Handles per partition
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of partitions (1 unless pools are split by format)
    pub fn partitions(&self) -> usize {
        self.partitions.len()
    }
}

fn build_clients(config: &ReplayConfig) -> Result<Vec<Client>> {
    (0..config.pool_size).map(|_| build_client(config)).collect()
}

fn build_client(config: &ReplayConfig) -> Result<Client> {
    let mut builder = Client::builder()
        .timeout(config.timeout())
        .pool_idle_timeout(IDLE_TIMEOUT)
        .danger_accept_invalid_certs(config.insecure);

    builder = match config.http_version {
        2 => builder.http2_prior_knowledge(),
        _ => builder.http1_only(),
    };

    builder
        .build()
        .map_err(|e| ReplayError::Config(format!("failed to build HTTP client: {}", e)))
}
