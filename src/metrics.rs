//! Prometheus metrics for listing and download activity
//!
//! Counters are emitted through the `metrics` facade everywhere; they are
//! only exported when [`init_metrics`] installs the Prometheus listener
//! (`--metrics-addr`). Without a recorder every macro is a no-op.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<Arc<RwLock<bool>>> = Lazy::new(|| Arc::new(RwLock::new(false)));

/// Initialize metrics system with Prometheus exporter
///
/// Idempotent: a second call is a no-op.
///
/// # Arguments
/// * `addr` - Socket address to bind Prometheus scrape endpoint (e.g., "0.0.0.0:9090")
pub async fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!(%addr, "Initializing metrics system");

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "listing_requests_total",
        Unit::Count,
        "Directory listing requests by status (ok, not_found, error)"
    );
    describe_counter!(
        "listing_cache_hits_total",
        Unit::Count,
        "Listings served from the cache without a network request"
    );
    describe_counter!(
        "download_attempts_total",
        Unit::Count,
        "File download attempts, including retries"
    );
    describe_counter!(
        "download_retries_total",
        Unit::Count,
        "Retry attempts after a transient failure"
    );
    describe_counter!(
        "downloads_total",
        Unit::Count,
        "Finished download tasks by outcome (success, skipped, failed)"
    );
    describe_counter!(
        "download_bytes_total",
        Unit::Bytes,
        "Bytes written to completed files"
    );
    describe_histogram!(
        "download_duration_seconds",
        Unit::Seconds,
        "Wall time of successful downloads"
    );
    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Duration of retry backoff in seconds"
    );

    *initialized = true;
    info!(%addr, "Metrics system initialized successfully");
    Ok(())
}

/// Record one listing request result (`ok`, `not_found` or `error`)
pub fn record_listing_request(status: &'static str) {
    counter!("listing_requests_total", "status" => status).increment(1);
}

/// Record a listing served from the cache
pub fn record_cache_hit() {
    counter!("listing_cache_hits_total").increment(1);
}

/// Record retry backoff duration
pub fn record_retry_backoff(duration: Duration, attempt: u32) {
    counter!("download_retries_total").increment(1);
    histogram!("retry_backoff_duration_seconds").record(duration.as_secs_f64());

    debug!(
        attempt = attempt,
        backoff_ms = duration.as_millis(),
        "Retry backoff recorded"
    );
}

/// Per-file download timing
pub struct DownloadMetrics {
    start_time: Instant,
}

impl DownloadMetrics {
    /// Start tracking one download attempt
    pub fn start() -> Self {
        counter!("download_attempts_total").increment(1);
        Self {
            start_time: Instant::now(),
        }
    }

    /// Record a completed download
    pub fn record_success(&self, bytes: u64) {
        counter!("downloads_total", "outcome" => "success").increment(1);
        counter!("download_bytes_total").increment(bytes);
        histogram!("download_duration_seconds").record(self.start_time.elapsed().as_secs_f64());
    }
}

/// Record a task that finished without downloading (`skipped` or `failed`)
pub fn record_outcome(outcome: &'static str) {
    counter!("downloads_total", "outcome" => outcome).increment(1);
}
