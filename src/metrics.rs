//! Harvest metrics
//!
//! Counters and histograms are recorded through the `metrics` facade and are
//! free when no recorder is installed. [`init_metrics`] installs a Prometheus
//! exporter with a scrape endpoint.
//!
//! ## Recorded series
//!
//! - `harvest_http_requests_total{status}` / `harvest_http_request_duration_seconds`
//! - `harvest_fetch_retries_total{target}`
//! - `harvest_governor_wait_seconds`
//! - `harvest_rate_limit_remaining`
//! - `harvest_pages_fetched_total` / `harvest_records_total`
//! - `harvest_blocks_written_total` / `harvest_block_write_seconds`
//! - `harvest_windows_completed_total`
//! - `harvest_runs_total{status}`

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info};

use crate::fetcher::FetchTarget;

static METRICS_INITIALIZED: OnceCell<SocketAddr> = OnceCell::new();

/// Install the Prometheus exporter listening on `addr`.
///
/// Idempotent: later calls are ignored once an exporter is installed.
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if let Some(existing) = METRICS_INITIALIZED.get() {
        debug!(addr = %existing, "Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "harvest_http_requests_total",
        Unit::Count,
        "Search requests sent, labelled by response status"
    );
    describe_histogram!(
        "harvest_http_request_duration_seconds",
        Unit::Seconds,
        "Search request latency"
    );
    describe_counter!(
        "harvest_fetch_retries_total",
        Unit::Count,
        "Failed fetch attempts that were retried"
    );
    describe_histogram!(
        "harvest_governor_wait_seconds",
        Unit::Seconds,
        "Time spent in rate governor sleeps"
    );
    describe_gauge!(
        "harvest_rate_limit_remaining",
        Unit::Count,
        "Remaining search quota reported by the API"
    );
    describe_counter!(
        "harvest_pages_fetched_total",
        Unit::Count,
        "Search pages fetched successfully"
    );
    describe_counter!(
        "harvest_records_total",
        Unit::Count,
        "Records harvested"
    );
    describe_counter!(
        "harvest_blocks_written_total",
        Unit::Count,
        "Blocks persisted"
    );
    describe_histogram!(
        "harvest_block_write_seconds",
        Unit::Seconds,
        "Time to compress and persist one block"
    );
    describe_counter!(
        "harvest_windows_completed_total",
        Unit::Count,
        "Search windows fully harvested"
    );
    describe_counter!(
        "harvest_runs_total",
        Unit::Count,
        "Harvest runs by final status"
    );

    let _ = METRICS_INITIALIZED.set(addr);
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Record one search request. `status` is `None` for network failures.
pub fn record_http_request(status: Option<u16>, duration: Duration) {
    let status = status
        .map(|code| code.to_string())
        .unwrap_or_else(|| "network_error".to_string());
    counter!("harvest_http_requests_total", "status" => status).increment(1);
    histogram!("harvest_http_request_duration_seconds").record(duration.as_secs_f64());
}

/// Record a retried fetch attempt
pub fn record_fetch_retry(target: FetchTarget) {
    counter!("harvest_fetch_retries_total", "target" => target.to_string()).increment(1);
}

/// Record a completed governor sleep
pub fn record_governor_wait(duration: Duration) {
    histogram!("harvest_governor_wait_seconds").record(duration.as_secs_f64());
}

/// Record the quota the API reports as remaining
pub fn record_rate_limit_remaining(remaining: u32) {
    gauge!("harvest_rate_limit_remaining").set(f64::from(remaining));
}

/// Record a successfully fetched page and its item count
pub fn record_page_fetched(items: usize) {
    counter!("harvest_pages_fetched_total").increment(1);
    counter!("harvest_records_total").increment(items as u64);
}

/// Record a persisted block
pub fn record_block_written(records: usize, elapsed: Duration) {
    counter!("harvest_blocks_written_total").increment(1);
    histogram!("harvest_block_write_seconds").record(elapsed.as_secs_f64());
    debug!(records, elapsed_ms = elapsed.as_millis(), "Block write recorded");
}

/// Record a completed window
pub fn record_window_completed() {
    counter!("harvest_windows_completed_total").increment(1);
}

/// Record the outcome of a run
pub fn record_run_finished(status: &'static str) {
    counter!("harvest_runs_total", "status" => status).increment(1);
}
