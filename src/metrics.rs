//! Observability metrics for batch fetching
//!
//! Tracks upstream request outcomes, retries, rate limiter pressure, persist
//! flushes and whole-batch results.
//!
//! ## Architecture
//!
//! - Uses `metrics` crate for low-overhead metric collection
//! - Prometheus exporter for scraping endpoint (e.g. :9090/metrics)
//! - Every recorder is a no-op until [`init_metrics`] installs the exporter

use crate::batch::BatchReport;
use crate::ErrorKind;
use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<Arc<RwLock<bool>>> = Lazy::new(|| Arc::new(RwLock::new(false)));

/// Correlation ID generator for request tracing
static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Initialize metrics system with Prometheus exporter
///
/// Idempotent: later calls are no-ops once the exporter is installed.
///
/// # Arguments
/// * `addr` - Socket address to bind Prometheus scrape endpoint (e.g., "0.0.0.0:9090")
pub async fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "http_requests_total",
        Unit::Count,
        "Total number of HTTP requests made to the upstream API"
    );

    describe_histogram!(
        "http_request_duration_seconds",
        Unit::Seconds,
        "HTTP request duration in seconds"
    );

    describe_counter!(
        "fetch_attempts_total",
        Unit::Count,
        "Fetch attempts by outcome"
    );

    describe_counter!(
        "fetch_retries_total",
        Unit::Count,
        "Total number of retry attempts"
    );

    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Duration of retry backoff in seconds"
    );

    describe_counter!(
        "rate_limit_tokens_acquired_total",
        Unit::Count,
        "Total number of rate limit tokens taken"
    );

    describe_gauge!(
        "rate_limit_tokens_available",
        Unit::Count,
        "Tokens currently in the bucket"
    );

    describe_histogram!(
        "rate_limit_queue_wait_seconds",
        Unit::Seconds,
        "Time spent waiting for a rate limit token"
    );

    describe_counter!(
        "persist_flushes_total",
        Unit::Count,
        "Store flushes by outcome"
    );

    describe_counter!(
        "batch_items_total",
        Unit::Count,
        "Items resolved by batches, by status and error kind"
    );

    describe_histogram!(
        "batch_duration_seconds",
        Unit::Seconds,
        "Wall time of a whole batch"
    );

    *initialized = true;
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Generate a new correlation ID for request tracing
pub fn generate_correlation_id() -> String {
    let next = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("req-{:08x}", next)
}

/// Record an HTTP request with timing
pub struct HttpRequestMetrics {
    endpoint: String,
    start_time: Instant,
    correlation_id: String,
}

impl HttpRequestMetrics {
    /// Start recording a new HTTP request
    pub fn start(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        let correlation_id = generate_correlation_id();

        debug!(
            correlation_id = %correlation_id,
            endpoint = %endpoint,
            "Starting HTTP request metrics"
        );

        Self {
            endpoint,
            start_time: Instant::now(),
            correlation_id,
        }
    }

    /// Record completion of the HTTP request
    pub fn record_complete(&self, status_code: u16) {
        let duration = self.start_time.elapsed();

        counter!(
            "http_requests_total",
            "endpoint" => self.endpoint.clone(),
            "status" => status_code.to_string(),
        )
        .increment(1);

        histogram!(
            "http_request_duration_seconds",
            "endpoint" => self.endpoint.clone(),
        )
        .record(duration.as_secs_f64());

        if status_code == 429 {
            warn!(
                correlation_id = %self.correlation_id,
                endpoint = %self.endpoint,
                duration_ms = duration.as_millis(),
                "Upstream rate limit (429) received"
            );
        }

        debug!(
            correlation_id = %self.correlation_id,
            endpoint = %self.endpoint,
            status = status_code,
            duration_ms = duration.as_millis(),
            "HTTP request completed"
        );
    }

    /// Record a network error (no status code)
    pub fn record_network_error(&self) {
        let duration = self.start_time.elapsed();

        counter!(
            "http_requests_total",
            "endpoint" => self.endpoint.clone(),
            "status" => "network_error",
        )
        .increment(1);

        histogram!(
            "http_request_duration_seconds",
            "endpoint" => self.endpoint.clone(),
        )
        .record(duration.as_secs_f64());

        warn!(
            correlation_id = %self.correlation_id,
            endpoint = %self.endpoint,
            duration_ms = duration.as_millis(),
            "Network error recorded"
        );
    }

    /// Get the correlation ID for this request
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

/// Record the outcome of one fetch attempt
pub fn record_fetch_attempt(attempt: u32, outcome: Result<(), ErrorKind>) {
    let outcome = match outcome {
        Ok(()) => "success",
        Err(kind) => kind.as_str(),
    };

    counter!(
        "fetch_attempts_total",
        "outcome" => outcome,
        "attempt" => attempt.to_string(),
    )
    .increment(1);
}

/// Record retry backoff duration
pub fn record_retry_backoff(duration: Duration, attempt: u32) {
    counter!(
        "fetch_retries_total",
        "attempt" => attempt.to_string(),
    )
    .increment(1);

    histogram!(
        "retry_backoff_duration_seconds",
        "attempt" => attempt.to_string(),
    )
    .record(duration.as_secs_f64());

    debug!(
        attempt = attempt,
        backoff_ms = duration.as_millis(),
        "Retry backoff recorded"
    );
}

/// Rate limiter metrics helper
pub struct RateLimiterMetrics {
    start_time: Option<Instant>,
}

impl Default for RateLimiterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiterMetrics {
    /// Create a new rate limiter metrics instance
    pub fn new() -> Self {
        Self { start_time: None }
    }

    /// Start measuring queue wait time
    pub fn start_acquire(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Record a token taken from the bucket
    pub fn record_acquired(&mut self) {
        if let Some(start) = self.start_time.take() {
            let wait_duration = start.elapsed();

            histogram!("rate_limit_queue_wait_seconds").record(wait_duration.as_secs_f64());
            counter!("rate_limit_tokens_acquired_total").increment(1);

            if wait_duration.as_millis() > 100 {
                debug!(
                    wait_ms = wait_duration.as_millis(),
                    "Rate limit token acquired after wait"
                );
            }
        }
    }

    /// Update available tokens gauge
    pub fn update_available_permits(&self, available: usize) {
        gauge!("rate_limit_tokens_available").set(available as f64);
    }
}

/// Record one flush of buffered records to the store
pub fn record_persist_flush(records: usize, succeeded: bool, duration: Duration) {
    counter!(
        "persist_flushes_total",
        "outcome" => if succeeded { "success" } else { "failure" },
    )
    .increment(1);

    debug!(
        records = records,
        succeeded = succeeded,
        duration_ms = duration.as_millis(),
        "Persist flush recorded"
    );
}

/// Whole-batch metrics
pub struct BatchMetrics {
    items: usize,
    concurrency: usize,
    start_time: Instant,
}

impl BatchMetrics {
    /// Start tracking a batch
    pub fn start(items: usize, concurrency: usize) -> Self {
        info!(items = items, concurrency = concurrency, "Batch started");

        Self {
            items,
            concurrency,
            start_time: Instant::now(),
        }
    }

    /// Record the final report
    pub fn record_complete(&self, report: &BatchReport) {
        let duration = self.start_time.elapsed();

        for result in &report.results {
            let kind = result.error_kind.map(|k| k.as_str()).unwrap_or("none");
            counter!(
                "batch_items_total",
                "status" => result.status.as_str(),
                "error_kind" => kind,
            )
            .increment(1);
        }

        histogram!("batch_duration_seconds").record(duration.as_secs_f64());

        info!(
            items = self.items,
            concurrency = self.concurrency,
            successful = report.successful,
            failed = report.failed,
            persist_failures = report.persist_failures,
            duration_ms = duration.as_millis(),
            "Batch completed"
        );
    }
}

/// Check if metrics system is initialized
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.read().await
}
