//! Batch configuration constants and tunables

use std::time::Duration;

/// Default number of concurrent workers when the caller does not choose one.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Upper bound on concurrent workers.
/// Twenty workers already saturate a 10 req/s upstream budget several times over.
pub const MAX_CONCURRENCY: usize = 20;

/// Default overall batch deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Default number of fetch attempts per item (first attempt included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Base delay for exponential backoff in milliseconds.
pub const BASE_BACKOFF_MS: u64 = 500;

/// Upstream ceiling, requests per second.
pub const DEFAULT_RATE_LIMIT_PER_SECOND: u32 = 10;

/// Records buffered before a flush to the store.
pub const PERSIST_BATCH_SIZE: usize = 10;

/// Maximum number of error messages retained for reporting.
/// Counters stay exact past this cap; only the detail is dropped.
pub const MAX_ERROR_DETAIL: usize = 100;

/// Time allowed for the final flush after the batch ends.
pub const PERSIST_TIMEOUT: Duration = Duration::from_secs(30);

/// How long workers get to observe cancellation before being aborted.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Largest batch the command line accepts in one invocation.
pub const MAX_BATCH_SIZE: usize = 100;

/// Clamp a requested concurrency into `[1, MAX_CONCURRENCY]`
pub fn clamp_concurrency(requested: usize) -> usize {
    requested.clamp(1, MAX_CONCURRENCY)
}

/// Resolve the batch deadline, falling back to [`DEFAULT_TIMEOUT`] when unset or zero
pub fn resolve_timeout(requested: Option<Duration>) -> Duration {
    match requested {
        Some(timeout) if !timeout.is_zero() => timeout,
        _ => DEFAULT_TIMEOUT,
    }
}

/// Calculate exponential backoff delay: `BASE_BACKOFF_MS * 2^attempt`
///
/// There is no upper cap here; the batch deadline bounds the total wait.
pub fn calculate_backoff(attempt: u32) -> Duration {
    backoff_from(Duration::from_millis(BASE_BACKOFF_MS), attempt)
}

pub(crate) fn backoff_from(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    base.saturating_mul(factor)
}

/// Engine tunables injected into [`crate::batch::BatchExecutor`]
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Tokens granted per second by the shared rate limiter
    pub rate_limit_per_second: u32,
    /// Fetch attempts per item, first attempt included
    pub max_attempts: u32,
    /// Base delay for exponential backoff
    pub base_backoff: Duration,
    /// Records buffered before a flush to the store
    pub persist_batch_size: usize,
    /// Error messages retained in a report
    pub max_error_detail: usize,
    /// Time allowed for the final flush
    pub persist_timeout: Duration,
    /// Grace period for workers after the batch context ends
    pub shutdown_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_second: DEFAULT_RATE_LIMIT_PER_SECOND,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff: Duration::from_millis(BASE_BACKOFF_MS),
            persist_batch_size: PERSIST_BATCH_SIZE,
            max_error_detail: MAX_ERROR_DETAIL,
            persist_timeout: PERSIST_TIMEOUT,
            shutdown_grace: SHUTDOWN_GRACE,
        }
    }
}
