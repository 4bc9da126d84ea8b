//! Retry with exponential backoff around a single fetch attempt

use crate::batch::config::{backoff_from, EngineConfig, BASE_BACKOFF_MS, DEFAULT_MAX_ATTEMPTS};
use crate::batch::context::BatchContext;
use crate::fetcher::{FetchError, FetchResult};
use crate::metrics::record_retry_backoff;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// How many times to try and how long to wait in between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first attempt included
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on every further retry
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Create a policy
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay after the 0-based `attempt` failed: `base_delay * 2^attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        backoff_from(self.base_delay, attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_ATTEMPTS,
            Duration::from_millis(BASE_BACKOFF_MS),
        )
    }
}

impl From<&EngineConfig> for RetryPolicy {
    fn from(config: &EngineConfig) -> Self {
        Self::new(config.max_attempts, config.base_backoff)
    }
}

/// Run `operation` until it succeeds, fails permanently or runs out of attempts
///
/// `operation` receives the 0-based attempt number. Each attempt and each
/// backoff wait is raced against `ctx`; when the context ends the pending
/// attempt is dropped and the context's cause is returned.
///
/// # Errors
/// - [`FetchError::NotFound`] from the first attempt that reports it
/// - [`FetchError::Timeout`] / [`FetchError::Cancelled`] when `ctx` ends first
/// - the last attempt's error once attempts are exhausted
pub async fn with_retry<T, F, Fut>(
    ctx: &BatchContext,
    policy: &RetryPolicy,
    mut operation: F,
) -> FetchResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = FetchResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if ctx.is_done() {
            return Err(FetchError::from_context(ctx.cause()));
        }

        let result = tokio::select! {
            biased;
            _ = ctx.done() => return Err(FetchError::from_context(ctx.cause())),
            result = operation(attempt) => result,
        };

        let err = match result {
            Ok(value) => {
                if attempt > 0 {
                    debug!(attempt = attempt + 1, "Attempt succeeded after retries");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if err.is_permanent() {
            return Err(err);
        }

        if ctx.is_done() {
            return Err(FetchError::from_context(ctx.cause()));
        }

        if attempt + 1 >= max_attempts {
            warn!(
                attempts = max_attempts,
                error = %err,
                "Retries exhausted"
            );
            return Err(err.into_exhausted());
        }

        let delay = policy.delay_for(attempt);
        warn!(
            attempt = attempt + 1,
            max_attempts = max_attempts,
            backoff_ms = delay.as_millis() as u64,
            error = %err,
            "Attempt failed, retrying"
        );
        record_retry_backoff(delay, attempt);

        sleep_with_cancellation(ctx, delay).await?;
        attempt += 1;
    }
}

async fn sleep_with_cancellation(ctx: &BatchContext, delay: Duration) -> FetchResult<()> {
    tokio::select! {
        biased;
        _ = ctx.done() => Err(FetchError::from_context(ctx.cause())),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
