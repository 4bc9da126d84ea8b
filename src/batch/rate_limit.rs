//! Token-bucket rate limiting shared by every worker
//!
//! The bucket starts full. A background task adds one token every
//! `refill_interval / capacity` and discards tokens beyond `capacity`, so the
//! long-run rate never exceeds `capacity / refill_interval`.

use crate::batch::context::BatchContext;
use crate::metrics::RateLimiterMetrics;
use crate::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Shortest refill tick the limiter will schedule
const MIN_TOKEN_PERIOD: Duration = Duration::from_millis(1);

/// Rate limiter handle, cheap to clone and share across batches
///
/// The refill task lives as long as the last clone.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

struct Inner {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    refill_interval: Duration,
    refill_shutdown: CancellationToken,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.refill_shutdown.cancel();
    }
}

impl RateLimiter {
    /// Create a token bucket
    ///
    /// # Arguments
    /// * `capacity` - Maximum tokens held, and tokens granted per `refill_interval`
    /// * `refill_interval` - Time to refill an empty bucket
    ///
    /// Must be called from within a tokio runtime; the refill task is spawned here.
    pub fn new(capacity: usize, refill_interval: Duration) -> Self {
        let capacity = capacity.max(1);
        let semaphore = Arc::new(Semaphore::new(capacity));
        let refill_shutdown = CancellationToken::new();
        let period = token_period(capacity, refill_interval);

        tokio::spawn(refill_loop(
            semaphore.clone(),
            capacity,
            period,
            refill_shutdown.clone(),
        ));

        debug!(
            capacity = capacity,
            refill_interval_ms = refill_interval.as_millis() as u64,
            token_period_ms = period.as_millis() as u64,
            "Rate limiter created"
        );

        Self {
            inner: Arc::new(Inner {
                semaphore,
                capacity,
                refill_interval,
                refill_shutdown,
            }),
        }
    }

    /// Create a limiter granting `requests` tokens per second
    pub fn per_second(requests: u32) -> Self {
        Self::new(requests as usize, Duration::from_secs(1))
    }

    /// Maximum tokens held
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Time to refill an empty bucket
    pub fn refill_interval(&self) -> Duration {
        self.inner.refill_interval
    }

    /// Tokens currently available
    pub fn available_tokens(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    /// Take one token, waiting until one is available or the context ends
    ///
    /// # Errors
    /// Returns [`RateLimitError::Timeout`] or [`RateLimitError::Cancelled`]
    /// when the batch context ends first.
    pub async fn acquire(&self, ctx: &BatchContext) -> Result<(), RateLimitError> {
        if ctx.is_done() {
            return Err(RateLimitError::from_cause(ctx.cause()));
        }

        let mut metrics = RateLimiterMetrics::new();
        metrics.start_acquire();

        tokio::select! {
            biased;
            _ = ctx.done() => Err(RateLimitError::from_cause(ctx.cause())),
            permit = self.inner.semaphore.acquire() => {
                let permit = permit.map_err(|e| RateLimitError::AcquireError(e.to_string()))?;
                // A token is spent, not borrowed; only the refill task adds permits.
                permit.forget();
                metrics.record_acquired();
                metrics.update_available_permits(self.available_tokens());
                Ok(())
            }
        }
    }

    #[cfg(test)]
    fn semaphore_weak(&self) -> std::sync::Weak<Semaphore> {
        Arc::downgrade(&self.inner.semaphore)
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("capacity", &self.inner.capacity)
            .field("refill_interval", &self.inner.refill_interval)
            .field("available", &self.available_tokens())
            .finish()
    }
}

fn token_period(capacity: usize, refill_interval: Duration) -> Duration {
    let divisor = u32::try_from(capacity).unwrap_or(u32::MAX);
    (refill_interval / divisor).max(MIN_TOKEN_PERIOD)
}

async fn refill_loop(
    semaphore: Arc<Semaphore>,
    capacity: usize,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Rate limiter refill task stopped");
                return;
            }
            _ = ticker.tick() => {
                // Single writer: acquirers only ever remove permits.
                if semaphore.available_permits() < capacity {
                    semaphore.add_permits(1);
                    trace!(available = semaphore.available_permits(), "Token refilled");
                }
            }
        }
    }
}

/// Rate limiter errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RateLimitError {
    /// The batch deadline passed while waiting for a token
    #[error("batch deadline expired while waiting for a rate limit token")]
    Timeout,

    /// The batch was cancelled while waiting for a token
    #[error("batch cancelled while waiting for a rate limit token")]
    Cancelled,

    /// Failed to acquire a permit
    #[error("failed to acquire rate limit permit: {0}")]
    AcquireError(String),
}

impl RateLimitError {
    pub(crate) fn from_cause(cause: ErrorKind) -> Self {
        match cause {
            ErrorKind::Timeout => RateLimitError::Timeout,
            _ => RateLimitError::Cancelled,
        }
    }

    /// Classification for reporting
    pub fn kind(&self) -> ErrorKind {
        match self {
            RateLimitError::Timeout => ErrorKind::Timeout,
            RateLimitError::Cancelled => ErrorKind::Cancelled,
            RateLimitError::AcquireError(_) => ErrorKind::Transient,
        }
    }
}
