//! Cancellable, time-bounded context shared by everything running in one batch.
//!
//! A [`BatchContext`] ends either when its token is cancelled (caller shutdown)
//! or when its deadline passes. Waiters use [`BatchContext::done`] inside
//! `tokio::select!`; the cause is reported as [`ErrorKind::Timeout`] or
//! [`ErrorKind::Cancelled`].

use crate::ErrorKind;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Cancellation and deadline for one batch
#[derive(Debug, Clone)]
pub struct BatchContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl BatchContext {
    /// A context with no deadline, ended only by [`BatchContext::cancel`]
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// A context that ends after `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_parent(&CancellationToken::new(), timeout)
    }

    /// A context that ends after `timeout` or when `parent` is cancelled
    pub fn with_parent(parent: &CancellationToken, timeout: Duration) -> Self {
        Self {
            token: parent.child_token(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Cancel the context and everything waiting on it
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Deadline, if one was set
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the deadline has passed
    pub fn is_expired(&self) -> bool {
        self.deadline
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }

    /// Whether the context has ended for either reason
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.is_expired()
    }

    /// Resolves once the context has ended
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// Why the context ended
    ///
    /// An expired deadline wins over cancellation, so a batch that both timed
    /// out and was later cancelled during cleanup still reports `Timeout`.
    pub fn cause(&self) -> ErrorKind {
        if self.is_expired() {
            ErrorKind::Timeout
        } else {
            ErrorKind::Cancelled
        }
    }

    /// Time left before the deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

impl Default for BatchContext {
    fn default() -> Self {
        Self::new()
    }
}
