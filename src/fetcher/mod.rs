//! Record fetcher contract and implementations

use crate::batch::rate_limit::RateLimitError;
use crate::{ErrorKind, Record};
use async_trait::async_trait;

pub mod http;

/// Fetcher errors
///
/// Collaborators classify their own failures. Anything they cannot classify
/// goes in [`FetchError::Other`] and is retried like a transient failure.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum FetchError {
    /// The upstream service has no record for this identifier
    #[error("not found: {id}: {message}")]
    NotFound {
        /// Identifier that was requested
        id: String,
        /// Upstream message
        message: String,
    },

    /// The upstream service throttled the request
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// A failure worth retrying (5xx, network)
    #[error("transient error: {0}")]
    Transient(String),

    /// The request or the batch ran out of time
    #[error("timed out")]
    Timeout,

    /// The batch was cancelled
    #[error("cancelled")]
    Cancelled,

    /// Unclassified failure
    #[error("{0}")]
    Other(String),
}

impl FetchError {
    /// Classification carried into the item result
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::NotFound { .. } => ErrorKind::NotFound,
            FetchError::RateLimited(_) => ErrorKind::RateLimited,
            FetchError::Transient(_) | FetchError::Other(_) => ErrorKind::Transient,
            FetchError::Timeout => ErrorKind::Timeout,
            FetchError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether further attempts are pointless
    pub fn is_permanent(&self) -> bool {
        matches!(self, FetchError::NotFound { .. })
    }

    /// Error to report once retries are used up
    pub fn into_exhausted(self) -> Self {
        match self {
            FetchError::Other(message) => FetchError::Transient(message),
            other => other,
        }
    }

    /// Error standing in for a batch context that ended
    pub fn from_context(cause: ErrorKind) -> Self {
        match cause {
            ErrorKind::Timeout => FetchError::Timeout,
            _ => FetchError::Cancelled,
        }
    }
}

impl From<RateLimitError> for FetchError {
    fn from(err: RateLimitError) -> Self {
        match err {
            RateLimitError::Timeout => FetchError::Timeout,
            RateLimitError::Cancelled => FetchError::Cancelled,
            RateLimitError::AcquireError(message) => FetchError::Transient(message),
        }
    }
}

/// Result type for fetcher operations
pub type FetchResult<T> = Result<T, FetchError>;

/// Retrieves one record from the upstream service
///
/// Implementations need not observe the batch deadline; the engine races
/// every call against it and drops calls that are still running.
#[async_trait]
pub trait RecordFetcher: Send + Sync {
    /// Fetch the record for a normalized identifier
    ///
    /// # Errors
    /// Returns [`FetchError::NotFound`] when the upstream has no such record,
    /// and a retryable variant for throttling and transient failures.
    async fn fetch(&self, id: &str) -> FetchResult<Record>;
}
