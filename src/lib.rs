//! # Batch Fetch Library
//!
//! A concurrent engine for fetching records for a list of account handles from a
//! rate-limited, unreliable upstream API and persisting the ones that arrive.
//!
//! ## Features
//!
//! - **Bounded Concurrency**: A fixed-size worker pool over a bounded task queue
//! - **Shared Rate Limiting**: One token bucket gates every fetch attempt across all workers
//! - **Retry with Backoff**: Exponential backoff for transient failures, no retry on not-found
//! - **Deadline Handling**: Every item is accounted for, even when the batch times out
//! - **Batched Persistence**: Successful records are upserted in groups of ten
//! - **Deterministic Reports**: Per-item results sorted by id with exact counters
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use batch_fetch::batch::BatchExecutor;
//! use batch_fetch::fetcher::http::HttpRecordFetcher;
//! use batch_fetch::store::memory::MemoryRecordStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let fetcher = Arc::new(HttpRecordFetcher::new("https://v1.rocketapi.io", "api-key")?);
//! let store = Arc::new(MemoryRecordStore::new());
//!
//! let executor = BatchExecutor::new(fetcher, store);
//! let report = executor
//!     .run_batch(&["alice", "Bob ", "alice"], 5, Some(Duration::from_secs(60)))
//!     .await?;
//!
//! assert_eq!(report.total, 2);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`identifier`] - Normalization and deduplication of incoming handles
//! - [`batch`] - Rate limiter, retry wrapper, worker pool and the batch executor
//! - [`fetcher`] - The fetch collaborator contract and an HTTP implementation
//! - [`store`] - The persistence collaborator contract, CSV and in-memory stores
//! - [`metrics`] - Prometheus metrics for attempts, retries and batch outcomes
//! - [`cli`] - Command line front end

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Batch orchestration, rate limiting, retry and worker pool
pub mod batch;

/// CLI command implementations
pub mod cli;

/// Record fetchers
pub mod fetcher;

/// Identifier normalization
pub mod identifier;

/// Metrics collection
pub mod metrics;

/// Graceful shutdown coordination
pub mod shutdown;

/// Record persistence
pub mod store;

pub use batch::{BatchExecutor, BatchReport, ItemResult, ItemStatus};
pub use fetcher::{FetchError, RecordFetcher};
pub use store::{RecordStore, StoreError};

/// A record fetched from the upstream service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    /// Normalized identifier the record was requested under (upsert key)
    pub id: String,
    /// Primary key assigned by the upstream service, when it reports one
    pub upstream_id: Option<String>,
    /// Attributes returned by the upstream service
    pub attributes: serde_json::Value,
    /// When the record was fetched
    pub fetched_at: DateTime<Utc>,
}

impl Record {
    /// Create a record stamped with the current time
    pub fn new(id: impl Into<String>, attributes: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            upstream_id: None,
            attributes,
            fetched_at: Utc::now(),
        }
    }

    /// Attach the upstream primary key
    pub fn with_upstream_id(mut self, upstream_id: impl Into<String>) -> Self {
        self.upstream_id = Some(upstream_id.into());
        self
    }

    /// Validate record integrity
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("Record id cannot be empty".to_string());
        }

        if !self.attributes.is_object() && !self.attributes.is_null() {
            return Err(format!(
                "Record attributes must be an object, got {}",
                self.attributes
            ));
        }

        Ok(())
    }
}

/// Failure classification carried by per-item results
///
/// Drives retry eligibility and reporting. `PersistFailed` is a warning: it is
/// attached to items whose fetch succeeded but whose flush to the store failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The upstream service has no record for the identifier (permanent)
    NotFound,
    /// The upstream service rejected the request with a rate limit
    RateLimited,
    /// A failure that may succeed on retry
    Transient,
    /// The batch deadline expired before the item resolved
    Timeout,
    /// The batch was cancelled before the item resolved
    Cancelled,
    /// The record was fetched but could not be persisted
    PersistFailed,
}

impl ErrorKind {
    /// Whether retrying can change the outcome
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::RateLimited | ErrorKind::Transient)
    }

    /// Stable lowercase label, used for metrics and human output
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Transient => "transient",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::PersistFailed => "persist_failed",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
