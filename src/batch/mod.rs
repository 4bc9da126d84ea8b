//! Batch orchestration and rate limiting
//!
//! This module is the fetch-and-persist engine: bounded-concurrency dispatch,
//! a shared rate limiter, per-item retry with backoff and deterministic
//! result aggregation.
//!
//! # Overview
//!
//! 1. **Normalization**: identifiers are trimmed, lowercased and deduplicated
//! 2. **Dispatch**: one [`job::WorkItem`] per identifier goes to a [`worker_pool::WorkerPool`]
//! 3. **Rate Limiting**: every fetch attempt takes a token from a shared [`rate_limit::RateLimiter`]
//! 4. **Retry**: [`retry::with_retry`] backs off on transient failures, never on not-found
//! 5. **Persistence**: fetched records are flushed to the store in groups via [`persist::PersistBuffer`]
//! 6. **Report**: a [`job::BatchReport`] with one result per identifier, sorted by id
//!
//! # Components
//!
//! - [`executor`] - Batch executor tying the pieces together
//! - [`context`] - Cancellation token plus deadline shared by one batch
//! - [`rate_limit`] - Token bucket
//! - [`retry`] - Retry with exponential backoff
//! - [`worker_pool`] - Fixed-size worker pool
//! - [`persist`] - Buffered persistence
//! - [`progress`] - Progress counters and periodic progress logs
//! - [`job`] - Work items, per-item results and the report
//! - [`config`] - Constants and tunables
//!
//! # Error Handling
//!
//! Only invalid input or a pool that cannot start fails a batch
//! ([`BatchError`]). Every other failure is classified per item with an
//! [`crate::ErrorKind`]:
//! - `NotFound` (not retried)
//! - `RateLimited` and `Transient` (retried with backoff)
//! - `Timeout` and `Cancelled` (batch ended first)
//! - `PersistFailed` (warning on an otherwise successful item)

pub mod config;
pub mod context;
pub mod executor;
pub mod job;
pub mod persist;
pub mod progress;
pub mod rate_limit;
pub mod retry;
pub mod worker_pool;

pub use config::EngineConfig;
pub use context::BatchContext;
pub use executor::{BatchError, BatchExecutor};
pub use job::{BatchReport, ItemResult, ItemState, ItemStatus, WorkItem};
pub use rate_limit::{RateLimitError, RateLimiter};
pub use retry::{with_retry, RetryPolicy};
pub use worker_pool::{PoolError, PoolStats, WorkerPool};
