//! Batch executor: normalize, dispatch, fetch with retry, persist, report

use crate::batch::config::{clamp_concurrency, resolve_timeout, EngineConfig};
use crate::batch::context::BatchContext;
use crate::batch::job::{BatchReport, ItemResult, ItemState, WorkItem};
use crate::batch::persist::PersistBuffer;
use crate::batch::progress::BatchProgress;
use crate::batch::rate_limit::RateLimiter;
use crate::batch::retry::{with_retry, RetryPolicy};
use crate::batch::worker_pool::{PoolError, PoolTask, TaskHandler, TaskOutcome, WorkerPool};
use crate::fetcher::{FetchResult, RecordFetcher};
use crate::identifier::{normalize_ids, Identifier, IdentifierError};
use crate::metrics::{record_fetch_attempt, BatchMetrics};
use crate::store::RecordStore;
use crate::{ErrorKind, Record};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn, Instrument};

/// Batch errors
///
/// Only problems that prevent a batch from running at all; per-item failures
/// are reported in the [`BatchReport`].
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// No usable identifiers
    #[error("invalid input: {0}")]
    InvalidInput(#[from] IdentifierError),

    /// The worker pool could not be started
    #[error("worker pool error: {0}")]
    Pool(#[from] PoolError),
}

/// Runs batches against an injected fetcher and store
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use batch_fetch::batch::{BatchExecutor, RateLimiter};
/// use batch_fetch::fetcher::http::HttpRecordFetcher;
/// use batch_fetch::store::memory::MemoryRecordStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let executor = BatchExecutor::new(
///     Arc::new(HttpRecordFetcher::new("https://v1.rocketapi.io", "key")?),
///     Arc::new(MemoryRecordStore::new()),
/// )
/// .with_rate_limiter(RateLimiter::per_second(10));
///
/// let report = executor.run_batch(&["alice", "bob"], 5, None).await?;
/// println!("{} of {} fetched", report.successful, report.total);
/// # Ok(())
/// # }
/// ```
pub struct BatchExecutor {
    fetcher: Arc<dyn RecordFetcher>,
    store: Arc<dyn RecordStore>,
    config: EngineConfig,
    rate_limiter: Option<RateLimiter>,
}

impl BatchExecutor {
    /// Create an executor with default tunables
    pub fn new(fetcher: Arc<dyn RecordFetcher>, store: Arc<dyn RecordStore>) -> Self {
        Self {
            fetcher,
            store,
            config: EngineConfig::default(),
            rate_limiter: None,
        }
    }

    /// Replace the tunables
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a rate limiter across batches
    ///
    /// Without one, each batch creates its own from
    /// [`EngineConfig::rate_limit_per_second`].
    pub fn with_rate_limiter(mut self, rate_limiter: RateLimiter) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    /// Set fetch attempts per item
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.config.max_attempts = max_attempts.max(1);
        self
    }

    /// Current tunables
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Fetch and persist a record for every identifier
    ///
    /// # Arguments
    /// * `ids` - Raw identifiers; trimmed, lowercased and deduplicated
    /// * `concurrency` - Worker count, clamped to `[1, 20]`
    /// * `timeout` - Batch deadline; `None` or zero means 300 seconds
    ///
    /// # Errors
    /// [`BatchError::InvalidInput`] when no identifier survives normalization.
    /// Per-item failures never fail the batch.
    pub async fn run_batch<S: AsRef<str>>(
        &self,
        ids: &[S],
        concurrency: usize,
        timeout: Option<Duration>,
    ) -> Result<BatchReport, BatchError> {
        self.run_batch_cancellable(ids, concurrency, timeout, &CancellationToken::new())
            .await
    }

    /// [`BatchExecutor::run_batch`], also ended early when `parent` is cancelled
    ///
    /// Items still unresolved when `parent` is cancelled report `Cancelled`.
    pub async fn run_batch_cancellable<S: AsRef<str>>(
        &self,
        ids: &[S],
        concurrency: usize,
        timeout: Option<Duration>,
        parent: &CancellationToken,
    ) -> Result<BatchReport, BatchError> {
        let ids = normalize_ids(ids)?;
        let concurrency = clamp_concurrency(concurrency);
        let timeout = resolve_timeout(timeout);

        let span = tracing::info_span!(
            "batch",
            items = ids.len(),
            concurrency = concurrency,
            timeout_secs = timeout.as_secs()
        );

        self.execute(ids, concurrency, timeout, parent)
            .instrument(span)
            .await
    }

    async fn execute(
        &self,
        ids: Vec<Identifier>,
        concurrency: usize,
        timeout: Duration,
        parent: &CancellationToken,
    ) -> Result<BatchReport, BatchError> {
        let started_at = Utc::now();
        let metrics = BatchMetrics::start(ids.len(), concurrency);
        let ctx = BatchContext::with_parent(parent, timeout);

        let rate_limiter = self
            .rate_limiter
            .clone()
            .unwrap_or_else(|| RateLimiter::per_second(self.config.rate_limit_per_second));
        let persist = Arc::new(PersistBuffer::new(
            self.store.clone(),
            self.config.persist_batch_size,
        ));

        let processor = Arc::new(ItemProcessor {
            fetcher: self.fetcher.clone(),
            rate_limiter,
            policy: RetryPolicy::from(&self.config),
            persist: persist.clone(),
            progress: BatchProgress::new(ids.len()),
        });

        let mut pool = WorkerPool::new(processor)
            .with_max_errors(self.config.max_error_detail)
            .with_shutdown_grace(self.config.shutdown_grace);
        let mut results_rx = pool.start(concurrency, &ctx)?;

        for id in &ids {
            if let Err(err) = pool.submit(WorkItem::new(id.clone()), &ctx).await {
                warn!(error = %err, "Dispatch stopped early");
                break;
            }
        }

        pool.await_completion(&ctx).await;

        // Every worker has exited, so the channel is closed once drained.
        let mut resolved: BTreeMap<String, ItemResult> = BTreeMap::new();
        while let Some(result) = results_rx.recv().await {
            resolved.insert(result.id.clone(), result);
        }

        persist.flush_remaining(self.config.persist_timeout).await;

        let cause = ctx.cause();
        let unresolved = ids.len() - resolved.len();
        if unresolved > 0 {
            warn!(
                unresolved = unresolved,
                cause = %cause,
                "Batch ended before every item resolved"
            );
        }

        let persist_failures = persist.failures();
        let results = ids
            .iter()
            .map(|id| {
                let result = resolved
                    .remove(id.as_str())
                    .unwrap_or_else(|| ItemResult::unresolved(id.as_str(), cause));
                match persist_failures.get(id.as_str()) {
                    Some(message) if result.is_success() => result.with_persist_warning(message),
                    _ => result,
                }
            })
            .collect();

        let report = BatchReport::from_results(results, started_at, self.config.max_error_detail);
        metrics.record_complete(&report);

        debug!(pool_stats = ?pool.stats(), "Worker pool finished");
        Ok(report)
    }
}

impl PoolTask for WorkItem {
    fn id(&self) -> &str {
        WorkItem::id(self)
    }
}

impl TaskOutcome for ItemResult {
    fn failure(&self) -> Option<String> {
        if self.is_success() {
            None
        } else {
            Some(self.message.clone().unwrap_or_default())
        }
    }
}

/// Per-item lifecycle bookkeeping
struct ItemTracker<'a> {
    id: &'a str,
    state: Mutex<ItemState>,
}

impl<'a> ItemTracker<'a> {
    fn new(id: &'a str) -> Self {
        Self {
            id,
            state: Mutex::new(ItemState::Pending),
        }
    }

    fn advance(&self, next: ItemState) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        match state.transition(next) {
            Ok(next) => {
                trace!(id = self.id, from = ?*state, to = ?next, "Item state");
                *state = next;
            }
            Err(err) => warn!(id = self.id, error = %err, "Unexpected item state transition"),
        }
    }
}

/// Processes one work item inside a worker
struct ItemProcessor {
    fetcher: Arc<dyn RecordFetcher>,
    rate_limiter: RateLimiter,
    policy: RetryPolicy,
    persist: Arc<PersistBuffer>,
    progress: BatchProgress,
}

impl ItemProcessor {
    async fn attempt(
        &self,
        id: &str,
        attempt: u32,
        tracker: &ItemTracker<'_>,
        ctx: &BatchContext,
    ) -> FetchResult<Record> {
        tracker.advance(ItemState::RateLimited);
        self.rate_limiter.acquire(ctx).await?;

        tracker.advance(ItemState::Fetching);
        let result = self.fetcher.fetch(id).await;
        record_fetch_attempt(attempt, result.as_ref().map(|_| ()).map_err(|e| e.kind()));

        if let Err(err) = &result {
            if !err.is_permanent() && attempt + 1 < self.policy.max_attempts {
                tracker.advance(ItemState::Retrying);
            }
        }

        result
    }
}

#[async_trait]
impl TaskHandler<WorkItem> for ItemProcessor {
    type Output = ItemResult;

    async fn handle(&self, item: WorkItem, ctx: &BatchContext) -> ItemResult {
        let id = item.id();
        let tracker = ItemTracker::new(id);

        let outcome = with_retry(ctx, &self.policy, |attempt| {
            self.attempt(id, attempt, &tracker, ctx)
        })
        .await;

        match outcome {
            Ok(mut record) => {
                tracker.advance(ItemState::Success);
                if record.id != id {
                    debug!(id = id, returned = %record.id, "Re-keying record to requested id");
                    record.id = id.to_string();
                }

                self.persist.push(record.clone(), ctx).await;
                self.progress.record(true);
                ItemResult::success(id, record)
            }
            Err(err) => {
                let kind = err.kind();
                tracker.advance(match kind {
                    ErrorKind::Timeout | ErrorKind::Cancelled => ItemState::Cancelled,
                    _ => ItemState::PermanentFailure,
                });

                info!(id = id, kind = %kind, error = %err, "Item failed");
                self.progress.record(false);
                ItemResult::failure(id, kind, err.to_string())
            }
        }
    }

    fn on_panic(&self, task_id: &str, message: &str) -> ItemResult {
        self.progress.record(false);
        ItemResult::failure(
            task_id,
            ErrorKind::Transient,
            format!("worker panicked: {message}"),
        )
    }
}
