//! Fixed-size worker pool over a bounded task queue
//!
//! `n` tokio tasks pull from one shared bounded `mpsc` queue and push outcomes
//! onto an unbounded results channel read by a single collector. A task that
//! panics is caught and converted into an outcome by the handler; the worker
//! keeps pulling.

use crate::batch::config::{MAX_ERROR_DETAIL, SHUTDOWN_GRACE};
use crate::batch::context::BatchContext;
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Processed tasks between progress log lines
const PROGRESS_LOG_EVERY: u64 = 10;

/// A unit of work accepted by the pool
pub trait PoolTask: Send + 'static {
    /// Identifier used in logs and error detail
    fn id(&self) -> &str;
}

/// Outcome produced for every accepted task
pub trait TaskOutcome: Send + 'static {
    /// Failure detail, if the task failed
    fn failure(&self) -> Option<String>;
}

impl<O, E> TaskOutcome for Result<O, E>
where
    O: Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    fn failure(&self) -> Option<String> {
        self.as_ref().err().map(|e| e.to_string())
    }
}

/// Processes tasks; shared by every worker
#[async_trait]
pub trait TaskHandler<T: PoolTask>: Send + Sync + 'static {
    /// Outcome type sent to the results channel
    type Output: TaskOutcome;

    /// Process one task
    async fn handle(&self, task: T, ctx: &BatchContext) -> Self::Output;

    /// Outcome for a task whose handler panicked
    fn on_panic(&self, task_id: &str, message: &str) -> Self::Output;
}

/// Snapshot of pool counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Tasks that produced an outcome
    pub processed: u64,
    /// Outcomes reporting a failure (panics included)
    pub failed: u64,
    /// Tasks whose handler panicked
    pub panicked: u64,
    /// Failure detail, capped; counters stay exact past the cap
    pub errors: Vec<String>,
}

#[derive(Debug)]
struct StatsCollector {
    processed: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
    errors: Mutex<Vec<String>>,
    max_errors: usize,
}

impl StatsCollector {
    fn new(max_errors: usize) -> Self {
        Self {
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            panicked: AtomicU64::new(0),
            errors: Mutex::new(Vec::new()),
            max_errors,
        }
    }

    fn record(&self, task_id: &str, failure: Option<String>) -> u64 {
        if let Some(message) = failure {
            self.failed.fetch_add(1, Ordering::SeqCst);
            let mut errors = self.errors.lock().unwrap_or_else(|p| p.into_inner());
            if errors.len() < self.max_errors {
                errors.push(format!("{task_id}: {message}"));
            }
        }
        self.processed.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn snapshot(&self) -> PoolStats {
        PoolStats {
            processed: self.processed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            panicked: self.panicked.load(Ordering::SeqCst),
            errors: self
                .errors
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .clone(),
        }
    }
}

/// Worker pool errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PoolError {
    /// `submit` before `start`
    #[error("worker pool has not been started")]
    NotStarted,

    /// `start` called twice
    #[error("worker pool already started")]
    AlreadyStarted,

    /// Intake is closed
    #[error("worker pool is closed")]
    Closed,

    /// Non-blocking submit found the queue full
    #[error("worker pool queue is full")]
    QueueFull,

    /// The batch context ended while waiting for queue capacity
    #[error("batch ended while waiting for queue capacity")]
    Cancelled,
}

/// Fixed-size pool of workers sharing one handler
pub struct WorkerPool<T: PoolTask, H: TaskHandler<T>> {
    handler: Arc<H>,
    queue_capacity: Option<usize>,
    shutdown_grace: Duration,
    sender: Option<mpsc::Sender<T>>,
    workers: JoinSet<()>,
    worker_count: usize,
    started: bool,
    stats: Arc<StatsCollector>,
}

impl<T: PoolTask, H: TaskHandler<T>> WorkerPool<T, H> {
    /// Create a pool around `handler`; no workers run until [`WorkerPool::start`]
    pub fn new(handler: Arc<H>) -> Self {
        Self {
            handler,
            queue_capacity: None,
            shutdown_grace: SHUTDOWN_GRACE,
            sender: None,
            workers: JoinSet::new(),
            worker_count: 0,
            started: false,
            stats: Arc::new(StatsCollector::new(MAX_ERROR_DETAIL)),
        }
    }

    /// Queue capacity; defaults to twice the worker count
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity.max(1));
        self
    }

    /// Failure messages retained in [`PoolStats::errors`]
    pub fn with_max_errors(mut self, max_errors: usize) -> Self {
        self.stats = Arc::new(StatsCollector::new(max_errors));
        self
    }

    /// Time workers get to observe an ended context before being aborted
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Number of workers started
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Counter snapshot
    pub fn stats(&self) -> PoolStats {
        self.stats.snapshot()
    }

    /// Spawn exactly `workers` workers (at least one)
    ///
    /// Returns the receiving end of the results channel; it yields one outcome
    /// per accepted task and closes once every worker has exited.
    pub fn start(
        &mut self,
        workers: usize,
        ctx: &BatchContext,
    ) -> Result<mpsc::UnboundedReceiver<H::Output>, PoolError> {
        if self.started {
            return Err(PoolError::AlreadyStarted);
        }

        let workers = workers.max(1);
        let capacity = self.queue_capacity.unwrap_or(workers * 2);
        let (task_tx, task_rx) = mpsc::channel::<T>(capacity);
        let task_rx = Arc::new(tokio::sync::Mutex::new(task_rx));
        let (result_tx, result_rx) = mpsc::unbounded_channel();

        for worker_id in 0..workers {
            self.workers.spawn(run_worker(
                worker_id,
                self.handler.clone(),
                task_rx.clone(),
                result_tx.clone(),
                self.stats.clone(),
                ctx.clone(),
            ));
        }

        self.sender = Some(task_tx);
        self.worker_count = workers;
        self.started = true;

        info!(workers = workers, queue_capacity = capacity, "Worker pool started");
        Ok(result_rx)
    }

    /// Submit a task, waiting for queue capacity
    ///
    /// # Errors
    /// [`PoolError::Closed`] after close, [`PoolError::Cancelled`] when `ctx`
    /// ends while waiting.
    pub async fn submit(&self, task: T, ctx: &BatchContext) -> Result<(), PoolError> {
        let sender = self.sender()?;
        if ctx.is_done() {
            return Err(PoolError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = ctx.done() => Err(PoolError::Cancelled),
            sent = sender.send(task) => sent.map_err(|_| PoolError::Closed),
        }
    }

    /// Submit a task without waiting
    ///
    /// # Errors
    /// [`PoolError::QueueFull`] when the queue has no free slot.
    pub fn try_submit(&self, task: T) -> Result<(), PoolError> {
        self.sender()?.try_send(task).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PoolError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => PoolError::Closed,
        })
    }

    fn sender(&self) -> Result<&mpsc::Sender<T>, PoolError> {
        match (&self.sender, self.started) {
            (Some(sender), _) => Ok(sender),
            (None, false) => Err(PoolError::NotStarted),
            (None, true) => Err(PoolError::Closed),
        }
    }

    /// Close intake; queued tasks are still processed
    pub fn close(&mut self) {
        if self.sender.take().is_some() {
            debug!("Worker pool intake closed");
        }
    }

    /// Close intake and wait for every accepted task to finish
    pub async fn stop(&mut self) {
        self.close();
        while let Some(joined) = self.workers.join_next().await {
            log_join_error(joined);
        }
        debug!(stats = ?self.stats(), "Worker pool stopped");
    }

    /// Close intake and wait for workers, bounded by `ctx`
    ///
    /// When `ctx` ends first, workers get the shutdown grace period to observe
    /// it; any still running after that are aborted. No worker outlives this call.
    pub async fn await_completion(&mut self, ctx: &BatchContext) {
        self.close();

        loop {
            tokio::select! {
                biased;
                joined = self.workers.join_next() => match joined {
                    Some(joined) => log_join_error(joined),
                    None => return,
                },
                _ = ctx.done() => break,
            }
        }

        let workers = &mut self.workers;
        let drained = tokio::time::timeout(self.shutdown_grace, async {
            while let Some(joined) = workers.join_next().await {
                log_join_error(joined);
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = self.workers.len(),
                grace_ms = self.shutdown_grace.as_millis() as u64,
                "Workers still running after grace period, aborting"
            );
            self.workers.abort_all();
            while self.workers.join_next().await.is_some() {}
        }
    }
}

async fn run_worker<T: PoolTask, H: TaskHandler<T>>(
    worker_id: usize,
    handler: Arc<H>,
    tasks: Arc<tokio::sync::Mutex<mpsc::Receiver<T>>>,
    results: mpsc::UnboundedSender<H::Output>,
    stats: Arc<StatsCollector>,
    ctx: BatchContext,
) {
    debug!(worker = worker_id, "Worker started");

    loop {
        let next = tasks.lock().await.recv().await;
        let Some(task) = next else { break };

        let task_id = task.id().to_string();
        let outcome = match std::panic::AssertUnwindSafe(handler.handle(task, &ctx))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(
                    worker = worker_id,
                    task = %task_id,
                    panic = %message,
                    "Task panicked"
                );
                stats.panicked.fetch_add(1, Ordering::SeqCst);
                handler.on_panic(&task_id, &message)
            }
        };

        let processed = stats.record(&task_id, outcome.failure());
        if processed % PROGRESS_LOG_EVERY == 0 {
            debug!(processed = processed, "Worker pool progress");
        }

        if results.send(outcome).is_err() {
            debug!(worker = worker_id, "Result receiver dropped");
        }
    }

    debug!(worker = worker_id, "Worker exiting");
}

fn log_join_error(joined: Result<(), tokio::task::JoinError>) {
    if let Err(err) = joined {
        if !err.is_cancelled() {
            error!(error = %err, "Worker task failed");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
