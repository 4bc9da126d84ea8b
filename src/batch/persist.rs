//! Buffered persistence of fetched records
//!
//! Workers push successful records; every `batch_size` records the pushing
//! worker flushes them to the store. Whatever remains is flushed once the
//! batch ends. Failed flushes are remembered per id so the report can attach
//! a `PersistFailed` warning without touching the fetch outcome.

use crate::batch::context::BatchContext;
use crate::metrics::record_persist_flush;
use crate::store::RecordStore;
use crate::Record;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Record buffer in front of a [`RecordStore`]
pub struct PersistBuffer {
    store: Arc<dyn RecordStore>,
    batch_size: usize,
    pending: Mutex<Vec<Record>>,
    failures: Mutex<BTreeMap<String, String>>,
}

impl PersistBuffer {
    /// Create a buffer flushing every `batch_size` records
    pub fn new(store: Arc<dyn RecordStore>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
            pending: Mutex::new(Vec::new()),
            failures: Mutex::new(BTreeMap::new()),
        }
    }

    /// Records waiting for a flush
    pub fn pending_len(&self) -> usize {
        self.lock_pending().len()
    }

    /// Buffer a record, flushing if the buffer is full
    ///
    /// The flush is raced against `ctx`; records of a flush interrupted by
    /// the end of the batch go back into the buffer for the final flush.
    pub async fn push(&self, record: Record, ctx: &BatchContext) {
        let ready = {
            let mut pending = self.lock_pending();
            pending.push(record);
            if pending.len() >= self.batch_size {
                Some(std::mem::take(&mut *pending))
            } else {
                None
            }
        };

        let Some(batch) = ready else { return };

        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = ctx.done() => None,
            result = self.store.persist_many(&batch) => Some(result),
        };

        match outcome {
            Some(result) => self.settle(&batch, result, started.elapsed()),
            None => {
                debug!(records = batch.len(), "Flush interrupted, requeueing");
                self.lock_pending().extend(batch);
            }
        }
    }

    /// Flush everything still buffered, bounded by `timeout`
    pub async fn flush_remaining(&self, timeout: Duration) {
        let remaining = std::mem::take(&mut *self.lock_pending());
        if remaining.is_empty() {
            return;
        }

        for chunk in remaining.chunks(self.batch_size) {
            let started = Instant::now();
            let result = match tokio::time::timeout(timeout, self.store.persist_many(chunk)).await
            {
                Ok(result) => result,
                Err(_) => Err(crate::store::StoreError::Unavailable(format!(
                    "persist timed out after {}s",
                    timeout.as_secs()
                ))),
            };
            self.settle(chunk, result, started.elapsed());
        }
    }

    /// Ids whose records could not be persisted, with the store's message
    pub fn failures(&self) -> BTreeMap<String, String> {
        self.failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn settle(
        &self,
        batch: &[Record],
        result: Result<(), crate::store::StoreError>,
        elapsed: Duration,
    ) {
        record_persist_flush(batch.len(), result.is_ok(), elapsed);

        match result {
            Ok(()) => {
                debug!(records = batch.len(), "Records persisted");
                // A later successful flush of the same id clears an earlier failure.
                let mut failures = self.failures.lock().unwrap_or_else(|p| p.into_inner());
                for record in batch {
                    failures.remove(&record.id);
                }
            }
            Err(err) => {
                warn!(records = batch.len(), error = %err, "Failed to persist records");
                let message = format!("persist failed: {err}");
                let mut failures = self.failures.lock().unwrap_or_else(|p| p.into_inner());
                for record in batch {
                    failures.insert(record.id.clone(), message.clone());
                }
            }
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Vec<Record>> {
        self.pending.lock().unwrap_or_else(|p| p.into_inner())
    }
}
