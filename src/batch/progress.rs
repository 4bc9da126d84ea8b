//! Progress tracking for a running batch
//!
//! Counters are updated by workers as items resolve. A progress line is logged
//! whenever completion crosses another percentage step or the update interval
//! has elapsed since the last line.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::info;

const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_PERCENTAGE_STEP: f64 = 10.0;

/// Snapshot of batch progress
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    /// Items in the batch
    pub total: usize,
    /// Items resolved so far
    pub processed: usize,
    /// Resolved successfully
    pub successful: usize,
    /// Resolved with an error
    pub failed: usize,
    /// Items per second since the batch started
    pub rate: f64,
}

impl ProgressSnapshot {
    /// Completion percentage (0.0 to 100.0)
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.processed as f64 * 100.0 / self.total as f64
        }
    }

    /// Estimated time to completion at the current rate
    pub fn eta(&self) -> Option<Duration> {
        if self.rate <= 0.0 || self.processed >= self.total {
            return None;
        }
        let remaining = (self.total - self.processed) as f64;
        Some(Duration::from_secs_f64(remaining / self.rate))
    }
}

#[derive(Debug)]
struct EmitState {
    last_update: Instant,
    last_reported_percentage: f64,
}

/// Shared progress counters for one batch
#[derive(Debug)]
pub struct BatchProgress {
    total: usize,
    processed: AtomicUsize,
    successful: AtomicUsize,
    failed: AtomicUsize,
    start_time: Instant,
    update_interval: Duration,
    percentage_step: f64,
    emit: Mutex<EmitState>,
}

impl BatchProgress {
    /// Track a batch of `total` items with default cadence
    pub fn new(total: usize) -> Self {
        Self::with_cadence(total, DEFAULT_UPDATE_INTERVAL, DEFAULT_PERCENTAGE_STEP)
    }

    /// Track a batch with a custom update interval and percentage step
    pub fn with_cadence(total: usize, update_interval: Duration, percentage_step: f64) -> Self {
        let now = Instant::now();
        Self {
            total,
            processed: AtomicUsize::new(0),
            successful: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            start_time: now,
            update_interval,
            percentage_step,
            emit: Mutex::new(EmitState {
                last_update: now,
                last_reported_percentage: 0.0,
            }),
        }
    }

    /// Count one resolved item; returns whether a progress line was logged
    pub fn record(&self, success: bool) -> bool {
        if success {
            self.successful.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
        self.processed.fetch_add(1, Ordering::SeqCst);

        let snapshot = self.snapshot();
        let mut emit = self.emit.lock().unwrap_or_else(|p| p.into_inner());

        let percentage = snapshot.percentage();
        let step_crossed = percentage - emit.last_reported_percentage >= self.percentage_step
            || snapshot.processed >= self.total;
        let interval_elapsed = emit.last_update.elapsed() >= self.update_interval;

        if !(step_crossed || interval_elapsed) || emit.last_reported_percentage >= 100.0 {
            return false;
        }

        emit.last_update = Instant::now();
        emit.last_reported_percentage = percentage;

        info!(
            processed = snapshot.processed,
            total = snapshot.total,
            successful = snapshot.successful,
            failed = snapshot.failed,
            percentage = %format!("{:.1}", percentage),
            rate = %format!("{:.2}/s", snapshot.rate),
            eta_secs = snapshot.eta().map(|d| d.as_secs()),
            "Batch progress"
        );
        true
    }

    /// Current counters
    pub fn snapshot(&self) -> ProgressSnapshot {
        let processed = self.processed.load(Ordering::SeqCst);
        let elapsed = self.start_time.elapsed().as_secs_f64();
        ProgressSnapshot {
            total: self.total,
            processed,
            successful: self.successful.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            rate: if elapsed > 0.0 {
                processed as f64 / elapsed
            } else {
                0.0
            },
        }
    }
}
