//! Test doubles shared by the integration tests

use async_trait::async_trait;
use batch_fetch::fetcher::{FetchError, FetchResult, RecordFetcher};
use batch_fetch::Record;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// What one fetch call does
#[derive(Debug, Clone)]
pub enum Step {
    /// Return a record immediately
    Ok,
    /// Return a record after a delay
    Delay(Duration),
    /// Return an error
    Fail(FetchError),
    /// Never complete
    Hang,
    /// Panic inside the worker
    Panic,
}

/// Fetcher that plays back a script per identifier
///
/// Identifiers without a script (or whose script ran out) use the default
/// step. Every call is logged with its start time, and the peak number of
/// calls in flight is tracked.
pub struct ScriptedFetcher {
    default: Step,
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<Vec<(String, Instant)>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new(default: Step) -> Self {
        Self {
            default,
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(Step::Ok)
    }

    /// Script the calls for one identifier, in order
    pub fn script(self, id: &str, steps: Vec<Step>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(id.to_string(), steps.into());
        self
    }

    /// Total calls made
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Calls made for one identifier
    pub fn calls_for(&self, id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(called, _)| called == id)
            .count()
    }

    /// Start times of every call, in call order
    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(_, at)| *at).collect()
    }

    /// Peak number of concurrent calls
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn next_step(&self, id: &str) -> Step {
        self.scripts
            .lock()
            .unwrap()
            .get_mut(id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.default.clone())
    }
}

/// Decrements the in-flight counter even when the call is dropped mid-flight
struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RecordFetcher for ScriptedFetcher {
    async fn fetch(&self, id: &str) -> FetchResult<Record> {
        self.calls
            .lock()
            .unwrap()
            .push((id.to_string(), Instant::now()));

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        match self.next_step(id) {
            Step::Ok => Ok(record(id)),
            Step::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(record(id))
            }
            Step::Fail(err) => Err(err),
            Step::Hang => std::future::pending().await,
            Step::Panic => panic!("scripted panic for {id}"),
        }
    }
}

pub fn record(id: &str) -> Record {
    Record::new(id, json!({ "username": id }))
}

pub fn transient(message: &str) -> FetchError {
    FetchError::Transient(message.to_string())
}

pub fn not_found(id: &str) -> FetchError {
    FetchError::NotFound {
        id: id.to_string(),
        message: "HTTP 404".to_string(),
    }
}

/// `count` distinct identifiers: user00, user01, ...
pub fn ids(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("user{i:02}")).collect()
}
