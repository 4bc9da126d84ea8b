//! Integration tests for logging and tracing

use super::support::{ids, ScriptedFetcher};
use batch_fetch::batch::{BatchExecutor, RateLimiter};
use batch_fetch::store::memory::MemoryRecordStore;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Collects formatted log output in memory
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[test]
fn test_env_filter_parsing() {
    let _filter = EnvFilter::new("batch_fetch=info");
    let _filter = EnvFilter::new("warn,batch_fetch::batch=debug");
    let _filter = EnvFilter::new("batch_fetch::fetcher=trace,batch_fetch=info");
}

#[tokio::test]
async fn test_batch_emits_structured_events() {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::new("batch_fetch=info"))
        .with_writer(logs.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let executor = BatchExecutor::new(
        Arc::new(ScriptedFetcher::succeeding()),
        Arc::new(MemoryRecordStore::new()),
    )
    .with_rate_limiter(RateLimiter::new(100, Duration::from_secs(1)));

    // Single-threaded runtime: every event lands on this thread's subscriber
    executor.run_batch(&ids(4), 2, None).await.unwrap();

    let output = logs.contents();
    assert!(output.contains("Batch started"), "{output}");
    assert!(output.contains("Batch completed"), "{output}");
    assert!(output.contains("Batch progress"), "{output}");

    let completed = output
        .lines()
        .find(|line| line.contains("Batch completed"))
        .unwrap();
    let event: serde_json::Value = serde_json::from_str(completed).unwrap();
    assert_eq!(event["fields"]["successful"], 4);
    assert_eq!(event["fields"]["failed"], 0);
    assert_eq!(event["level"], "INFO");
}

#[tokio::test]
async fn test_debug_events_filtered_at_info() {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("batch_fetch=info"))
        .with_writer(logs.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let executor = BatchExecutor::new(
        Arc::new(ScriptedFetcher::succeeding()),
        Arc::new(MemoryRecordStore::new()),
    )
    .with_rate_limiter(RateLimiter::new(100, Duration::from_secs(1)));
    executor.run_batch(&ids(2), 1, None).await.unwrap();

    let output = logs.contents();
    assert!(!output.contains("Records upserted"));
    assert!(!output.contains("DEBUG"));
}
