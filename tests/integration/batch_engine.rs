//! End-to-end batch runs against scripted collaborators

use super::support::{ids, not_found, transient, ScriptedFetcher, Step};
use batch_fetch::batch::{BatchError, BatchExecutor, EngineConfig, ItemStatus, RateLimiter};
use batch_fetch::store::memory::MemoryRecordStore;
use batch_fetch::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn executor(fetcher: Arc<ScriptedFetcher>, store: Arc<MemoryRecordStore>) -> BatchExecutor {
    BatchExecutor::new(fetcher, store).with_rate_limiter(RateLimiter::new(1000, Duration::from_secs(1)))
}

#[tokio::test]
async fn test_all_items_succeed() {
    let fetcher = Arc::new(ScriptedFetcher::succeeding());
    let store = Arc::new(MemoryRecordStore::new());

    let report = executor(fetcher.clone(), store.clone())
        .run_batch(&ids(12), 3, None)
        .await
        .unwrap();

    assert_eq!(report.total, 12);
    assert_eq!(report.successful, 12);
    assert_eq!(report.failed, 0);
    assert!(report.errors.is_empty());
    assert!(report.validate().is_ok());
    assert_eq!(fetcher.call_count(), 12);
    assert_eq!(store.ids(), ids(12));
}

#[tokio::test]
async fn test_results_sorted_regardless_of_input_order() {
    let fetcher = Arc::new(ScriptedFetcher::succeeding());
    let store = Arc::new(MemoryRecordStore::new());

    let report = executor(fetcher, store)
        .run_batch(&["zoe", "Mallory", "alice", "ZOE", "  bob"], 2, None)
        .await
        .unwrap();

    let order: Vec<&str> = report.results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(order, vec!["alice", "bob", "mallory", "zoe"]);
}

#[tokio::test]
async fn test_empty_input_is_rejected() {
    let fetcher = Arc::new(ScriptedFetcher::succeeding());
    let store = Arc::new(MemoryRecordStore::new());
    let empty: Vec<String> = Vec::new();

    let err = executor(fetcher.clone(), store)
        .run_batch(&empty, 5, None)
        .await
        .unwrap_err();

    assert!(matches!(err, BatchError::InvalidInput(_)));
    assert_eq!(fetcher.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_partial_failure() {
    let fetcher = Arc::new(
        ScriptedFetcher::succeeding().script("user02", vec![Step::Fail(transient("HTTP 503")); 5]),
    );
    let store = Arc::new(MemoryRecordStore::new());

    let report = executor(fetcher.clone(), store.clone())
        .run_batch(&ids(5), 5, None)
        .await
        .unwrap();

    assert_eq!(report.successful, 4);
    assert_eq!(report.failed, 1);
    assert_eq!(fetcher.calls_for("user02"), 5);

    let failed = report.result_for("user02").unwrap();
    assert_eq!(failed.status, ItemStatus::Error);
    assert_eq!(failed.error_kind, Some(ErrorKind::Transient));
    assert!(failed.record.is_none());

    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].starts_with("user02: transient:"));
    assert_eq!(store.len(), 4);
    assert!(store.get("user02").is_none());
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let fetcher = Arc::new(ScriptedFetcher::succeeding().script("ghost", vec![Step::Fail(not_found("ghost"))]));
    let store = Arc::new(MemoryRecordStore::new());

    let report = executor(fetcher.clone(), store)
        .run_batch(&["ghost", "alice"], 2, None)
        .await
        .unwrap();

    assert_eq!(fetcher.calls_for("ghost"), 1);
    assert_eq!(
        report.result_for("ghost").unwrap().error_kind,
        Some(ErrorKind::NotFound)
    );
    assert!(report.result_for("alice").unwrap().is_success());
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_recover() {
    let fetcher = Arc::new(ScriptedFetcher::succeeding().script(
        "flaky",
        vec![
            Step::Fail(transient("connection reset")),
            Step::Fail(batch_fetch::FetchError::RateLimited("HTTP 429".to_string())),
        ],
    ));
    let store = Arc::new(MemoryRecordStore::new());

    let started = Instant::now();
    let report = executor(fetcher.clone(), store.clone())
        .run_batch(&["flaky"], 1, None)
        .await
        .unwrap();

    assert_eq!(report.successful, 1);
    assert_eq!(fetcher.calls_for("flaky"), 3);
    // 500ms + 1000ms of backoff
    assert!(started.elapsed() >= Duration::from_millis(1500));
    assert!(store.get("flaky").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_resolves_every_item() {
    let fetcher = Arc::new(ScriptedFetcher::new(Step::Hang));
    let store = Arc::new(MemoryRecordStore::new());

    let started = Instant::now();
    let report = executor(fetcher, store.clone())
        .run_batch(&ids(10), 5, Some(Duration::from_secs(1)))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_millis(1500), "took {elapsed:?}");

    assert_eq!(report.total, 10);
    assert_eq!(report.failed, 10);
    assert!(report
        .results
        .iter()
        .all(|r| r.error_kind == Some(ErrorKind::Timeout)));
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_zero_timeout_means_default() {
    let fetcher = Arc::new(ScriptedFetcher::new(Step::Hang));
    let store = Arc::new(MemoryRecordStore::new());

    let started = Instant::now();
    let report = BatchExecutor::new(fetcher, store)
        .with_rate_limiter(RateLimiter::new(1, Duration::from_secs(1)))
        .run_batch(&["alice"], 1, Some(Duration::ZERO))
        .await
        .unwrap();

    assert_eq!(started.elapsed().as_secs(), 300);
    assert_eq!(
        report.result_for("alice").unwrap().error_kind,
        Some(ErrorKind::Timeout)
    );
}

#[tokio::test(start_paused = true)]
async fn test_parent_cancellation_reports_cancelled() {
    let fetcher = Arc::new(ScriptedFetcher::new(Step::Hang));
    let store = Arc::new(MemoryRecordStore::new());
    let parent = CancellationToken::new();

    tokio::spawn({
        let parent = parent.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            parent.cancel();
        }
    });

    let started = Instant::now();
    let report = executor(fetcher, store)
        .run_batch_cancellable(&ids(8), 4, Some(Duration::from_secs(60)), &parent)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(report.failed, 8);
    assert!(report
        .results
        .iter()
        .all(|r| r.error_kind == Some(ErrorKind::Cancelled)));
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_is_bounded() {
    let fetcher = Arc::new(ScriptedFetcher::new(Step::Delay(Duration::from_millis(50))));
    let store = Arc::new(MemoryRecordStore::new());

    let report = executor(fetcher.clone(), store)
        .run_batch(&ids(50), 5, None)
        .await
        .unwrap();

    assert_eq!(report.successful, 50);
    assert_eq!(fetcher.call_count(), 50);
    assert!(fetcher.max_active() <= 5, "peak {}", fetcher.max_active());
    assert!(fetcher.max_active() >= 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_is_clamped() {
    let fetcher = Arc::new(ScriptedFetcher::new(Step::Delay(Duration::from_millis(50))));
    let store = Arc::new(MemoryRecordStore::new());

    let report = executor(fetcher.clone(), store)
        .run_batch(&ids(60), 500, None)
        .await
        .unwrap();

    assert_eq!(report.successful, 60);
    assert!(fetcher.max_active() <= 20);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_spans_all_workers() {
    let fetcher = Arc::new(ScriptedFetcher::succeeding());
    let store = Arc::new(MemoryRecordStore::new());
    let executor = BatchExecutor::new(fetcher.clone(), store)
        .with_rate_limiter(RateLimiter::new(5, Duration::from_secs(1)));

    let started = Instant::now();
    let report = executor.run_batch(&ids(20), 10, None).await.unwrap();

    assert_eq!(report.successful, 20);
    // A burst of 5, then one token every 200ms
    assert!(started.elapsed() >= Duration::from_millis(2900));

    let times = fetcher.call_times();
    for window in times.windows(11) {
        let span = window[10] - window[0];
        assert!(span >= Duration::from_secs(1), "11 calls within {span:?}");
    }
}

#[tokio::test]
async fn test_persist_failure_keeps_success() {
    let fetcher = Arc::new(ScriptedFetcher::succeeding());
    let store = Arc::new(MemoryRecordStore::new());
    store.set_failing(true);

    let report = executor(fetcher, store.clone())
        .run_batch(&ids(3), 3, None)
        .await
        .unwrap();

    assert_eq!(report.successful, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(report.persist_failures, 3);
    for result in &report.results {
        assert_eq!(result.status, ItemStatus::Success);
        assert_eq!(result.error_kind, Some(ErrorKind::PersistFailed));
        assert!(result.record.is_some());
    }
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_records_flushed_in_groups() {
    let fetcher = Arc::new(ScriptedFetcher::succeeding());
    let store = Arc::new(MemoryRecordStore::new());

    executor(fetcher, store.clone())
        .run_batch(&ids(25), 4, None)
        .await
        .unwrap();

    let calls = store.calls();
    assert_eq!(calls.iter().map(Vec::len).sum::<usize>(), 25);
    assert!(calls.iter().all(|batch| batch.len() <= 10));
    assert_eq!(store.len(), 25);
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let fetcher = Arc::new(ScriptedFetcher::succeeding());
    let store = Arc::new(MemoryRecordStore::new());
    let executor = executor(fetcher.clone(), store.clone());

    let first = executor.run_batch(&ids(7), 3, None).await.unwrap();
    let second = executor.run_batch(&ids(7), 3, None).await.unwrap();

    assert_eq!(first.successful, 7);
    assert_eq!(second.successful, 7);
    assert_eq!(fetcher.call_count(), 14);
    assert_eq!(store.len(), 7);
}

#[tokio::test]
async fn test_worker_panic_is_contained() {
    let fetcher = Arc::new(ScriptedFetcher::succeeding().script("boom", vec![Step::Panic]));
    let store = Arc::new(MemoryRecordStore::new());

    let report = executor(fetcher, store.clone())
        .run_batch(&["alice", "boom", "carol"], 2, None)
        .await
        .unwrap();

    assert_eq!(report.total, 3);
    assert_eq!(report.successful, 2);

    let boom = report.result_for("boom").unwrap();
    assert_eq!(boom.error_kind, Some(ErrorKind::Transient));
    assert!(boom.message.as_deref().unwrap().contains("panicked"));
    assert_eq!(store.ids(), vec!["alice", "carol"]);
}

#[tokio::test]
async fn test_error_detail_is_capped() {
    let mut fetcher = ScriptedFetcher::succeeding();
    for id in ids(6) {
        let err = not_found(&id);
        fetcher = fetcher.script(&id, vec![Step::Fail(err)]);
    }
    let store = Arc::new(MemoryRecordStore::new());

    let report = BatchExecutor::new(Arc::new(fetcher), store)
        .with_config(EngineConfig {
            max_error_detail: 2,
            ..EngineConfig::default()
        })
        .with_rate_limiter(RateLimiter::new(1000, Duration::from_secs(1)))
        .run_batch(&ids(6), 3, None)
        .await
        .unwrap();

    assert_eq!(report.failed, 6);
    assert_eq!(report.errors.len(), 2);
    assert!(report.errors[0].starts_with("user00: not_found:"));
}
