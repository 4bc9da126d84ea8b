//! Integration tests for retry with exponential backoff

use batch_fetch::batch::config::calculate_backoff;
use batch_fetch::batch::{with_retry, BatchContext, RetryPolicy};
use batch_fetch::fetcher::FetchError;
use batch_fetch::ErrorKind;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[test]
fn test_backoff_doubles_from_500ms() {
    let delays: Vec<u64> = (0..5).map(|a| calculate_backoff(a).as_millis() as u64).collect();
    assert_eq!(delays, vec![500, 1000, 2000, 4000, 8000]);
}

#[test]
fn test_backoff_saturates() {
    assert!(calculate_backoff(40) >= calculate_backoff(10));
}

#[tokio::test(start_paused = true)]
async fn test_backoff_schedule_is_followed() {
    let ctx = BatchContext::new();
    let policy = RetryPolicy::new(4, Duration::from_millis(100));
    let attempts = std::sync::Mutex::new(Vec::new());
    let started = Instant::now();

    let result: Result<(), FetchError> = with_retry(&ctx, &policy, |attempt| {
        attempts.lock().unwrap().push((attempt, started.elapsed()));
        async { Err(FetchError::Transient("HTTP 502".to_string())) }
    })
    .await;

    assert!(matches!(result, Err(FetchError::Transient(_))));

    let attempts = attempts.into_inner().unwrap();
    let numbers: Vec<u32> = attempts.iter().map(|(n, _)| *n).collect();
    assert_eq!(numbers, vec![0, 1, 2, 3]);

    // 100, 200, 400ms waits between attempts
    let offsets: Vec<u128> = attempts.iter().map(|(_, at)| at.as_millis()).collect();
    assert_eq!(offsets, vec![0, 100, 300, 700]);
}

#[tokio::test]
async fn test_not_found_short_circuits() {
    let ctx = BatchContext::new();
    let calls = AtomicU32::new(0);

    let result: Result<(), FetchError> = with_retry(&ctx, &RetryPolicy::default(), |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        async {
            Err(FetchError::NotFound {
                id: "ghost".to_string(),
                message: "user not found".to_string(),
            })
        }
    })
    .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(result.unwrap_err().kind(), ErrorKind::NotFound);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_other_error_reports_transient() {
    let ctx = BatchContext::new();
    let policy = RetryPolicy::new(2, Duration::from_millis(10));

    let result: Result<(), FetchError> = with_retry(&ctx, &policy, |_| async {
        Err(FetchError::Other("unexpected HTTP status 400".to_string()))
    })
    .await;

    assert_eq!(result.unwrap_err().kind(), ErrorKind::Transient);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_retries_then_succeeds() {
    let ctx = BatchContext::new();
    let calls = AtomicU32::new(0);

    let result = with_retry(&ctx, &RetryPolicy::default(), |attempt| {
        calls.fetch_add(1, Ordering::SeqCst);
        async move {
            if attempt < 2 {
                Err(FetchError::RateLimited("HTTP 429".to_string()))
            } else {
                Ok(attempt)
            }
        }
    })
    .await;

    assert_eq!(result, Ok(2));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_cuts_backoff_short() {
    let ctx = BatchContext::with_timeout(Duration::from_millis(700));
    let calls = AtomicU32::new(0);
    let started = Instant::now();

    let result: Result<(), FetchError> = with_retry(&ctx, &RetryPolicy::default(), |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err(FetchError::Transient("HTTP 500".to_string())) }
    })
    .await;

    // Attempt at 0ms, backoff to 500ms, attempt, backoff cut at 700ms
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(result, Err(FetchError::Timeout));
    assert!(started.elapsed() < Duration::from_millis(800));
}
