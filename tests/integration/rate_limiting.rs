//! Integration tests for the shared token bucket

use batch_fetch::batch::{BatchContext, RateLimitError, RateLimiter};
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test]
async fn test_rate_limiter_starts_full() {
    let limiter = RateLimiter::per_second(10);
    assert_eq!(limiter.capacity(), 10);
    assert_eq!(limiter.refill_interval(), Duration::from_secs(1));
    assert_eq!(limiter.available_tokens(), 10);
}

#[tokio::test]
async fn test_zero_rate_is_clamped() {
    let limiter = RateLimiter::per_second(0);
    assert_eq!(limiter.capacity(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_burst_then_steady_rate() {
    let limiter = RateLimiter::new(4, Duration::from_secs(1));
    let ctx = BatchContext::new();
    let started = Instant::now();

    for _ in 0..4 {
        limiter.acquire(&ctx).await.unwrap();
    }
    assert!(started.elapsed() < Duration::from_millis(10));

    // Four more tokens arrive at 250ms intervals
    for _ in 0..4 {
        limiter.acquire(&ctx).await.unwrap();
    }
    assert!(started.elapsed() >= Duration::from_millis(1000));
    assert!(started.elapsed() < Duration::from_millis(1100));
}

#[tokio::test(start_paused = true)]
async fn test_shared_across_tasks() {
    let limiter = RateLimiter::new(5, Duration::from_secs(1));
    let ctx = BatchContext::new();
    let started = Instant::now();

    let mut handles = Vec::new();
    for _ in 0..5 {
        let limiter = limiter.clone();
        let ctx = ctx.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..3 {
                limiter.acquire(&ctx).await.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // 15 tokens: 5 up front, 10 refilled at 200ms each
    assert!(started.elapsed() >= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_waiting_ends_with_batch_deadline() {
    let limiter = RateLimiter::new(1, Duration::from_secs(60));
    let ctx = BatchContext::with_timeout(Duration::from_secs(2));

    limiter.acquire(&ctx).await.unwrap();
    let err = limiter.acquire(&ctx).await.unwrap_err();

    assert_eq!(err, RateLimitError::Timeout);
    assert_eq!(err.kind(), batch_fetch::ErrorKind::Timeout);
}

#[tokio::test]
async fn test_waiting_ends_on_cancel() {
    let limiter = RateLimiter::new(1, Duration::from_secs(60));
    let ctx = BatchContext::new();
    limiter.acquire(&ctx).await.unwrap();

    let waiter = tokio::spawn({
        let limiter = limiter.clone();
        let ctx = ctx.clone();
        async move { limiter.acquire(&ctx).await }
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    ctx.cancel();

    let result = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result, Err(RateLimitError::Cancelled));
}
