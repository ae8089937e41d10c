use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

use ratekeeper::config::{SlidingWindowConfig, TokenBucketConfig};
use ratekeeper::ratelimit::{ManualClock, RateLimiter, SlidingWindow, TokenBucket};
use ratekeeper::{CancellationToken, RatekeeperError};

fn manual_bucket(capacity: u64, refill: u64, period: Duration) -> (Arc<TokenBucket>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let bucket = TokenBucket::with_clock(
        TokenBucketConfig::new(capacity, refill, period).unwrap(),
        clock.clone(),
    )
    .unwrap();
    (Arc::new(bucket), clock)
}

fn manual_window(limit: u64, window: Duration) -> (Arc<SlidingWindow>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let limiter = SlidingWindow::with_clock(
        SlidingWindowConfig::new(limit, window).unwrap(),
        clock.clone(),
    )
    .unwrap();
    (Arc::new(limiter), clock)
}

#[test]
fn test_drained_bucket_refills_one_token_in_six_seconds() {
    let (bucket, clock) = manual_bucket(10, 10, Duration::from_secs(60));
    while bucket.try_acquire_one() {}

    assert!(!bucket.try_acquire(1).unwrap());
    clock.advance(Duration::from_secs(6));
    assert!(bucket.try_acquire(1).unwrap());
}

#[test]
fn test_sliding_window_smooths_window_boundary() {
    let (limiter, clock) = manual_window(100, Duration::from_secs(60));
    let first = (0..80).filter(|_| limiter.try_acquire_one()).count();
    assert_eq!(first, 80);

    clock.advance(Duration::from_secs(60));
    let second = (0..100).filter(|_| limiter.try_acquire_one()).count();
    assert!(second < 100);
    assert_eq!(second, 20);
}

#[test]
fn test_thousand_concurrent_callers_against_full_bucket() {
    let (bucket, _clock) = manual_bucket(100, 1, Duration::from_secs(60));
    let barrier = Arc::new(Barrier::new(1000));

    let handles: Vec<_> = (0..1000)
        .map(|_| {
            let bucket = Arc::clone(&bucket);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                bucket.try_acquire(1).unwrap()
            })
        })
        .collect();

    let granted = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|granted| *granted)
        .count();
    assert_eq!(granted, 100);
    assert_eq!(bucket.info().remaining, 0);
}

#[test]
fn test_concurrent_sliding_window_never_over_grants() {
    let (limiter, _clock) = manual_window(250, Duration::from_secs(60));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let limiter = Arc::clone(&limiter);
            std::thread::spawn(move || (0..50).filter(|_| limiter.try_acquire_one()).count())
        })
        .collect();

    let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(granted, 250);
}

#[test]
fn test_timeout_is_bounded() {
    let bucket: Arc<dyn RateLimiter> = Arc::new(TokenBucket::new(1, 1, Duration::from_secs(30)).unwrap());
    let window: Arc<dyn RateLimiter> = Arc::new(SlidingWindow::new(1, Duration::from_secs(30)).unwrap());
    let limiters = vec![bucket, window];
    let cancel = CancellationToken::new();

    for limiter in limiters {
        assert!(limiter.try_acquire_one());
        assert!(!limiter.try_acquire_for(1, Duration::ZERO, &cancel).unwrap());

        let start = Instant::now();
        assert!(!limiter
            .try_acquire_for(1, Duration::from_millis(40), &cancel)
            .unwrap());
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}

#[test]
fn test_info_after_denial() {
    let bucket: Arc<dyn RateLimiter> = manual_bucket(10, 1, Duration::from_secs(1)).0;
    let window: Arc<dyn RateLimiter> = manual_window(10, Duration::from_secs(1)).0;
    let limiters = vec![bucket, window];

    for limiter in limiters {
        assert!(limiter.try_acquire(7).unwrap());
        assert!(!limiter.try_acquire(4).unwrap());
        assert!(limiter.info().remaining < 4);
        assert_eq!(limiter.info().remaining, 3);
    }
}

#[test]
fn test_idle_sliding_window_reports_full_headroom() {
    let (limiter, clock) = manual_window(50, Duration::from_secs(10));
    assert!(limiter.try_acquire(50).unwrap());
    assert_eq!(limiter.info().remaining, 0);

    clock.advance(Duration::from_secs(21));
    let info = limiter.info();
    assert_eq!(info.remaining, info.limit);
}

#[test]
fn test_invalid_arguments_leave_state_untouched() {
    let bucket: Arc<dyn RateLimiter> = manual_bucket(5, 1, Duration::from_secs(1)).0;
    let window: Arc<dyn RateLimiter> = manual_window(5, Duration::from_secs(1)).0;
    let limiters = vec![bucket, window];
    let cancel = CancellationToken::new();

    for limiter in limiters {
        assert!(matches!(
            limiter.try_acquire(0),
            Err(RatekeeperError::InvalidArgument(_))
        ));
        assert!(matches!(
            limiter.acquire(0, &cancel),
            Err(RatekeeperError::InvalidArgument(_))
        ));
        assert!(limiter.acquire(6, &cancel).unwrap_err().is_invalid_argument());
        assert_eq!(limiter.info().remaining, 5);
    }
}

#[test]
fn test_waiters_race_for_refilled_tokens() {
    let bucket = Arc::new(TokenBucket::new(2, 1, Duration::from_millis(200)).unwrap());
    let cancel = CancellationToken::new();
    let barrier = Arc::new(Barrier::new(5));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let bucket = Arc::clone(&bucket);
            let cancel = cancel.clone();
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                bucket
                    .try_acquire_for(1, Duration::from_millis(300), &cancel)
                    .unwrap()
            })
        })
        .collect();

    // Drain right before releasing the waiters so every deadline starts together
    assert!(bucket.try_acquire(2).unwrap());
    barrier.wait();

    let granted = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|granted| *granted)
        .count();
    // One token accrues at 200ms; the second lands 100ms past every deadline
    assert_eq!(granted, 1);
}

#[tokio::test]
async fn test_blocking_acquire_from_tokio_tasks() {
    let limiter: Arc<dyn RateLimiter> =
        Arc::new(TokenBucket::new(2, 20, Duration::from_secs(1)).unwrap());
    let cancel = CancellationToken::new();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let limiter = Arc::clone(&limiter);
        let cancel = cancel.clone();
        handles.push(tokio::task::spawn_blocking(move || limiter.acquire(1, &cancel)));
    }

    for handle in handles {
        handle.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_cancel_from_async_context() {
    let limiter: Arc<dyn RateLimiter> = Arc::new(SlidingWindow::new(1, Duration::from_secs(60)).unwrap());
    assert!(limiter.try_acquire_one());
    let cancel = CancellationToken::new();

    let waiter = {
        let limiter = Arc::clone(&limiter);
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || limiter.acquire(1, &cancel))
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(RatekeeperError::Cancelled)));
}
