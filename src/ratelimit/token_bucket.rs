//! Token bucket limiter.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::cancel::CancellationToken;
use crate::config::TokenBucketConfig;
use crate::error::{RatekeeperError, Result};

use super::clock::{instant_after, Clock, MonotonicClock};
use super::info::RateLimitInfo;
use super::limiter::{validate_permits, validate_satisfiable, RateLimiter};

/// Shortest condvar wait, so rounding never turns the wait loop into a spin.
const MIN_WAIT: Duration = Duration::from_micros(50);

/// A continuously refilling bucket of permits.
///
/// The bucket starts full. It allows bursts of up to `capacity` permits and
/// refills at `refill_amount` per `refill_period` on average. Tokens are
/// tracked fractionally so partial refill progress is never lost, but only
/// whole permits are granted or reported.
///
/// Blocked callers park on a condition variable. Any refill that leaves at
/// least one token wakes all of them; each waiter re-validates, so only those
/// that still find enough tokens proceed.
#[derive(Debug)]
pub struct TokenBucket {
    config: TokenBucketConfig,
    clock: Arc<dyn Clock>,
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<BucketState>,
    tokens_available: Condvar,
}

#[derive(Debug)]
struct BucketState {
    /// Always within `[0, capacity]`
    available_tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a bucket on the process monotonic clock.
    pub fn new(capacity: u64, refill_amount: u64, refill_period: Duration) -> Result<Self> {
        Self::with_clock(
            TokenBucketConfig::new(capacity, refill_amount, refill_period)?,
            Arc::new(MonotonicClock),
        )
    }

    /// Create a bucket allowing `requests_per_second` on average with a 10% burst.
    pub fn per_second(requests_per_second: u64) -> Result<Self> {
        Self::new(
            (requests_per_second / 10).max(1),
            requests_per_second,
            Duration::from_secs(1),
        )
    }

    /// Create a bucket from a configuration and an explicit clock.
    pub fn with_clock(config: TokenBucketConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let now = clock.now();
        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BucketState {
                    available_tokens: config.capacity as f64,
                    last_refill: now,
                }),
                tokens_available: Condvar::new(),
            }),
            config,
            clock,
        })
    }

    /// The configuration this bucket was built with.
    pub fn config(&self) -> &TokenBucketConfig {
        &self.config
    }

    /// Whole tokens currently in the bucket.
    pub fn available_tokens(&self) -> u64 {
        let mut state = self.shared.state.lock();
        self.refill(&mut state);
        state.available_tokens.floor() as u64
    }

    /// Credit tokens for the time elapsed since the last refill.
    ///
    /// Must be called with the state lock held.
    fn refill(&self, state: &mut BucketState) {
        let now = self.clock.now();
        let elapsed = now.saturating_duration_since(state.last_refill);
        if elapsed.is_zero() {
            return;
        }

        let added = elapsed.as_secs_f64() / self.config.refill_period.as_secs_f64()
            * self.config.refill_amount as f64;
        state.available_tokens = (state.available_tokens + added).min(self.config.capacity as f64);
        state.last_refill = now;

        if state.available_tokens >= 1.0 {
            self.shared.tokens_available.notify_all();
        }
    }

    /// Time until the bucket will hold `permits` tokens, assuming no other consumer.
    fn time_until_available(&self, state: &BucketState, permits: u64) -> Duration {
        let needed = permits as f64 - state.available_tokens;
        if needed <= 0.0 {
            return Duration::ZERO;
        }
        let secs = needed / self.config.refill_amount as f64
            * self.config.refill_period.as_secs_f64();
        Duration::try_from_secs_f64(secs)
            .unwrap_or(Duration::MAX)
            .max(MIN_WAIT)
    }

    /// Wait for `permits` until granted, cancelled, or past `deadline`.
    fn acquire_until(
        &self,
        permits: u64,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        validate_satisfiable(permits, self.config.capacity)?;

        let shared = Arc::clone(&self.shared);
        let _registration = cancel.on_cancel(move || {
            // Taking the lock orders this wake after the waiter has parked.
            let _state = shared.state.lock();
            shared.tokens_available.notify_all();
        });

        let mut state = self.shared.state.lock();
        loop {
            if cancel.is_cancelled() {
                debug!(permits = permits, "Token bucket acquisition cancelled");
                return Err(RatekeeperError::Cancelled);
            }

            self.refill(&mut state);
            if state.available_tokens >= permits as f64 {
                state.available_tokens -= permits as f64;
                trace!(
                    permits = permits,
                    available = state.available_tokens,
                    "Token bucket granted after wait"
                );
                return Ok(true);
            }

            let mut wait = self.time_until_available(&state, permits);
            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(self.clock.now());
                if remaining.is_zero() {
                    debug!(permits = permits, "Token bucket wait timed out");
                    return Ok(false);
                }
                wait = wait.min(remaining);
            }

            debug!(
                permits = permits,
                available = state.available_tokens,
                wait_us = wait.as_micros() as u64,
                "Token bucket waiting for refill"
            );
            self.shared.tokens_available.wait_for(&mut state, wait);
        }
    }
}

impl RateLimiter for TokenBucket {
    fn try_acquire(&self, permits: u64) -> Result<bool> {
        validate_permits(permits)?;

        let mut state = self.shared.state.lock();
        self.refill(&mut state);

        if state.available_tokens >= permits as f64 {
            state.available_tokens -= permits as f64;
            trace!(
                permits = permits,
                available = state.available_tokens,
                "Token bucket granted"
            );
            Ok(true)
        } else {
            trace!(
                permits = permits,
                available = state.available_tokens,
                "Token bucket denied"
            );
            Ok(false)
        }
    }

    fn acquire(&self, permits: u64, cancel: &CancellationToken) -> Result<()> {
        self.acquire_until(permits, None, cancel).map(|_| ())
    }

    fn try_acquire_for(
        &self,
        permits: u64,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        // A timeout too large to represent waits like `acquire`
        let deadline = self.clock.now().checked_add(timeout);
        self.acquire_until(permits, deadline, cancel)
    }

    fn info(&self) -> RateLimitInfo {
        let mut state = self.shared.state.lock();
        self.refill(&mut state);
        RateLimitInfo::new(
            state.available_tokens.floor() as u64,
            self.config.capacity,
            instant_after(state.last_refill, self.config.refill_period),
        )
    }

    fn limit(&self) -> u64 {
        self.config.capacity
    }
}
