//! Sliding window counter limiter.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::cancel::CancellationToken;
use crate::config::SlidingWindowConfig;
use crate::error::{RatekeeperError, Result};

use super::clock::{instant_after, Clock, MonotonicClock};
use super::info::RateLimitInfo;
use super::limiter::{validate_permits, validate_satisfiable, RateLimiter};

/// Extra slack added to decay-based wait estimates.
const WAIT_SLACK: Duration = Duration::from_millis(1);

/// Approximates a trailing window of `window` length with two fixed counters.
///
/// Time is cut into consecutive windows aligned to the limiter's creation
/// instant. The estimate of requests in the trailing window is
///
/// ```text
/// previous * (1 - position) + current
/// ```
///
/// where `position` is how far into the current window `now` lies, in
/// `[0, 1)`. The previous window fades out linearly instead of dropping to
/// zero at the boundary, which avoids the double burst a fixed window allows.
///
/// Headroom only comes back as time passes, so blocked callers sleep on an
/// estimate and re-check rather than waiting for a signal.
#[derive(Debug)]
pub struct SlidingWindow {
    config: SlidingWindowConfig,
    clock: Arc<dyn Clock>,
    origin: Instant,
    state: Mutex<WindowState>,
}

#[derive(Debug, Default)]
struct WindowState {
    /// Index of the current window counted from `origin`
    window_index: u64,
    previous_count: u64,
    current_count: u64,
}

impl SlidingWindow {
    /// Create a limiter on the process monotonic clock.
    pub fn new(limit: u64, window: Duration) -> Result<Self> {
        Self::with_clock(
            SlidingWindowConfig::new(limit, window)?,
            Arc::new(MonotonicClock),
        )
    }

    /// `limit` requests per second.
    pub fn per_second(limit: u64) -> Result<Self> {
        Self::new(limit, Duration::from_secs(1))
    }

    /// `limit` requests per minute.
    pub fn per_minute(limit: u64) -> Result<Self> {
        Self::new(limit, Duration::from_secs(60))
    }

    /// Create a limiter from a configuration and an explicit clock.
    pub fn with_clock(config: SlidingWindowConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let origin = clock.now();
        Ok(Self {
            config,
            clock,
            origin,
            state: Mutex::new(WindowState::default()),
        })
    }

    /// The configuration this limiter was built with.
    pub fn config(&self) -> &SlidingWindowConfig {
        &self.config
    }

    /// Whole requests currently counted against the trailing window.
    pub fn request_count(&self) -> u64 {
        let now = self.clock.now();
        let mut state = self.state.lock();
        self.slide(&mut state, now);
        self.weighted_count(&state, now).floor() as u64
    }

    fn window_nanos(&self) -> u128 {
        self.config.window.as_nanos()
    }

    fn window_index_at(&self, now: Instant) -> u64 {
        let index = now.saturating_duration_since(self.origin).as_nanos() / self.window_nanos();
        u64::try_from(index).unwrap_or(u64::MAX)
    }

    fn window_start(&self, index: u64) -> Instant {
        let offset = self.window_nanos().saturating_mul(u128::from(index));
        let offset = u64::try_from(offset)
            .map(Duration::from_nanos)
            .unwrap_or(Duration::MAX);
        instant_after(self.origin, offset)
    }

    fn window_end(&self, index: u64) -> Instant {
        instant_after(self.window_start(index), self.config.window)
    }

    /// Move the counters forward to the window containing `now`.
    fn slide(&self, state: &mut WindowState, now: Instant) {
        let index = self.window_index_at(now);
        if index <= state.window_index {
            return;
        }

        if index == state.window_index + 1 {
            state.previous_count = state.current_count;
        } else {
            if state.previous_count > 0 || state.current_count > 0 {
                debug!(
                    idle_windows = index - state.window_index,
                    "Sliding window idle, resetting counters"
                );
            }
            state.previous_count = 0;
        }
        state.current_count = 0;
        state.window_index = index;
    }

    /// Fraction of the current window that has elapsed, in `[0, 1)`.
    fn position(&self, state: &WindowState, now: Instant) -> f64 {
        let into_window = now.saturating_duration_since(self.window_start(state.window_index));
        (into_window.as_secs_f64() / self.config.window.as_secs_f64()).clamp(0.0, 1.0)
    }

    fn weighted_count(&self, state: &WindowState, now: Instant) -> f64 {
        let position = self.position(state, now);
        state.previous_count as f64 * (1.0 - position) + state.current_count as f64
    }

    /// How long until `permits` might fit, assuming no other consumer.
    fn estimate_wait(&self, state: &WindowState, now: Instant, permits: u64) -> Duration {
        let weighted = self.weighted_count(state, now);
        let excess = weighted + permits as f64 - self.config.limit as f64;
        if excess <= 0.0 {
            return Duration::ZERO;
        }

        let until_next_window = self
            .window_end(state.window_index)
            .saturating_duration_since(now);
        if state.previous_count == 0 {
            return until_next_window;
        }

        let decay = excess / state.previous_count as f64 * self.config.window.as_secs_f64();
        Duration::try_from_secs_f64(decay)
            .unwrap_or(Duration::MAX)
            .saturating_add(WAIT_SLACK)
            .min(until_next_window.max(WAIT_SLACK))
    }

    /// Try once; on denial report how long to back off.
    fn attempt(&self, permits: u64) -> std::result::Result<(), Duration> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        self.slide(&mut state, now);

        let weighted = self.weighted_count(&state, now);
        if weighted + permits as f64 <= self.config.limit as f64 {
            state.current_count += permits;
            trace!(permits = permits, weighted = weighted, "Sliding window granted");
            Ok(())
        } else {
            trace!(permits = permits, weighted = weighted, "Sliding window denied");
            Err(self.estimate_wait(&state, now, permits))
        }
    }

    /// Sleep-and-recheck until granted, cancelled, or past `deadline`.
    fn acquire_until(
        &self,
        permits: u64,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        validate_satisfiable(permits, self.config.limit)?;

        loop {
            if cancel.is_cancelled() {
                debug!(permits = permits, "Sliding window acquisition cancelled");
                return Err(RatekeeperError::Cancelled);
            }

            let mut wait = match self.attempt(permits) {
                Ok(()) => return Ok(true),
                Err(wait) => wait,
            };

            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(self.clock.now());
                if remaining.is_zero() {
                    debug!(permits = permits, "Sliding window wait timed out");
                    return Ok(false);
                }
                wait = wait.min(remaining);
            }

            debug!(
                permits = permits,
                wait_us = wait.as_micros() as u64,
                "Sliding window backing off"
            );
            if cancel.sleep(wait.max(WAIT_SLACK)) {
                debug!(permits = permits, "Sliding window acquisition cancelled");
                return Err(RatekeeperError::Cancelled);
            }
        }
    }
}

impl RateLimiter for SlidingWindow {
    fn try_acquire(&self, permits: u64) -> Result<bool> {
        validate_permits(permits)?;
        Ok(self.attempt(permits).is_ok())
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
        let now = self.clock.now();
        let mut state = self.state.lock();
        self.slide(&mut state, now);

        let headroom = self.config.limit as f64 - self.weighted_count(&state, now);
        RateLimitInfo::new(
            headroom.max(0.0).floor() as u64,
            self.config.limit,
            self.window_end(state.window_index),
        )
    }

    fn limit(&self) -> u64 {
        self.config.limit
    }
}
