//! Point-in-time view of a limiter's headroom.

use serde::Serialize;
use std::time::{Duration, Instant};

/// Snapshot of a limiter's remaining capacity.
///
/// Produced by [`RateLimiter::info`](super::RateLimiter::info) and never
/// updated afterwards; it describes the limiter at the moment it was taken,
/// regardless of which algorithm produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitInfo {
    /// Whole permits that could be granted right now
    pub remaining: u64,
    /// Configured capacity or window limit
    pub limit: u64,
    /// When remaining capacity will next increase
    #[serde(skip)]
    pub reset_at: Instant,
}

impl RateLimitInfo {
    /// Create a new snapshot.
    pub fn new(remaining: u64, limit: u64, reset_at: Instant) -> Self {
        Self {
            remaining,
            limit,
            reset_at,
        }
    }

    /// Whether no permit can be granted right now.
    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    /// Time from `now` until `reset_at`, or zero if it has already passed.
    pub fn time_until_reset(&self, now: Instant) -> Duration {
        self.reset_at.saturating_duration_since(now)
    }

    /// How long a rejected caller should back off, if the limiter is exhausted.
    ///
    /// This is the value an HTTP layer would put in `Retry-After`.
    pub fn retry_after(&self, now: Instant) -> Option<Duration> {
        if self.is_exhausted() {
            Some(self.time_until_reset(now))
        } else {
            None
        }
    }
}
