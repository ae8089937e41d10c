//! The admission contract shared by every algorithm.

use std::time::Duration;

use crate::cancel::CancellationToken;
use crate::error::{RatekeeperError, Result};

use super::info::RateLimitInfo;

/// Operations every rate limiting algorithm provides.
///
/// Callers can be written against `dyn RateLimiter` and handed either a
/// [`TokenBucket`](super::TokenBucket) or a [`SlidingWindow`](super::SlidingWindow).
///
/// Every call ends in exactly one outcome:
/// - granted: `Ok(true)` / `Ok(())`
/// - denied: `Ok(false)`
/// - cancelled: `Err(RatekeeperError::Cancelled)`
/// - invalid argument: `Err(RatekeeperError::InvalidArgument)` or
///   `Err(RatekeeperError::ExceedsCapacity)`
///
/// No ordering is promised among concurrently blocked callers.
pub trait RateLimiter: Send + Sync {
    /// Take `permits` if they are available right now. Never blocks.
    fn try_acquire(&self, permits: u64) -> Result<bool>;

    /// Take a single permit if one is available right now.
    fn try_acquire_one(&self) -> bool {
        matches!(self.try_acquire(1), Ok(true))
    }

    /// Block until `permits` are granted or `cancel` fires.
    fn acquire(&self, permits: u64, cancel: &CancellationToken) -> Result<()>;

    /// Block for at most `timeout` waiting for `permits`.
    ///
    /// Returns `Ok(false)` once the timeout passes. A zero timeout behaves like
    /// [`try_acquire`](Self::try_acquire).
    fn try_acquire_for(
        &self,
        permits: u64,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<bool>;

    /// Snapshot of the current headroom.
    fn info(&self) -> RateLimitInfo;

    /// Configured capacity or window limit.
    fn limit(&self) -> u64;
}

/// Reject a request for zero permits.
pub(crate) fn validate_permits(permits: u64) -> Result<()> {
    if permits == 0 {
        return Err(RatekeeperError::InvalidArgument(
            "permits must be positive".to_string(),
        ));
    }
    Ok(())
}

/// Reject a blocking request that could never be satisfied.
pub(crate) fn validate_satisfiable(permits: u64, capacity: u64) -> Result<()> {
    validate_permits(permits)?;
    if permits > capacity {
        return Err(RatekeeperError::ExceedsCapacity {
            requested: permits,
            capacity,
        });
    }
    Ok(())
}
