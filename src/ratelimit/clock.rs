//! Time sources for the limiters.

use parking_lot::Mutex;
use std::fmt::Debug;
use std::time::{Duration, Instant};

/// A monotonically non-decreasing source of timestamps.
///
/// Both limiters read time exclusively through this trait, so a test can swap
/// in a [`ManualClock`] and step time forward deterministically.
pub trait Clock: Send + Sync + Debug {
    /// Current instant. Successive calls never go backwards.
    fn now(&self) -> Instant;
}

/// The process monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Stand-in for "never" when an instant would overflow.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `base + by`, clamped to a far-future instant instead of panicking on overflow.
pub(crate) fn instant_after(base: Instant, by: Duration) -> Instant {
    base.checked_add(by)
        .or_else(|| base.checked_add(FAR_FUTURE))
        .unwrap_or(base)
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Create a clock frozen at the current instant.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock();
        *offset += by;
    }

    /// Time advanced since the clock was created.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }
}
