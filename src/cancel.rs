//! Cooperative cancellation for blocking acquisition.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

type Callback = Arc<dyn Fn() + Send + Sync>;

/// A cloneable signal that aborts blocking acquisition.
///
/// All clones share one flag. Once cancelled, a token stays cancelled, and any
/// thread parked in [`RateLimiter::acquire`](crate::ratelimit::RateLimiter::acquire)
/// or [`RateLimiter::try_acquire_for`](crate::ratelimit::RateLimiter::try_acquire_for)
/// with it returns [`RatekeeperError::Cancelled`](crate::RatekeeperError::Cancelled).
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    cond: Condvar,
}

#[derive(Default)]
struct State {
    cancelled: bool,
    next_id: u64,
    callbacks: Vec<(u64, Callback)>,
}

impl CancellationToken {
    /// Create a token that has not been cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the token, waking every sleeper and running registered callbacks.
    ///
    /// Calling this more than once has no further effect.
    pub fn cancel(&self) {
        let callbacks = {
            let mut state = self.inner.state.lock();
            if state.cancelled {
                return;
            }
            state.cancelled = true;
            std::mem::take(&mut state.callbacks)
        };
        self.inner.cond.notify_all();

        // Run outside the state lock: callbacks take limiter locks.
        for (_, callback) in callbacks {
            callback();
        }
    }

    /// Whether [`cancel`](Self::cancel) has been called on any clone.
    pub fn is_cancelled(&self) -> bool {
        self.inner.state.lock().cancelled
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// Returns `true` if the token was (or became) cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let mut state = self.inner.state.lock();
        if state.cancelled {
            return true;
        }
        // A timed-out wait still re-reads the flag below.
        let _ = self
            .inner
            .cond
            .wait_while_for(&mut state, |state| !state.cancelled, duration);
        state.cancelled
    }

    /// Run `callback` once when the token is cancelled.
    ///
    /// If the token is already cancelled the callback runs immediately. The
    /// callback is dropped unrun when the returned guard is dropped first.
    pub fn on_cancel<F>(&self, callback: F) -> CancelRegistration
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut state = self.inner.state.lock();
        if state.cancelled {
            drop(state);
            callback();
            return CancelRegistration { token: None, id: 0 };
        }

        let id = state.next_id;
        state.next_id += 1;
        state.callbacks.push((id, Arc::new(callback)));
        CancelRegistration {
            token: Some(self.clone()),
            id,
        }
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Guard returned by [`CancellationToken::on_cancel`]; unregisters on drop.
#[must_use = "dropping the registration immediately unregisters the callback"]
pub struct CancelRegistration {
    token: Option<CancellationToken>,
    id: u64,
}

impl Drop for CancelRegistration {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            let mut state = token.inner.state.lock();
            state.callbacks.retain(|(id, _)| *id != self.id);
        }
    }
}
