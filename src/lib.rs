//! Ratekeeper - In-Process Admission Control
//!
//! This crate decides, for many concurrent callers, whether a request for
//! permits may proceed now, may proceed after waiting, or must be rejected.
//! Two algorithms sit behind one [`RateLimiter`](ratelimit::RateLimiter)
//! contract:
//!
//! - [`TokenBucket`](ratelimit::TokenBucket): bursts up to a capacity with a
//!   steady long-run refill rate.
//! - [`SlidingWindow`](ratelimit::SlidingWindow): a two-counter approximation
//!   of a trailing window limit.
//!
//! ```
//! use std::time::Duration;
//! use ratekeeper::ratelimit::{RateLimiter, TokenBucket};
//! use ratekeeper::CancellationToken;
//!
//! let limiter = TokenBucket::new(10, 100, Duration::from_secs(60)).unwrap();
//! assert!(limiter.try_acquire(3).unwrap());
//!
//! let cancel = CancellationToken::new();
//! let granted = limiter
//!     .try_acquire_for(1, Duration::from_millis(10), &cancel)
//!     .unwrap();
//! assert!(granted);
//! assert_eq!(limiter.info().remaining, 6);
//! ```

pub mod cancel;
pub mod config;
pub mod error;
pub mod ratelimit;

pub use cancel::CancellationToken;
pub use error::{RatekeeperError, Result};
