//! Rate limiting algorithms and their shared contract.

mod clock;
mod info;
mod limiter;
mod sliding_window;
mod token_bucket;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use info::RateLimitInfo;
pub use limiter::RateLimiter;
pub use sliding_window::SlidingWindow;
pub use token_bucket::TokenBucket;
