//! Error types for Ratekeeper.

use thiserror::Error;

/// Main error type for Ratekeeper operations.
///
/// Denial is not represented here: a limiter that refuses a request returns
/// `Ok(false)`.
#[derive(Error, Debug)]
pub enum RatekeeperError {
    /// A limiter was constructed with a non-positive parameter.
    #[error("Invalid limiter configuration: {0}")]
    InvalidConfig(String),

    /// A call was made with an unusable argument, such as zero permits.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A blocking request asked for more permits than the limiter can ever hold.
    #[error("Requested {requested} permits but the limiter holds at most {capacity}")]
    ExceedsCapacity {
        /// Permits requested by the caller
        requested: u64,
        /// Configured capacity or window limit
        capacity: u64,
    },

    /// The caller's cancellation token fired before a permit was granted.
    #[error("Acquisition cancelled")]
    Cancelled,

    /// Configuration file errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RatekeeperError {
    /// Whether this error stems from a bad call argument rather than a runtime outcome.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            RatekeeperError::InvalidArgument(_) | RatekeeperError::ExceedsCapacity { .. }
        )
    }
}

impl From<::config::ConfigError> for RatekeeperError {
    fn from(err: ::config::ConfigError) -> Self {
        RatekeeperError::Config(err.to_string())
    }
}

/// Result type alias for Ratekeeper operations.
pub type Result<T> = std::result::Result<T, RatekeeperError>;
