//! Configuration management for Ratekeeper.
//!
//! Limiters are described declaratively and built once; there is no runtime
//! reconfiguration. A file looks like:
//!
//! ```yaml
//! limiters:
//!   api:
//!     algorithm: token_bucket
//!     capacity: 10
//!     refill_amount: 100
//!     refill_period_ms: 60000
//!   search:
//!     algorithm: sliding_window
//!     limit: 100
//!     window_ms: 60000
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::{RatekeeperError, Result};
use crate::ratelimit::{MonotonicClock, RateLimiter, SlidingWindow, TokenBucket};

/// Prefix for environment overrides, e.g. `RATEKEEPER__LIMITERS__API__CAPACITY=20`.
const ENV_PREFIX: &str = "RATEKEEPER";

/// Parameters of a [`TokenBucket`]. Validated once, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBucketConfig {
    /// Maximum burst size
    pub capacity: u64,
    /// Tokens added per refill period
    pub refill_amount: u64,
    /// Period over which `refill_amount` tokens accrue
    pub refill_period: Duration,
}

impl TokenBucketConfig {
    /// Create a validated configuration.
    pub fn new(capacity: u64, refill_amount: u64, refill_period: Duration) -> Result<Self> {
        let config = Self {
            capacity,
            refill_amount,
            refill_period,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that every parameter is positive.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(invalid("capacity must be positive"));
        }
        if self.refill_amount == 0 {
            return Err(invalid("refill amount must be positive"));
        }
        if self.refill_period.is_zero() {
            return Err(invalid("refill period must be positive"));
        }
        Ok(())
    }
}

/// Parameters of a [`SlidingWindow`]. Validated once, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlidingWindowConfig {
    /// Maximum requests in any trailing window
    pub limit: u64,
    /// Window length
    pub window: Duration,
}

impl SlidingWindowConfig {
    /// Create a validated configuration.
    pub fn new(limit: u64, window: Duration) -> Result<Self> {
        let config = Self { limit, window };
        config.validate()?;
        Ok(config)
    }

    /// Check that every parameter is positive.
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(invalid("window limit must be positive"));
        }
        if self.window.is_zero() {
            return Err(invalid("window size must be positive"));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> RatekeeperError {
    RatekeeperError::InvalidConfig(msg.to_string())
}

/// Declarative description of one limiter, tagged by algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum LimiterSpec {
    /// A token bucket
    TokenBucket {
        /// Maximum burst size
        capacity: u64,
        /// Tokens added per period
        refill_amount: u64,
        /// Refill period in milliseconds
        refill_period_ms: u64,
    },
    /// A sliding window counter
    SlidingWindow {
        /// Maximum requests per window
        limit: u64,
        /// Window length in milliseconds
        window_ms: u64,
    },
}

impl LimiterSpec {
    /// Build the described limiter on the process monotonic clock.
    pub fn build(&self) -> Result<Arc<dyn RateLimiter>> {
        let limiter: Arc<dyn RateLimiter> = match *self {
            LimiterSpec::TokenBucket {
                capacity,
                refill_amount,
                refill_period_ms,
            } => Arc::new(TokenBucket::with_clock(
                TokenBucketConfig::new(
                    capacity,
                    refill_amount,
                    Duration::from_millis(refill_period_ms),
                )?,
                Arc::new(MonotonicClock),
            )?),
            LimiterSpec::SlidingWindow { limit, window_ms } => {
                Arc::new(SlidingWindow::with_clock(
                    SlidingWindowConfig::new(limit, Duration::from_millis(window_ms))?,
                    Arc::new(MonotonicClock),
                )?)
            }
        };
        Ok(limiter)
    }

    /// Short algorithm name for logs and reports.
    pub fn algorithm(&self) -> &'static str {
        match self {
            LimiterSpec::TokenBucket { .. } => "token_bucket",
            LimiterSpec::SlidingWindow { .. } => "sliding_window",
        }
    }
}

/// Main configuration: a set of named limiters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RatekeeperConfig {
    /// Limiter definitions keyed by name
    #[serde(default)]
    pub limiters: BTreeMap<String, LimiterSpec>,
}

impl RatekeeperConfig {
    /// Load configuration from a file, applying `RATEKEEPER__*` environment overrides.
    ///
    /// The format is chosen from the file extension (YAML, TOML or JSON).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading limiter configuration");

        let config = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let parsed: RatekeeperConfig = config.try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let parsed: RatekeeperConfig = serde_yaml::from_str(yaml)
            .map_err(|e| RatekeeperError::Config(format!("Failed to parse limiter config: {}", e)))?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Check every limiter definition without building it.
    pub fn validate(&self) -> Result<()> {
        for (name, spec) in &self.limiters {
            let checked = match *spec {
                LimiterSpec::TokenBucket {
                    capacity,
                    refill_amount,
                    refill_period_ms,
                } => TokenBucketConfig::new(
                    capacity,
                    refill_amount,
                    Duration::from_millis(refill_period_ms),
                )
                .map(|_| ()),
                LimiterSpec::SlidingWindow { limit, window_ms } => {
                    SlidingWindowConfig::new(limit, Duration::from_millis(window_ms)).map(|_| ())
                }
            };
            checked.map_err(|e| RatekeeperError::Config(format!("limiter '{}': {}", name, e)))?;
        }
        Ok(())
    }

    /// Look up a limiter definition by name.
    ///
    /// With `None`, the only configured limiter is returned if there is exactly one.
    pub fn limiter(&self, name: Option<&str>) -> Result<(&str, &LimiterSpec)> {
        match name {
            Some(name) => self
                .limiters
                .get_key_value(name)
                .map(|(k, v)| (k.as_str(), v))
                .ok_or_else(|| RatekeeperError::Config(format!("no limiter named '{}'", name))),
            None if self.limiters.len() == 1 => self
                .limiters
                .iter()
                .next()
                .map(|(k, v)| (k.as_str(), v))
                .ok_or_else(|| RatekeeperError::Config("no limiters configured".to_string())),
            None => Err(RatekeeperError::Config(format!(
                "{} limiters configured, choose one by name",
                self.limiters.len()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
limiters:
  api:
    algorithm: token_bucket
    capacity: 10
    refill_amount: 100
    refill_period_ms: 60000
  search:
    algorithm: sliding_window
    limit: 100
    window_ms: 60000
"#;

    #[test]
    fn test_token_bucket_config_validation() {
        assert!(TokenBucketConfig::new(10, 1, Duration::from_secs(1)).is_ok());
        assert!(matches!(
            TokenBucketConfig::new(0, 1, Duration::from_secs(1)),
            Err(RatekeeperError::InvalidConfig(_))
        ));
        assert!(TokenBucketConfig::new(10, 0, Duration::from_secs(1)).is_err());
        assert!(TokenBucketConfig::new(10, 1, Duration::ZERO).is_err());
    }

    #[test]
    fn test_sliding_window_config_validation() {
        assert!(SlidingWindowConfig::new(100, Duration::from_secs(60)).is_ok());
        assert!(SlidingWindowConfig::new(0, Duration::from_secs(60)).is_err());
        assert!(SlidingWindowConfig::new(100, Duration::ZERO).is_err());
    }

    #[test]
    fn test_parse_yaml() {
        let config = RatekeeperConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.limiters.len(), 2);
        assert_eq!(
            config.limiters["api"],
            LimiterSpec::TokenBucket {
                capacity: 10,
                refill_amount: 100,
                refill_period_ms: 60000
            }
        );
        assert_eq!(config.limiters["search"].algorithm(), "sliding_window");
    }

    #[test]
    fn test_build_limiters() {
        let config = RatekeeperConfig::from_yaml(SAMPLE).unwrap();

        let api = config.limiters["api"].build().unwrap();
        assert_eq!(api.limit(), 10);
        assert_eq!(api.info().remaining, 10);

        let search = config.limiters["search"].build().unwrap();
        assert_eq!(search.limit(), 100);
        assert!(search.try_acquire(100).unwrap());
        assert!(!search.try_acquire_one());
    }

    #[test]
    fn test_rejects_invalid_limiter() {
        let yaml = r#"
limiters:
  broken:
    algorithm: sliding_window
    limit: 0
    window_ms: 1000
"#;
        let err = RatekeeperConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_rejects_unknown_algorithm() {
        let yaml = r#"
limiters:
  odd:
    algorithm: leaky_bucket
    capacity: 1
"#;
        assert!(matches!(
            RatekeeperConfig::from_yaml(yaml),
            Err(RatekeeperError::Config(_))
        ));
    }

    #[test]
    fn test_limiter_lookup() {
        let config = RatekeeperConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.limiter(Some("api")).unwrap().0, "api");
        assert!(config.limiter(Some("missing")).is_err());
        assert!(config.limiter(None).is_err());

        let single = RatekeeperConfig::from_yaml(
            "limiters:\n  only:\n    algorithm: sliding_window\n    limit: 5\n    window_ms: 1000\n",
        )
        .unwrap();
        assert_eq!(single.limiter(None).unwrap().0, "only");
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!(
            "ratekeeper-config-{}.yaml",
            std::process::id()
        ));
        std::fs::write(&path, SAMPLE).unwrap();

        let config = RatekeeperConfig::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.limiters.len(), 2);
        assert!(matches!(
            config.limiters["search"],
            LimiterSpec::SlidingWindow { limit: 100, window_ms: 60000 }
        ));
    }
}
