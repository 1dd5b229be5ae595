//! Shard map configuration.

use std::time::Duration;

use thiserror::Error;

/// Default lower bound (and initial value) for the refresh retry backoff.
pub const MIN_BACKOFF_DEFAULT: Duration = Duration::from_millis(1000);

/// Default upper clamp for the refresh retry backoff.
pub const MAX_BACKOFF_DEFAULT: Duration = Duration::from_millis(30_000);

/// Default retention for shards that have dropped out of the open set.
pub const CLOSED_SHARD_TTL_DEFAULT: Duration = Duration::from_millis(60_000);

/// Configuration for a [`ShardMap`](crate::ShardMap).
#[derive(Debug, Clone)]
pub struct ShardMapConfig {
    /// Name of the stream whose topology is tracked. Required.
    pub stream_name: String,
    /// ARN of the stream, when known. Sent with the first topology page.
    pub stream_arn: Option<String>,
    /// Delay before the first retry after a failed refresh; also the floor
    /// the backoff resets to after a success.
    pub min_backoff: Duration,
    /// Ceiling for the retry delay.
    pub max_backoff: Duration,
    /// How long a shard that left the open set stays resolvable through
    /// `get_shard`, so in-flight retries can still classify mis-routes.
    pub closed_shard_ttl: Duration,
}

impl ShardMapConfig {
    /// Creates a configuration for the named stream with default timing.
    #[must_use]
    pub fn new(stream_name: impl Into<String>) -> Self {
        Self {
            stream_name: stream_name.into(),
            stream_arn: None,
            min_backoff: MIN_BACKOFF_DEFAULT,
            max_backoff: MAX_BACKOFF_DEFAULT,
            closed_shard_ttl: CLOSED_SHARD_TTL_DEFAULT,
        }
    }

    /// Sets the stream ARN.
    #[must_use]
    pub fn with_stream_arn(mut self, arn: impl Into<String>) -> Self {
        self.stream_arn = Some(arn.into());
        self
    }

    /// Sets the minimum retry backoff.
    #[must_use]
    pub const fn with_min_backoff(mut self, backoff: Duration) -> Self {
        self.min_backoff = backoff;
        self
    }

    /// Sets the maximum retry backoff.
    #[must_use]
    pub const fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    /// Sets the closed-shard retention window.
    #[must_use]
    pub const fn with_closed_shard_ttl(mut self, ttl: Duration) -> Self {
        self.closed_shard_ttl = ttl;
        self
    }

    /// Creates a configuration with short delays, suitable for tests.
    #[must_use]
    pub fn fast_for_testing() -> Self {
        Self::new("test-stream")
            .with_min_backoff(Duration::from_millis(10))
            .with_max_backoff(Duration::from_millis(50))
            .with_closed_shard_ttl(Duration::from_millis(200))
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any field is out of range or inconsistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream_name.is_empty() {
            return Err(ConfigError::InvalidField {
                field: "stream_name",
                reason: "must not be empty",
            });
        }
        if self.min_backoff.is_zero() {
            return Err(ConfigError::InvalidField {
                field: "min_backoff",
                reason: "must be positive",
            });
        }
        if self.max_backoff < self.min_backoff {
            return Err(ConfigError::InvalidField {
                field: "max_backoff",
                reason: "must be >= min_backoff",
            });
        }
        if self.closed_shard_ttl.is_zero() {
            return Err(ConfigError::InvalidField {
                field: "closed_shard_ttl",
                reason: "must be positive",
            });
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A field failed validation.
    #[error("invalid {field}: {reason}")]
    InvalidField {
        /// The offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: &'static str,
    },
}
