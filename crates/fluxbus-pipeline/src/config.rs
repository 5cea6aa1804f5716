//! Pipeline and retry configuration.

use std::time::Duration;

/// Errors from configuration validation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// The broker address list is empty.
    #[error("broker address list must not be empty")]
    EmptyBrokers,

    /// The retry budget allows zero attempts.
    #[error("retry.max_attempts must be >= 1")]
    ZeroAttempts,

    /// The backoff multiplier would shrink delays.
    #[error("retry.multiplier must be >= 1.0, got {0}")]
    BadMultiplier(f64),

    /// The per-key lane channel has no capacity.
    #[error("lane_capacity must be > 0")]
    ZeroLaneCapacity,

    /// Idle lanes would be reaped immediately.
    #[error("lane_idle_timeout must be > 0")]
    ZeroLaneIdle,
}

/// Exponential backoff schedule for transient publish failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Total publish attempts before giving up.
    pub max_attempts: u32,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_attempts: 5,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// Returns the delay to wait after `attempt` failed attempts
    /// (1-based), capped at [`RetryConfig::max_delay`].
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.saturating_sub(1).min(63) as i32);
        let ms = (self.base_delay.as_millis() as f64 * exp).max(0.0);
        Duration::from_millis(ms as u64).min(self.max_delay)
    }
}

/// Configuration for the publishing pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Broker addresses, comma-separated `host:port` pairs.
    pub brokers: String,
    /// How long to wait for the broker connection at startup.
    pub connect_timeout: Duration,
    /// How long shutdown waits for in-flight sends to reach a terminal
    /// state before failing stragglers with a shutdown error.
    pub drain_timeout: Duration,
    /// Optional per-call ingest deadline. When it elapses the caller gets a
    /// timeout outcome while the send completes in the background for
    /// logging purposes only.
    pub ingest_deadline: Option<Duration>,
    /// Bounded capacity of each per-key lane channel.
    pub lane_capacity: usize,
    /// How long a lane may sit idle before its task exits and its registry
    /// entry is reaped. Keys are high-cardinality (timestamps), so idle
    /// lanes must not accumulate for the lifetime of the pipeline.
    pub lane_idle_timeout: Duration,
    /// Retry schedule for transient broker failures.
    pub retry: RetryConfig,
}

impl PipelineConfig {
    /// Creates a config with defaults for everything but the broker list.
    #[must_use]
    pub fn new(brokers: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            connect_timeout: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(30),
            ingest_deadline: None,
            lane_capacity: 64,
            lane_idle_timeout: Duration::from_secs(60),
            retry: RetryConfig::default(),
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on empty brokers, a zero retry budget, a
    /// shrinking backoff multiplier, or a zero-capacity lane channel.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.brokers.trim().is_empty() {
            return Err(ConfigError::EmptyBrokers);
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if self.retry.multiplier < 1.0 {
            return Err(ConfigError::BadMultiplier(self.retry.multiplier));
        }
        if self.lane_capacity == 0 {
            return Err(ConfigError::ZeroLaneCapacity);
        }
        if self.lane_idle_timeout.is_zero() {
            return Err(ConfigError::ZeroLaneIdle);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        let retry = RetryConfig::default();
        assert_eq!(retry.delay_for(1), Duration::from_millis(100));
        assert_eq!(retry.delay_for(2), Duration::from_millis(200));
        assert_eq!(retry.delay_for(3), Duration::from_millis(400));
        assert_eq!(retry.delay_for(4), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_is_capped() {
        let retry = RetryConfig {
            max_delay: Duration::from_millis(300),
            ..RetryConfig::default()
        };
        assert_eq!(retry.delay_for(3), Duration::from_millis(300));
        assert_eq!(retry.delay_for(10), Duration::from_millis(300));
    }

    #[test]
    fn test_validate_ok_with_defaults() {
        assert!(PipelineConfig::new("localhost:9092").validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_brokers() {
        assert_eq!(
            PipelineConfig::new("  ").validate(),
            Err(ConfigError::EmptyBrokers)
        );
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = PipelineConfig::new("localhost:9092");
        config.retry.max_attempts = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroAttempts));
    }

    #[test]
    fn test_validate_rejects_shrinking_multiplier() {
        let mut config = PipelineConfig::new("localhost:9092");
        config.retry.multiplier = 0.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BadMultiplier(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_lane_capacity() {
        let mut config = PipelineConfig::new("localhost:9092");
        config.lane_capacity = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroLaneCapacity));
    }

    #[test]
    fn test_validate_rejects_zero_lane_idle_timeout() {
        let mut config = PipelineConfig::new("localhost:9092");
        config.lane_idle_timeout = Duration::ZERO;
        assert_eq!(config.validate(), Err(ConfigError::ZeroLaneIdle));
    }

    #[test]
    fn test_config_errors_compare_by_value() {
        assert_eq!(
            ConfigError::BadMultiplier(0.5),
            ConfigError::BadMultiplier(0.5)
        );
        assert_ne!(
            ConfigError::BadMultiplier(0.5),
            ConfigError::BadMultiplier(0.9)
        );
    }
}
