//! Retry configuration, exponential backoff and jitter strategies

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{RetryError, circuit_breaker::CircuitBreakerConfig};

/// How a computed backoff delay is randomized
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JitterType {
    /// Use the base delay exactly
    None,
    /// Uniform in `[0, base]`
    #[default]
    Full,
    /// `base / 2` plus uniform in `[0, base / 2]`
    Equal,
    /// Uniform in `[initial, min(base * 3, max)]`
    Decorrelated,
}

/// Retry tunables, fixed for the lifetime of a [`crate::RetryManager`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts a notification gets from the retry queue before it is
    /// finalised as failed
    ///
    /// Default: 3
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (milliseconds)
    ///
    /// Default: 1000
    #[serde(default = "defaults::initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Upper bound on the backoff delay (milliseconds)
    ///
    /// Default: 16000
    #[serde(default = "defaults::max_delay_ms")]
    pub max_delay_ms: u64,

    /// Multiplier applied per attempt: `initial * factor^attempt_count`
    ///
    /// Default: 2.0
    #[serde(default = "defaults::backoff_factor")]
    pub backoff_factor: f64,

    #[serde(default)]
    pub jitter: JitterType,

    /// Consecutive failures that open the circuit breaker
    ///
    /// Default: 5
    #[serde(default = "defaults::circuit_breaker_threshold")]
    pub circuit_breaker_threshold: u32,

    /// How long the breaker stays open before a trial attempt (milliseconds)
    ///
    /// Default: 30000
    #[serde(default = "defaults::circuit_breaker_reset_timeout_ms")]
    pub circuit_breaker_reset_timeout_ms: u64,

    /// How often the background worker processes the queue (seconds)
    ///
    /// Default: 30
    #[serde(default = "defaults::process_interval_secs")]
    pub process_interval_secs: u64,

    /// Pause between consecutive attempts within one pass (milliseconds)
    ///
    /// Default: 100
    #[serde(default = "defaults::inter_item_delay_ms")]
    pub inter_item_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            initial_delay_ms: defaults::initial_delay_ms(),
            max_delay_ms: defaults::max_delay_ms(),
            backoff_factor: defaults::backoff_factor(),
            jitter: JitterType::default(),
            circuit_breaker_threshold: defaults::circuit_breaker_threshold(),
            circuit_breaker_reset_timeout_ms: defaults::circuit_breaker_reset_timeout_ms(),
            process_interval_secs: defaults::process_interval_secs(),
            inter_item_delay_ms: defaults::inter_item_delay_ms(),
        }
    }
}

/// Delay chosen for one scheduling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayPlan {
    /// Capped exponential delay before jitter
    pub base_delay_ms: u64,
    /// Delay actually applied
    pub total_delay_ms: u64,
}

impl DelayPlan {
    /// Difference between the applied and the base delay
    ///
    /// Negative whenever jitter shortened the delay, which every strategy
    /// except [`JitterType::None`] can do.
    #[must_use]
    pub fn jitter_applied(&self) -> i64 {
        let total = i64::try_from(self.total_delay_ms).unwrap_or(i64::MAX);
        let base = i64::try_from(self.base_delay_ms).unwrap_or(i64::MAX);
        total.saturating_sub(base)
    }
}

impl RetryConfig {
    /// Check the bounds every other method relies on
    ///
    /// # Errors
    /// [`RetryError::InvalidConfig`] naming the first violated bound
    pub fn validate(&self) -> Result<(), RetryError> {
        if self.max_attempts == 0 {
            return Err(RetryError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        if self.max_delay_ms < self.initial_delay_ms {
            return Err(RetryError::InvalidConfig(format!(
                "max_delay_ms ({}) must not be below initial_delay_ms ({})",
                self.max_delay_ms, self.initial_delay_ms
            )));
        }

        if !self.backoff_factor.is_finite() || self.backoff_factor <= 1.0 {
            return Err(RetryError::InvalidConfig(format!(
                "backoff_factor must be greater than 1.0, got {}",
                self.backoff_factor
            )));
        }

        if self.circuit_breaker_threshold == 0 {
            return Err(RetryError::InvalidConfig(
                "circuit_breaker_threshold must be at least 1".to_string(),
            ));
        }

        if self.process_interval_secs == 0 {
            return Err(RetryError::InvalidConfig(
                "process_interval_secs must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// `min(initial * factor^attempt_count, max)`
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "The product is clamped to max_delay_ms before converting back"
    )]
    pub fn base_delay_ms(&self, attempt_count: u32) -> u64 {
        let exponent = i32::try_from(attempt_count).unwrap_or(i32::MAX);
        let delay = (self.initial_delay_ms as f64) * self.backoff_factor.powi(exponent);

        if !delay.is_finite() || delay >= self.max_delay_ms as f64 {
            self.max_delay_ms
        } else {
            delay as u64
        }
    }

    /// Apply the configured jitter strategy to `base_delay_ms`
    pub fn jittered_delay_ms<R: Rng + ?Sized>(&self, base_delay_ms: u64, rng: &mut R) -> u64 {
        match self.jitter {
            JitterType::None => base_delay_ms,
            JitterType::Full => rng.random_range(0..=base_delay_ms),
            JitterType::Equal => {
                let half = base_delay_ms / 2;
                half + rng.random_range(0..=half)
            }
            JitterType::Decorrelated => {
                let low = self.initial_delay_ms;
                let high = base_delay_ms.saturating_mul(3).min(self.max_delay_ms);
                if high <= low {
                    low
                } else {
                    rng.random_range(low..=high)
                }
            }
        }
    }

    /// Base and jittered delay for a notification that has already used
    /// `attempt_count` retry attempts
    pub fn plan<R: Rng + ?Sized>(&self, attempt_count: u32, rng: &mut R) -> DelayPlan {
        let base_delay_ms = self.base_delay_ms(attempt_count);
        DelayPlan {
            base_delay_ms,
            total_delay_ms: self.jittered_delay_ms(base_delay_ms, rng),
        }
    }

    /// Returns `true` if a notification with `attempt_count` attempts may be
    /// attempted again.
    #[must_use]
    pub const fn should_retry(&self, attempt_count: u32) -> bool {
        attempt_count < self.max_attempts
    }

    #[must_use]
    pub const fn remaining_attempts(&self, attempt_count: u32) -> u32 {
        self.max_attempts.saturating_sub(attempt_count)
    }

    #[must_use]
    pub const fn circuit_breaker(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_breaker_threshold,
            reset_timeout: Duration::from_millis(self.circuit_breaker_reset_timeout_ms),
        }
    }

    #[must_use]
    pub const fn process_interval(&self) -> Duration {
        Duration::from_secs(self.process_interval_secs)
    }

    #[must_use]
    pub const fn inter_item_delay(&self) -> Duration {
        Duration::from_millis(self.inter_item_delay_ms)
    }
}

mod defaults {
    pub const fn max_attempts() -> u32 {
        3
    }

    pub const fn initial_delay_ms() -> u64 {
        1000 // 1 second
    }

    pub const fn max_delay_ms() -> u64 {
        16000 // 16 seconds
    }

    pub const fn backoff_factor() -> f64 {
        2.0
    }

    pub const fn circuit_breaker_threshold() -> u32 {
        5
    }

    pub const fn circuit_breaker_reset_timeout_ms() -> u64 {
        30000 // 30 seconds
    }

    pub const fn process_interval_secs() -> u64 {
        30
    }

    pub const fn inter_item_delay_ms() -> u64 {
        100
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn config(jitter: JitterType) -> RetryConfig {
        RetryConfig {
            jitter,
            ..RetryConfig::default()
        }
    }

    #[test]
    fn test_retry_config_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.initial_delay_ms, 1000);
        assert_eq!(config.max_delay_ms, 16000);
        assert!((config.backoff_factor - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.jitter, JitterType::Full);
        assert_eq!(config.circuit_breaker_threshold, 5);
        assert_eq!(config.circuit_breaker_reset_timeout_ms, 30000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_base_delay_doubles_until_capped() {
        let config = config(JitterType::None);

        let delays: Vec<_> = (0..8).map(|attempt| config.base_delay_ms(attempt)).collect();
        assert_eq!(delays, [1000, 2000, 4000, 8000, 16000, 16000, 16000, 16000]);
        assert_eq!(config.base_delay_ms(u32::MAX), 16000);
    }

    #[test]
    fn test_base_delay_is_monotonic() {
        let config = RetryConfig {
            initial_delay_ms: 250,
            max_delay_ms: 60_000,
            backoff_factor: 1.7,
            jitter: JitterType::None,
            ..RetryConfig::default()
        };

        for attempt in 0..64 {
            let current = config.base_delay_ms(attempt);
            let next = config.base_delay_ms(attempt + 1);
            assert!(next >= current, "attempt {attempt}: {next} < {current}");
            assert!(next <= config.max_delay_ms);
        }
    }

    #[test]
    fn test_jitter_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let base = 8000;

        for _ in 0..500 {
            assert_eq!(config(JitterType::None).jittered_delay_ms(base, &mut rng), base);

            let full = config(JitterType::Full).jittered_delay_ms(base, &mut rng);
            assert!(full <= base);

            let equal = config(JitterType::Equal).jittered_delay_ms(base, &mut rng);
            assert!((base / 2..=base).contains(&equal));

            let decorrelated = config(JitterType::Decorrelated).jittered_delay_ms(base, &mut rng);
            assert!((1000..=16000).contains(&decorrelated));
        }
    }

    #[test]
    fn test_decorrelated_jitter_can_undercut_base() {
        let config = config(JitterType::Decorrelated);
        let mut rng = StdRng::seed_from_u64(42);

        let undercut = (0..200)
            .map(|_| config.plan(3, &mut rng))
            .any(|plan| plan.jitter_applied() < 0);
        assert!(undercut);
    }

    #[test]
    fn test_validate_rejects_bad_bounds() {
        let cases = [
            RetryConfig {
                max_attempts: 0,
                ..RetryConfig::default()
            },
            RetryConfig {
                max_delay_ms: 500,
                ..RetryConfig::default()
            },
            RetryConfig {
                backoff_factor: 1.0,
                ..RetryConfig::default()
            },
            RetryConfig {
                backoff_factor: f64::NAN,
                ..RetryConfig::default()
            },
            RetryConfig {
                circuit_breaker_threshold: 0,
                ..RetryConfig::default()
            },
            RetryConfig {
                process_interval_secs: 0,
                ..RetryConfig::default()
            },
        ];

        for config in cases {
            assert!(
                matches!(config.validate(), Err(RetryError::InvalidConfig(_))),
                "{config:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_retry_config_from_ron() {
        let config: RetryConfig = ron::from_str("(max_attempts: 5, jitter: Equal)").expect("parse");
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.jitter, JitterType::Equal);
        assert_eq!(config.initial_delay_ms, 1000);
    }

    #[test]
    fn test_should_retry() {
        let config = RetryConfig::default();
        assert!(config.should_retry(0));
        assert!(config.should_retry(2));
        assert!(!config.should_retry(3));
        assert_eq!(config.remaining_attempts(1), 2);
        assert_eq!(config.remaining_attempts(7), 0);
    }
}
