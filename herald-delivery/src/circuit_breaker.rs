//! Circuit breaker guarding the delivery collaborator
//!
//! One breaker is shared by all retry activity of a [`crate::RetryManager`].
//! While it is open, due retries are withheld (counted as skipped, not failed)
//! instead of hammering a provider that is already struggling.
//!
//! # State Transitions
//!
//! ```text
//! ┌─────────┐  failure_count >= threshold  ┌──────┐
//! │ Closed  │ ──────────────────────────>  │ Open │
//! └─────────┘                              └──────┘
//!     ^                                       │
//!     │                                       │ reset timeout elapsed
//!     │                                       v   (checked by can_execute)
//!     │  Success              ┌───────────────┐
//!     └───────────────────────│   Half-Open   │
//!                             └───────────────┘
//!                                     │
//!                                     │ Failure (count still >= threshold)
//!                                     v
//!                                 ┌──────┐
//!                                 │ Open │
//!                                 └──────┘
//! ```
//!
//! Only consecutive failures matter. Any success resets the count, and the
//! count is never reset while the circuit is open, so a failed trial re-opens
//! the circuit immediately.
//!
//! A half-open circuit admits one trial at a time. The trial slot is freed by
//! [`CircuitBreaker::record_success`], [`CircuitBreaker::record_failure`], or
//! [`CircuitBreaker::release_trial`] when the attempt ended without saying
//! anything about the provider.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use herald_common::Clock;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Thresholds for a [`CircuitBreaker`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial is allowed
    pub reset_timeout: Duration,
}

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation, every attempt allowed
    Closed,
    /// Tripped, attempts withheld until the reset timeout elapses
    Open,
    /// Testing recovery, a single attempt decides
    HalfOpen,
}

impl CircuitState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct BreakerData {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<DateTime<Utc>>,
    trial_in_flight: bool,
}

impl BreakerData {
    const fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            trial_in_flight: false,
        }
    }
}

/// Snapshot of a breaker, for status reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub failure_threshold: u32,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    data: Mutex<BreakerData>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            data: Mutex::new(BreakerData::new()),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Whether an attempt may go ahead right now
    ///
    /// An open circuit whose reset timeout has elapsed moves to half-open and
    /// lets this call through as the trial. While that trial is outstanding
    /// every other caller is refused.
    pub fn can_execute(&self) -> bool {
        let mut data = self.data.lock();

        match data.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                let granted = !data.trial_in_flight;
                data.trial_in_flight = true;
                granted
            }
            CircuitState::Open => {
                let now = self.clock.now();
                let reset = TimeDelta::from_std(self.config.reset_timeout).unwrap_or(TimeDelta::MAX);
                let cooled_down = data
                    .last_failure_time
                    .is_none_or(|failed_at| now.signed_duration_since(failed_at) >= reset);

                if cooled_down {
                    data.state = CircuitState::HalfOpen;
                    data.trial_in_flight = true;
                    info!(
                        failure_count = data.failure_count,
                        "Circuit breaker entering HALF-OPEN state - testing recovery"
                    );
                }

                cooled_down
            }
        }
    }

    /// Record a successful attempt
    ///
    /// Returns `true` if this closed a half-open circuit.
    pub fn record_success(&self) -> bool {
        let mut data = self.data.lock();
        data.failure_count = 0;
        data.trial_in_flight = false;

        match data.state {
            CircuitState::HalfOpen => {
                data.state = CircuitState::Closed;
                info!("Circuit breaker CLOSED - normal operation resumed");
                true
            }
            CircuitState::Open => {
                warn!("Unexpected success while circuit is open");
                false
            }
            CircuitState::Closed => false,
        }
    }

    /// Record a failed attempt
    ///
    /// Returns `true` if this opened the circuit.
    pub fn record_failure(&self) -> bool {
        let mut data = self.data.lock();
        data.failure_count = data.failure_count.saturating_add(1);
        data.last_failure_time = Some(self.clock.now());
        data.trial_in_flight = false;

        if data.state == CircuitState::Open || data.failure_count < self.config.failure_threshold {
            return false;
        }

        let trial = data.state == CircuitState::HalfOpen;
        data.state = CircuitState::Open;

        if trial {
            warn!(
                failure_count = data.failure_count,
                "Circuit breaker trial failed - reopening circuit"
            );
        } else {
            warn!(
                failure_count = data.failure_count,
                threshold = self.config.failure_threshold,
                reset_timeout_ms = u64::try_from(self.config.reset_timeout.as_millis()).unwrap_or(u64::MAX),
                "Circuit breaker OPENED - withholding retries"
            );
        }

        true
    }

    /// Free the half-open trial slot without recording an outcome
    ///
    /// For attempts that failed for reasons unrelated to the provider's
    /// health, such as a payload it refused outright.
    pub fn release_trial(&self) {
        self.data.lock().trial_in_flight = false;
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.data.lock().state
    }

    #[must_use]
    pub fn stats(&self) -> CircuitBreakerStats {
        let data = self.data.lock();
        CircuitBreakerStats {
            state: data.state,
            failure_count: data.failure_count,
            last_failure_time: data.last_failure_time,
            failure_threshold: self.config.failure_threshold,
        }
    }

    /// Force the breaker back to closed with a clean slate
    pub fn reset(&self) {
        *self.data.lock() = BreakerData::new();
        info!("Circuit breaker manually reset");
    }
}
