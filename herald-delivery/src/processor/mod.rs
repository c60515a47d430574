//! Retry manager orchestration

pub mod process;
pub mod worker;

use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use chrono::{DateTime, TimeDelta, Utc};
use herald_common::{Clock, delivery, internal};
use serde::Serialize;

use crate::{
    CircuitBreaker, CircuitBreakerStats, CircuitState, Notification, Payload, RetryConfig,
    RetryError,
    queue::{FailedNotification, RetryId, RetryQueue},
    sender::NotificationSender,
};

/// What to put on the retry queue
#[derive(Debug, Clone, PartialEq)]
pub struct RetryRequest {
    pub notification_id: String,
    pub payload: Payload,
    /// Why the last attempt failed
    pub error: String,
    /// Retry attempts already used
    pub attempt_count: u32,
    /// When the notification first failed; defaults to now
    pub original_timestamp: Option<DateTime<Utc>>,
}

impl RetryRequest {
    /// A first retry for `notification`
    #[must_use]
    pub fn new(notification: &Notification, error: impl Into<String>) -> Self {
        Self {
            notification_id: notification.id.clone(),
            payload: notification.payload.clone(),
            error: error.into(),
            attempt_count: 0,
            original_timestamp: None,
        }
    }

    #[must_use]
    pub const fn with_attempt_count(mut self, attempt_count: u32) -> Self {
        self.attempt_count = attempt_count;
        self
    }
}

/// Status of one queued retry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryStatus {
    pub id: RetryId,
    pub notification_id: String,
    pub attempt_count: u32,
    pub remaining_attempts: u32,
    pub next_retry_at: DateTime<Utc>,
    pub original_timestamp: DateTime<Utc>,
    pub last_attempt_timestamp: DateTime<Utc>,
    pub last_error: String,
    pub base_delay_ms: u64,
    pub total_delay_ms: u64,
    /// `total_delay_ms - base_delay_ms`; negative when jitter shortened the
    /// delay
    pub jitter_applied: i64,
    pub circuit_breaker_state: CircuitState,
}

/// Queue-wide counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStatistics {
    pub total: usize,
    /// Entries whose retry time has passed
    pub due: usize,
    pub by_attempt_count: BTreeMap<u32, usize>,
    pub oldest_failure: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub processing: bool,
    pub circuit_breaker: CircuitBreakerStats,
}

/// Schedules failed notifications and drives them to success or a final
/// failure
///
/// Construct one per process and share it behind an [`Arc`]; see
/// [`RetryManager::start`] for the background worker.
#[derive(Debug)]
pub struct RetryManager {
    pub(crate) config: RetryConfig,
    pub(crate) queue: RetryQueue,
    pub(crate) breaker: CircuitBreaker,
    pub(crate) sender: Arc<dyn NotificationSender>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) processing: AtomicBool,
}

impl RetryManager {
    /// Create a retry manager delivering through `sender`
    ///
    /// # Errors
    /// If `config` is out of bounds
    pub fn new(
        config: RetryConfig,
        sender: Arc<dyn NotificationSender>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RetryError> {
        config.validate()?;

        internal!(
            "Retry manager configured: max_attempts={}, delay={}..{}ms x{}, jitter={:?}, breaker={} failures / {}ms",
            config.max_attempts,
            config.initial_delay_ms,
            config.max_delay_ms,
            config.backoff_factor,
            config.jitter,
            config.circuit_breaker_threshold,
            config.circuit_breaker_reset_timeout_ms
        );

        Ok(Self {
            breaker: CircuitBreaker::new(config.circuit_breaker(), Arc::clone(&clock)),
            config,
            queue: RetryQueue::new(),
            sender,
            clock,
            processing: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &RetryConfig {
        &self.config
    }

    #[must_use]
    pub const fn queue(&self) -> &RetryQueue {
        &self.queue
    }

    #[must_use]
    pub const fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    #[must_use]
    pub fn sender(&self) -> &Arc<dyn NotificationSender> {
        &self.sender
    }

    /// Whether a pass over the queue is running right now
    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    /// Put a failed notification on the queue
    ///
    /// The entry becomes due after `min(initial * factor^attempt_count, max)`
    /// milliseconds, randomized by the configured jitter.
    ///
    /// # Errors
    /// [`RetryError::AttemptsExhausted`] if the notification has already used
    /// every attempt
    pub fn schedule_retry(&self, request: RetryRequest) -> Result<RetryId, RetryError> {
        if !self.config.should_retry(request.attempt_count) {
            return Err(RetryError::AttemptsExhausted {
                notification_id: request.notification_id,
                max_attempts: self.config.max_attempts,
            });
        }

        let now = self.clock.now();
        Ok(self.enqueue(request, now))
    }

    pub(crate) fn enqueue(&self, request: RetryRequest, last_attempt: DateTime<Utc>) -> RetryId {
        let now = self.clock.now();
        let plan = self.config.plan(request.attempt_count, &mut rand::rng());
        let delay = i64::try_from(plan.total_delay_ms)
            .ok()
            .and_then(TimeDelta::try_milliseconds)
            .unwrap_or(TimeDelta::MAX);
        let next_retry_at = now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC);

        let id = self.queue.insert(FailedNotification {
            id: RetryId::generate(),
            notification_id: request.notification_id,
            payload: request.payload,
            error: request.error,
            original_timestamp: request.original_timestamp.unwrap_or(now),
            last_attempt_timestamp: last_attempt,
            attempt_count: request.attempt_count,
            next_retry_at,
            circuit_breaker_state: self.breaker.state(),
            base_delay_ms: plan.base_delay_ms,
            total_delay_ms: plan.total_delay_ms,
            sequence: 0,
        });

        delivery!(
            retry_id = %id,
            attempt_count = request.attempt_count,
            base_delay_ms = plan.base_delay_ms,
            delay_ms = plan.total_delay_ms,
            next_retry_at = %next_retry_at,
            "Retry scheduled"
        );

        id
    }

    /// Every queued retry for `notification_id`
    ///
    /// Empty if nothing is queued; a notification that was delivered or
    /// finalised leaves no trace here.
    #[must_use]
    pub fn get_retry_status(&self, notification_id: &str) -> Vec<RetryStatus> {
        self.queue
            .for_notification(notification_id)
            .into_iter()
            .map(|entry| {
                let jitter_applied = crate::DelayPlan {
                    base_delay_ms: entry.base_delay_ms,
                    total_delay_ms: entry.total_delay_ms,
                }
                .jitter_applied();

                RetryStatus {
                    id: entry.id,
                    remaining_attempts: self.config.remaining_attempts(entry.attempt_count),
                    notification_id: entry.notification_id,
                    attempt_count: entry.attempt_count,
                    next_retry_at: entry.next_retry_at,
                    original_timestamp: entry.original_timestamp,
                    last_attempt_timestamp: entry.last_attempt_timestamp,
                    last_error: entry.error,
                    base_delay_ms: entry.base_delay_ms,
                    total_delay_ms: entry.total_delay_ms,
                    jitter_applied,
                    circuit_breaker_state: entry.circuit_breaker_state,
                }
            })
            .collect()
    }

    #[must_use]
    pub fn get_queue_statistics(&self) -> QueueStatistics {
        let now = self.clock.now();
        let entries = self.queue.entries();

        let mut by_attempt_count = BTreeMap::new();
        for entry in &entries {
            *by_attempt_count.entry(entry.attempt_count).or_default() += 1;
        }

        QueueStatistics {
            total: entries.len(),
            due: entries.iter().filter(|entry| entry.is_due(now)).count(),
            by_attempt_count,
            oldest_failure: entries.iter().map(|entry| entry.original_timestamp).min(),
            next_retry_at: entries.iter().map(|entry| entry.next_retry_at).min(),
            processing: self.is_processing(),
            circuit_breaker: self.breaker.stats(),
        }
    }

    /// Drop every queued retry for `notification_id`
    ///
    /// An attempt already in flight is not cancelled, but it will not be
    /// rescheduled.
    pub fn clear_retries(&self, notification_id: &str) -> usize {
        let removed = self.queue.remove_notification(notification_id);
        if removed > 0 {
            delivery!(level = INFO, notification_id, removed, "Retries cleared");
        }
        removed
    }

    /// Drop every queued retry
    pub fn clear_all_retries(&self) -> usize {
        let removed = self.queue.clear();
        internal!(level = INFO, removed, "Retry queue cleared");
        removed
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use herald_common::MockClock;

    use super::*;
    use crate::{DeliveryError, DeliveryResult, JitterType};

    #[derive(Debug)]
    struct NeverCalled;

    #[async_trait]
    impl NotificationSender for NeverCalled {
        async fn send_to_users(&self, _payload: &Payload) -> Result<DeliveryResult, DeliveryError> {
            Ok(DeliveryResult::delivered(0))
        }
    }

    fn manager(config: RetryConfig) -> (RetryManager, MockClock) {
        let clock = MockClock::new();
        let manager = RetryManager::new(config, Arc::new(NeverCalled), Arc::new(clock.clone()))
            .expect("valid config");
        (manager, clock)
    }

    fn notification(id: &str) -> Notification {
        Notification::with_id(id, Payload::new(["u1"], "Reminder", "Your appointment is tomorrow"))
    }

    #[test]
    fn test_rejects_invalid_config() {
        let err = RetryManager::new(
            RetryConfig {
                max_attempts: 0,
                ..RetryConfig::default()
            },
            Arc::new(NeverCalled),
            Arc::new(MockClock::new()),
        )
        .unwrap_err();
        assert!(matches!(err, RetryError::InvalidConfig(_)));
    }

    #[test]
    fn test_schedule_sets_next_retry_from_backoff() {
        let (manager, clock) = manager(RetryConfig {
            jitter: JitterType::None,
            ..RetryConfig::default()
        });

        manager
            .schedule_retry(RetryRequest::new(&notification("n-1"), "timeout").with_attempt_count(2))
            .expect("schedule");

        let status = manager.get_retry_status("n-1");
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].base_delay_ms, 4000);
        assert_eq!(status[0].total_delay_ms, 4000);
        assert_eq!(status[0].jitter_applied, 0);
        assert_eq!(status[0].remaining_attempts, 1);
        assert_eq!(status[0].next_retry_at, clock.now() + TimeDelta::milliseconds(4000));
        assert_eq!(status[0].circuit_breaker_state, CircuitState::Closed);
    }

    #[test]
    fn test_schedule_refuses_exhausted_notification() {
        let (manager, _clock) = manager(RetryConfig::default());

        let err = manager
            .schedule_retry(RetryRequest::new(&notification("n-2"), "timeout").with_attempt_count(3))
            .unwrap_err();
        assert_eq!(
            err,
            RetryError::AttemptsExhausted {
                notification_id: "n-2".to_string(),
                max_attempts: 3
            }
        );
        assert!(manager.queue().is_empty());
    }

    #[test]
    fn test_every_schedule_gets_a_fresh_id() {
        let (manager, _clock) = manager(RetryConfig::default());
        let first = manager
            .schedule_retry(RetryRequest::new(&notification("n-3"), "e"))
            .expect("schedule");
        let second = manager
            .schedule_retry(RetryRequest::new(&notification("n-3"), "e"))
            .expect("schedule");

        assert_ne!(first, second);
        assert_eq!(manager.get_retry_status("n-3").len(), 2);
    }

    #[test]
    fn test_statistics_and_clearing() {
        let (manager, clock) = manager(RetryConfig {
            jitter: JitterType::None,
            ..RetryConfig::default()
        });

        manager
            .schedule_retry(RetryRequest::new(&notification("a"), "e"))
            .expect("schedule");
        manager
            .schedule_retry(RetryRequest::new(&notification("b"), "e").with_attempt_count(1))
            .expect("schedule");

        let stats = manager.get_queue_statistics();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.due, 0);
        assert_eq!(stats.by_attempt_count.get(&0), Some(&1));
        assert_eq!(stats.by_attempt_count.get(&1), Some(&1));
        assert_eq!(stats.next_retry_at, Some(clock.now() + TimeDelta::seconds(1)));
        assert!(!stats.processing);

        clock.advance(std::time::Duration::from_millis(1500));
        assert_eq!(manager.get_queue_statistics().due, 1);

        assert_eq!(manager.clear_retries("a"), 1);
        assert_eq!(manager.clear_retries("a"), 0);
        assert_eq!(manager.clear_all_retries(), 1);
        assert!(manager.get_retry_status("b").is_empty());
    }
}
