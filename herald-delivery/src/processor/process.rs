use std::{
    collections::BTreeSet,
    sync::atomic::{AtomicBool, Ordering},
};

use herald_common::delivery;
use serde::Serialize;
use tracing::warn;

use super::{RetryManager, RetryRequest};
use crate::{DeliveryError, DeliveryResult, RetryError, queue::FailedNotification};

/// Counters from one pass over the retry queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessReport {
    /// Due entries examined, skipped ones included
    pub processed: usize,
    pub successful: usize,
    /// Entries finalised as failed and removed from the queue
    pub failed: usize,
    /// Entries withheld because the circuit breaker was open
    pub skipped: usize,
    /// Entries that failed again and went back on the queue
    pub rescheduled: usize,
    /// One message per finalised failure, carrying the last error
    pub errors: Vec<String>,
}

/// Clears the in-flight flag however the pass ends
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// How a failed attempt should be handled
struct Failure {
    error: String,
    retryable: bool,
    /// Users still owed the notification, if narrower than the entry's
    pending_users: Option<BTreeSet<String>>,
}

impl RetryManager {
    /// Attempt every due entry once
    ///
    /// Entries are attempted earliest-due first. While the circuit breaker is
    /// open, entries are skipped and stay queued untouched. A failed attempt
    /// is rescheduled under a new id until `max_attempts` is reached, at which
    /// point the entry is dropped and reported in
    /// [`ProcessReport::errors`].
    ///
    /// # Errors
    /// [`RetryError::AlreadyProcessing`] if another pass is still running; the
    /// queue is left alone in that case.
    pub async fn process_retry_queue(&self) -> Result<ProcessReport, RetryError> {
        if self
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RetryError::AlreadyProcessing);
        }
        let _guard = ProcessingGuard(&self.processing);

        let due = self.queue.due(self.clock.now());
        let pause = self.config.inter_item_delay();
        let mut report = ProcessReport::default();

        for (index, entry) in due.into_iter().enumerate() {
            if index > 0 && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }

            report.processed += 1;

            if !self.breaker.can_execute() {
                report.skipped += 1;
                delivery!(
                    retry_id = %entry.id,
                    notification_id = %entry.notification_id,
                    state = %self.breaker.state(),
                    "Retry withheld by circuit breaker"
                );
                continue;
            }

            let outcome = self.sender.send_to_users(&entry.payload).await;
            self.settle(entry, outcome, &mut report);
        }

        Ok(report)
    }

    fn settle(
        &self,
        entry: FailedNotification,
        outcome: Result<DeliveryResult, DeliveryError>,
        report: &mut ProcessReport,
    ) {
        let failure = match outcome {
            Ok(result) if result.success => {
                self.queue.remove(&entry.id);
                self.breaker.record_success();
                report.successful += 1;
                delivery!(
                    level = INFO,
                    notification_id = %entry.notification_id,
                    attempt = entry.attempt_count + 1,
                    messages_sent = result.messages_sent,
                    "Retry delivered"
                );
                return;
            }
            Ok(result) => Failure {
                error: result.error_summary(),
                retryable: true,
                pending_users: Some(result.failed_user_ids),
            },
            Err(e) => Failure {
                error: format!("{}: {e}", e.kind()),
                retryable: e.is_retryable(),
                pending_users: None,
            },
        };

        // A malformed notification says nothing about the provider's health
        if failure.retryable {
            self.breaker.record_failure();
        } else {
            self.breaker.release_trial();
        }

        if self.queue.remove(&entry.id).is_none() {
            delivery!(
                notification_id = %entry.notification_id,
                "Retry cleared while in flight, not rescheduling"
            );
            return;
        }

        let attempts = entry.attempt_count.saturating_add(1);
        if failure.retryable && self.config.should_retry(attempts) {
            let payload = match failure.pending_users {
                Some(failed) => {
                    let pending: BTreeSet<_> =
                        entry.payload.user_ids.intersection(&failed).cloned().collect();
                    if pending.is_empty() {
                        entry.payload
                    } else {
                        entry.payload.for_users(pending)
                    }
                }
                None => entry.payload,
            };

            self.enqueue(
                RetryRequest {
                    notification_id: entry.notification_id,
                    payload,
                    error: failure.error,
                    attempt_count: attempts,
                    original_timestamp: Some(entry.original_timestamp),
                },
                self.clock.now(),
            );
            report.rescheduled += 1;
            return;
        }

        warn!(
            notification_id = %entry.notification_id,
            attempts,
            error = %failure.error,
            "Notification delivery failed permanently"
        );
        report.failed += 1;
        report.errors.push(format!(
            "Notification {} failed after {attempts} attempt(s): {}",
            entry.notification_id, failure.error
        ));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use herald_common::MockClock;

    use super::*;
    use crate::{JitterType, Notification, Payload, RetryConfig, ValidationError};

    #[derive(Debug)]
    struct Rejecting;

    #[async_trait::async_trait]
    impl crate::NotificationSender for Rejecting {
        async fn send_to_users(&self, _payload: &Payload) -> Result<DeliveryResult, DeliveryError> {
            Err(ValidationError::InvalidToken("bad".into()).into())
        }
    }

    #[tokio::test]
    async fn test_validation_failures_are_final_and_spare_the_breaker() {
        let clock = MockClock::new();
        let manager = RetryManager::new(
            RetryConfig {
                jitter: JitterType::None,
                inter_item_delay_ms: 0,
                circuit_breaker_threshold: 1,
                ..RetryConfig::default()
            },
            Arc::new(Rejecting),
            Arc::new(clock.clone()),
        )
        .expect("config");

        let notification = Notification::with_id("n-1", Payload::new(["u1"], "t", "b"));
        manager
            .schedule_retry(RetryRequest::new(&notification, "first attempt failed"))
            .expect("schedule");
        clock.advance(std::time::Duration::from_secs(1));

        let report = manager.process_retry_queue().await.expect("pass");
        assert_eq!(report.processed, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.rescheduled, 0);
        assert!(report.errors[0].contains("VALIDATION_ERROR"));
        assert!(manager.queue().is_empty());
        assert_eq!(manager.circuit_breaker().stats().failure_count, 0);
    }

    /// Refuses payloads titled "bad", delivers everything else
    #[derive(Debug)]
    struct PickyProvider;

    #[async_trait::async_trait]
    impl crate::NotificationSender for PickyProvider {
        async fn send_to_users(&self, payload: &Payload) -> Result<DeliveryResult, DeliveryError> {
            if payload.title == "bad" {
                return Err(ValidationError::InvalidToken("bad".into()).into());
            }
            Ok(DeliveryResult::delivered(payload.user_ids.len()))
        }
    }

    #[tokio::test]
    async fn test_rejected_trial_hands_the_slot_to_the_next_entry() {
        let clock = MockClock::new();
        let manager = RetryManager::new(
            RetryConfig {
                jitter: JitterType::None,
                inter_item_delay_ms: 0,
                circuit_breaker_threshold: 1,
                circuit_breaker_reset_timeout_ms: 5000,
                ..RetryConfig::default()
            },
            Arc::new(PickyProvider),
            Arc::new(clock.clone()),
        )
        .expect("config");

        let bad = Notification::with_id("n-bad", Payload::new(["u1"], "bad", "b"));
        let good = Notification::with_id("n-good", Payload::new(["u2"], "good", "b"));
        manager
            .schedule_retry(RetryRequest::new(&bad, "first attempt failed"))
            .expect("schedule");
        manager
            .schedule_retry(RetryRequest::new(&good, "first attempt failed"))
            .expect("schedule");

        manager.circuit_breaker().record_failure();
        clock.advance(std::time::Duration::from_secs(5));

        let report = manager.process_retry_queue().await.expect("pass");
        assert_eq!(report.processed, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.successful, 1);
        assert_eq!(report.skipped, 0);
        assert!(manager.queue().is_empty());
        assert_eq!(manager.circuit_breaker().state(), crate::CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_guard_released_after_pass() {
        let manager = RetryManager::new(
            RetryConfig::default(),
            Arc::new(Rejecting),
            Arc::new(MockClock::new()),
        )
        .expect("config");

        assert_eq!(manager.process_retry_queue().await, Ok(ProcessReport::default()));
        assert!(!manager.is_processing());
        assert_eq!(manager.process_retry_queue().await, Ok(ProcessReport::default()));
    }
}
