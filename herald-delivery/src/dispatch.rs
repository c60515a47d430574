//! First-attempt delivery and hand-off to the retry queue

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use herald_common::delivery;
use herald_tokens::{TokenLifecycleManager, UsageContext, UsageStatus};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    DeliveryError, DeliveryResult, Notification, Payload, RetryManager, TemporaryError,
    processor::RetryRequest,
    queue::RetryId,
    sender::{NotificationSender, PushProvider, ReceiptStatus},
};

const fn default_attempt_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Time budget for a single provider call (seconds)
    ///
    /// Default: 30
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_secs: default_attempt_timeout_secs(),
        }
    }
}

impl DeliveryConfig {
    #[must_use]
    pub const fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

/// Delivers payloads to users' devices through a [`PushProvider`]
///
/// Tokens are always resolved through the lifecycle manager, so only tokens
/// that pass validation are ever sent. Provider receipts feed back into token
/// health: failures count towards the per-token failure limit and
/// unregistered devices are deactivated.
#[derive(Debug)]
pub struct TokenDelivery {
    lifecycle: Arc<TokenLifecycleManager>,
    provider: Arc<dyn PushProvider>,
    config: DeliveryConfig,
}

impl TokenDelivery {
    #[must_use]
    pub fn new(
        lifecycle: Arc<TokenLifecycleManager>,
        provider: Arc<dyn PushProvider>,
        config: DeliveryConfig,
    ) -> Self {
        Self {
            lifecycle,
            provider,
            config,
        }
    }

    async fn record_usage(&self, token: &str, status: UsageStatus, error: Option<String>) {
        let context = UsageContext {
            notification_id: None,
            error,
        };

        if let Err(e) = self
            .lifecycle
            .update_token_usage(token, status, &context)
            .await
        {
            warn!(error = %e, "Failed to record push token usage");
        }
    }
}

#[async_trait]
impl NotificationSender for TokenDelivery {
    async fn send_to_users(&self, payload: &Payload) -> Result<DeliveryResult, DeliveryError> {
        payload.validate()?;

        let resolved = self
            .lifecycle
            .get_active_tokens_for_users(payload.user_ids.iter().cloned())
            .await?;

        let mut errors: Vec<String> = resolved
            .invalid_tokens
            .iter()
            .map(|invalid| {
                format!(
                    "Invalid {} token for user {}: {}",
                    invalid.format,
                    invalid.user_id,
                    invalid.errors.join("; ")
                )
            })
            .collect();

        if resolved.tokens.is_empty() {
            errors.push("No deliverable push tokens for any recipient".to_string());
            return Ok(DeliveryResult {
                success: false,
                messages_sent: 0,
                errors,
                failed_user_ids: payload.user_ids.clone(),
            });
        }

        // Users can share a device, so one token string may belong to several
        // records. The provider sees each device once and its receipt counts
        // for every owner.
        let mut owners: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut batch = Vec::with_capacity(resolved.tokens.len());
        for scored in &resolved.tokens {
            let users = owners.entry(scored.token.token.as_str()).or_default();
            if users.is_empty() {
                batch.push(scored.clone());
            }
            users.push(scored.token.user_id.as_str());
        }

        let budget = self.config.attempt_timeout();
        let outcome = tokio::time::timeout(budget, self.provider.send_batch(&batch, payload))
            .await
            .map_err(|_| {
                TemporaryError::Timeout(format!(
                    "push provider did not answer within {}s",
                    budget.as_secs()
                ))
            })??;

        let mut answered = HashSet::new();
        let mut delivered_to = BTreeSet::new();
        let mut messages_sent = 0;

        for receipt in &outcome.receipts {
            let Some(users) = owners.get(receipt.token.as_str()) else {
                warn!("Push provider returned a receipt for a token it was not sent");
                continue;
            };
            if !answered.insert(receipt.token.as_str()) {
                warn!("Push provider returned more than one receipt for a token");
                continue;
            }
            let recipients = users.join(", ");

            match &receipt.status {
                ReceiptStatus::Delivered => {
                    messages_sent += 1;
                    delivered_to.extend(users.iter().map(ToString::to_string));
                    self.record_usage(&receipt.token, UsageStatus::Success, None)
                        .await;
                }
                ReceiptStatus::Failed(reason) => {
                    errors.push(format!("Delivery to user {recipients} failed: {reason}"));
                    self.record_usage(&receipt.token, UsageStatus::Failure, Some(reason.clone()))
                        .await;
                }
                ReceiptStatus::DeviceNotRegistered => {
                    errors.push(format!(
                        "Device for user {recipients} is no longer registered"
                    ));
                    if let Err(e) = self
                        .lifecycle
                        .mark_token_invalid(&receipt.token, "Device not registered")
                        .await
                    {
                        warn!(error = %e, "Failed to deactivate unregistered push token");
                    }
                }
            }
        }

        for (token, users) in &owners {
            if !answered.contains(token) {
                errors.push(format!("No receipt for a token of user {}", users.join(", ")));
            }
        }

        let failed_user_ids: BTreeSet<String> = payload
            .user_ids
            .difference(&delivered_to)
            .cloned()
            .collect();

        debug!(
            recipients = payload.user_ids.len(),
            tokens = batch.len(),
            messages_sent,
            failed = failed_user_ids.len(),
            "Provider batch complete"
        );

        Ok(DeliveryResult {
            success: failed_user_ids.is_empty(),
            messages_sent,
            errors,
            failed_user_ids,
        })
    }
}

/// What happened to a dispatched notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DispatchOutcome {
    /// Every recipient was reached on the first attempt
    Delivered { messages_sent: usize },
    /// Some or all recipients are waiting on the retry queue
    Queued {
        retry_id: RetryId,
        messages_sent: usize,
        pending_users: BTreeSet<String>,
        error: String,
    },
}

/// Entry point for new notifications
///
/// Makes the first attempt through the retry manager's sender and hands
/// anything that failed to the retry queue.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    retries: Arc<RetryManager>,
}

impl Dispatcher {
    #[must_use]
    pub const fn new(retries: Arc<RetryManager>) -> Self {
        Self { retries }
    }

    #[must_use]
    pub const fn retries(&self) -> &Arc<RetryManager> {
        &self.retries
    }

    /// Deliver `notification`, queueing a retry for whoever was missed
    ///
    /// # Errors
    /// Validation failures are returned immediately and never queued. Also
    /// fails if the retry manager refuses the retry.
    pub async fn dispatch(
        &self,
        notification: &Notification,
    ) -> Result<DispatchOutcome, DeliveryError> {
        notification.payload.validate()?;

        let (error, messages_sent, payload) =
            match self.retries.sender().send_to_users(&notification.payload).await {
                Ok(result) if result.success => {
                    delivery!(
                        level = INFO,
                        notification_id = %notification.id,
                        messages_sent = result.messages_sent,
                        "Notification delivered"
                    );
                    return Ok(DispatchOutcome::Delivered {
                        messages_sent: result.messages_sent,
                    });
                }
                Ok(result) => {
                    let pending: BTreeSet<_> = notification
                        .payload
                        .user_ids
                        .intersection(&result.failed_user_ids)
                        .cloned()
                        .collect();
                    let payload = if pending.is_empty() {
                        notification.payload.clone()
                    } else {
                        notification.payload.for_users(pending)
                    };
                    (result.error_summary(), result.messages_sent, payload)
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => (format!("{}: {e}", e.kind()), 0, notification.payload.clone()),
            };

        let pending_users = payload.user_ids.clone();
        let retry_id = self.retries.schedule_retry(RetryRequest {
            notification_id: notification.id.clone(),
            payload,
            error: error.clone(),
            attempt_count: 0,
            original_timestamp: None,
        })?;

        delivery!(
            level = INFO,
            notification_id = %notification.id,
            %retry_id,
            pending = pending_users.len(),
            "Notification queued for retry"
        );

        Ok(DispatchOutcome::Queued {
            retry_id,
            messages_sent,
            pending_users,
            error,
        })
    }
}
