//! Token lifecycle orchestration
//!
//! The lifecycle manager sits between the token store and anything that wants
//! to deliver a notification. It is the only gate through which tokens reach
//! a push provider, and it is responsible for retiring tokens that fail
//! validation, go stale, or keep failing delivery.

pub mod cleanup;
pub mod refresh;

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use herald_common::Clock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    Platform, PushToken, TokenError, TokenFormat, TokenHealthScorer, TokenQuery, TokenValidator,
    UserType, store::TokenStore,
};

pub use cleanup::CleanupReport;
pub use refresh::{BreakdownStats, HealthRefreshReport};

const fn default_max_age_in_days() -> u32 {
    30
}

const fn default_cleanup_interval_secs() -> u64 {
    86400 // once a day
}

const fn default_health_batch_size() -> usize {
    100
}

const fn default_max_consecutive_failures() -> u32 {
    5
}

/// Tunables for token retirement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Tokens unused for longer than this are deactivated by cleanup
    ///
    /// Default: 30 days
    #[serde(default = "default_max_age_in_days")]
    pub max_age_in_days: u32,

    /// How often the background sweep runs cleanup and health refresh (seconds)
    ///
    /// Default: 86400 seconds (24 hours)
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Number of tokens scored per batch during health refresh
    ///
    /// Default: 100
    #[serde(default = "default_health_batch_size")]
    pub health_batch_size: usize,

    /// Consecutive delivery failures after which a token is deactivated
    ///
    /// Default: 5
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_age_in_days: default_max_age_in_days(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            health_batch_size: default_health_batch_size(),
            max_consecutive_failures: default_max_consecutive_failures(),
        }
    }
}

impl LifecycleConfig {
    /// Check the bounds the sweep and the failure limit rely on
    ///
    /// # Errors
    /// [`TokenError::InvalidConfig`] naming the first violated bound
    pub fn validate(&self) -> Result<(), TokenError> {
        let zero = if self.max_age_in_days == 0 {
            "max_age_in_days"
        } else if self.cleanup_interval_secs == 0 {
            "cleanup_interval_secs"
        } else if self.health_batch_size == 0 {
            "health_batch_size"
        } else if self.max_consecutive_failures == 0 {
            "max_consecutive_failures"
        } else {
            return Ok(());
        };

        Err(TokenError::InvalidConfig(format!("{zero} must be at least 1")))
    }
}

/// A token that passed validation, with its current health score
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoredToken {
    pub token: PushToken,
    pub format: TokenFormat,
    pub score: u8,
}

/// A token that failed validation during resolution and was deactivated
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidToken {
    pub user_id: String,
    pub token: String,
    pub format: TokenFormat,
    pub errors: Vec<String>,
}

/// Counters describing one resolution pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionStats {
    pub requested_users: usize,
    pub users_with_tokens: usize,
    pub valid_tokens: usize,
    pub invalid_tokens: usize,
    pub by_platform: BTreeMap<Platform, usize>,
}

/// Result of [`TokenLifecycleManager::get_active_tokens_for_users`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActiveTokens {
    pub tokens: Vec<ScoredToken>,
    pub invalid_tokens: Vec<InvalidToken>,
    /// Users left without a single deliverable token
    pub missing_users: Vec<String>,
    pub stats: ResolutionStats,
}

/// Outcome of a delivery to a single token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UsageStatus {
    Success,
    Failure,
}

/// Extra information recorded alongside a usage update
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageContext {
    pub notification_id: Option<String>,
    pub error: Option<String>,
}

/// What a usage update changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageUpdate {
    pub updated: usize,
    pub deactivated: usize,
}

/// A device registration handed over by the registration endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub user_id: String,
    pub token: String,
    pub platform: Platform,
    pub user_type: UserType,
    pub device_id: Option<String>,
    pub device_name: Option<String>,
}

/// Validates, scores and retires push tokens held in a [`TokenStore`]
#[derive(Debug)]
pub struct TokenLifecycleManager {
    pub(crate) store: Arc<dyn TokenStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: LifecycleConfig,
    pub(crate) validator: TokenValidator,
    pub(crate) scorer: TokenHealthScorer,
}

impl TokenLifecycleManager {
    #[must_use]
    pub fn new(store: Arc<dyn TokenStore>, clock: Arc<dyn Clock>, config: LifecycleConfig) -> Self {
        Self {
            store,
            clock,
            config,
            validator: TokenValidator::new(),
            scorer: TokenHealthScorer::new(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Resolve the deliverable tokens for a set of users
    ///
    /// Every active token is validated; valid ones are scored and returned,
    /// invalid ones are deactivated on the spot and reported separately.
    /// Deactivation failures are logged and otherwise ignored.
    ///
    /// # Errors
    /// If the store cannot be queried. Resolution decides who receives a
    /// notification at all, so it does not degrade to a partial answer.
    pub async fn get_active_tokens_for_users<I, S>(
        &self,
        user_ids: I,
    ) -> Result<ActiveTokens, TokenError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let users: BTreeSet<String> = user_ids.into_iter().map(Into::into).collect();
        let now = self.now();

        let mut result = ActiveTokens {
            stats: ResolutionStats {
                requested_users: users.len(),
                ..ResolutionStats::default()
            },
            ..ActiveTokens::default()
        };

        for user_id in users {
            let records = self.store.find(&TokenQuery::active().user(&user_id)).await?;
            let mut delivered_to_user = false;

            // Never hand out inactive records, whatever the backend returned
            for mut record in records.into_iter().filter(|record| record.is_active) {
                let validation = self.validator.validate(&record.token);

                if validation.is_valid {
                    let score = self.scorer.score(&record, &validation, now);
                    *result.stats.by_platform.entry(record.platform).or_default() += 1;
                    result.stats.valid_tokens += 1;
                    result.tokens.push(ScoredToken {
                        token: record,
                        format: validation.format,
                        score,
                    });
                    delivered_to_user = true;
                    continue;
                }

                let reason = format!("Invalid token format: {}", validation.error_summary());
                warn!(
                    user_id = %record.user_id,
                    token_id = %record.id,
                    format = %validation.format,
                    reason = %reason,
                    "Deactivating invalid push token"
                );

                if record.deactivate(reason, now)
                    && let Err(e) = self.store.update(&record).await
                {
                    warn!(
                        token_id = %record.id,
                        error = %e,
                        "Failed to persist deactivation of invalid push token"
                    );
                }

                result.stats.invalid_tokens += 1;
                result.invalid_tokens.push(InvalidToken {
                    user_id: record.user_id,
                    token: record.token,
                    format: validation.format,
                    errors: validation.errors,
                });
            }

            if delivered_to_user {
                result.stats.users_with_tokens += 1;
            } else {
                result.missing_users.push(user_id);
            }
        }

        debug!(
            requested = result.stats.requested_users,
            valid = result.stats.valid_tokens,
            invalid = result.stats.invalid_tokens,
            missing = result.missing_users.len(),
            "Resolved push tokens"
        );

        Ok(result)
    }

    /// Deactivate every active record carrying `token`
    ///
    /// Idempotent: an already inactive token is left alone and reported as
    /// zero records changed.
    ///
    /// # Errors
    /// If no record carries `token`, or the store fails
    pub async fn mark_token_invalid(&self, token: &str, reason: &str) -> Result<usize, TokenError> {
        let records = self.store.find(&TokenQuery::all().token(token)).await?;
        if records.is_empty() {
            return Err(TokenError::UnknownToken(token.to_string()));
        }

        let now = self.now();
        let mut changed = 0;

        for mut record in records {
            if record.deactivate(reason, now) {
                self.store.update(&record).await?;
                changed += 1;
                info!(
                    user_id = %record.user_id,
                    token_id = %record.id,
                    reason,
                    "Push token marked invalid"
                );
            }
        }

        Ok(changed)
    }

    /// Record the outcome of a delivery to `token`
    ///
    /// Success clears the consecutive failure count. Failure increments it,
    /// and once it reaches `max_consecutive_failures` the token is
    /// deactivated. This is a per-token breaker, independent of the retry
    /// engine's circuit breaker.
    ///
    /// # Errors
    /// If no active record carries `token`, or the store fails
    pub async fn update_token_usage(
        &self,
        token: &str,
        status: UsageStatus,
        context: &UsageContext,
    ) -> Result<UsageUpdate, TokenError> {
        let records = self.store.find(&TokenQuery::active().token(token)).await?;
        if records.is_empty() {
            return Err(TokenError::UnknownToken(token.to_string()));
        }

        let now = self.now();
        let mut update = UsageUpdate::default();

        for mut record in records {
            let metrics = &mut record.health_metrics;

            match status {
                UsageStatus::Success => {
                    metrics.failure_count = 0;
                    metrics.success_count = metrics.success_count.saturating_add(1);
                    metrics.last_success = Some(now);
                    record.last_used = now;
                    record.updated_at = now;
                }
                UsageStatus::Failure => {
                    metrics.failure_count = metrics.failure_count.saturating_add(1);
                    metrics.last_failure = Some(now);
                    if let Some(error) = &context.error {
                        metrics.last_error = Some(error.clone());
                    }
                    record.updated_at = now;

                    let failures = metrics.failure_count;
                    if failures >= self.config.max_consecutive_failures
                        && record.deactivate(
                            format!("Deactivated after {failures} consecutive delivery failures"),
                            now,
                        )
                    {
                        warn!(
                            user_id = %record.user_id,
                            token_id = %record.id,
                            failures,
                            notification_id = context.notification_id.as_deref().unwrap_or("-"),
                            "Push token deactivated after repeated delivery failures"
                        );
                        update.deactivated += 1;
                    }
                }
            }

            self.store.update(&record).await?;
            update.updated += 1;
        }

        Ok(update)
    }

    /// Store a device registration, reactivating an existing record for the
    /// same user and token instead of duplicating it
    ///
    /// # Errors
    /// If the store fails
    pub async fn register_token(&self, registration: Registration) -> Result<PushToken, TokenError> {
        let now = self.now();
        let existing = self
            .store
            .find(
                &TokenQuery::all()
                    .user(&registration.user_id)
                    .token(&registration.token),
            )
            .await?;

        if let Some(mut record) = existing.into_iter().max_by_key(|r| r.updated_at) {
            record.is_active = true;
            record.platform = registration.platform;
            record.user_type = registration.user_type;
            record.last_used = now;
            record.updated_at = now;
            record.device_id = registration.device_id.or(record.device_id);
            record.device_name = registration.device_name.or(record.device_name);
            record.health_metrics.failure_count = 0;

            self.store.update(&record).await?;
            debug!(user_id = %record.user_id, token_id = %record.id, "Push token re-registered");
            return Ok(record);
        }

        let record = PushToken::new(
            registration.user_id,
            registration.token,
            registration.platform,
            registration.user_type,
            now,
        )
        .with_device(registration.device_id, registration.device_name);

        self.store.insert(record.clone()).await?;
        debug!(user_id = %record.user_id, token_id = %record.id, "Push token registered");
        Ok(record)
    }
}
