use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::TokenLifecycleManager;
use crate::{PushToken, TokenQuery};

/// Inactive records untouched for this long past the expiry cutoff are deleted
pub const INACTIVE_RETENTION_DAYS: i64 = 90;

/// Counters and collected failures from one cleanup sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub expired_tokens: usize,
    pub invalid_format_tokens: usize,
    pub duplicate_tokens: usize,
    pub deleted_tokens: usize,
    pub errors: Vec<String>,
}

impl CleanupReport {
    #[must_use]
    pub const fn total_deactivated(&self) -> usize {
        self.expired_tokens + self.invalid_format_tokens + self.duplicate_tokens
    }
}

impl TokenLifecycleManager {
    /// Retire stale, malformed and duplicated tokens, then purge old inactive
    /// records
    ///
    /// Runs in order: expiry, format re-validation, duplicate resolution, hard
    /// delete. Each phase is independent: a failing query or update is
    /// recorded in [`CleanupReport::errors`] and the sweep carries on.
    pub async fn cleanup_invalid_tokens(&self, max_age_in_days: u32) -> CleanupReport {
        let now = self.now();
        let cutoff = now - TimeDelta::days(i64::from(max_age_in_days));
        let mut errors = Vec::new();

        let mut report = CleanupReport {
            expired_tokens: self
                .expire_unused(cutoff, max_age_in_days, now, &mut errors)
                .await,
            invalid_format_tokens: self.deactivate_malformed(now, &mut errors).await,
            duplicate_tokens: self.resolve_duplicates(now, &mut errors).await,
            ..CleanupReport::default()
        };

        let delete_cutoff = cutoff - TimeDelta::days(INACTIVE_RETENTION_DAYS);
        match self
            .store
            .delete_many(&TokenQuery::inactive().updated_before(delete_cutoff))
            .await
        {
            Ok(deleted) => report.deleted_tokens = deleted,
            Err(e) => errors.push(format!("Failed to delete inactive tokens: {e}")),
        }
        report.errors = errors;

        info!(
            expired = report.expired_tokens,
            invalid_format = report.invalid_format_tokens,
            duplicates = report.duplicate_tokens,
            deleted = report.deleted_tokens,
            errors = report.errors.len(),
            "Token cleanup complete"
        );

        report
    }

    async fn expire_unused(
        &self,
        cutoff: DateTime<Utc>,
        max_age_in_days: u32,
        now: DateTime<Utc>,
        errors: &mut Vec<String>,
    ) -> usize {
        let records = match self
            .store
            .find(&TokenQuery::active().last_used_before(cutoff))
            .await
        {
            Ok(records) => records,
            Err(e) => {
                errors.push(format!("Failed to query expired tokens: {e}"));
                return 0;
            }
        };

        let reason = format!("Token expired: not used in the last {max_age_in_days} days");
        let mut expired = 0;
        for record in records {
            if self.retire(record, &reason, now, errors).await {
                expired += 1;
            }
        }

        expired
    }

    async fn deactivate_malformed(&self, now: DateTime<Utc>, errors: &mut Vec<String>) -> usize {
        let records = match self.store.find(&TokenQuery::active()).await {
            Ok(records) => records,
            Err(e) => {
                errors.push(format!("Failed to query active tokens for validation: {e}"));
                return 0;
            }
        };

        let mut deactivated = 0;
        for record in records {
            let validation = self.validator.validate(&record.token);
            if validation.is_valid {
                continue;
            }

            let reason = format!("Invalid token format: {}", validation.error_summary());
            if self.retire(record, &reason, now, errors).await {
                deactivated += 1;
            }
        }

        deactivated
    }

    /// Keep only the most recently updated active record per raw token
    async fn resolve_duplicates(&self, now: DateTime<Utc>, errors: &mut Vec<String>) -> usize {
        let records = match self.store.find(&TokenQuery::active()).await {
            Ok(records) => records,
            Err(e) => {
                errors.push(format!("Failed to query active tokens for duplicates: {e}"));
                return 0;
            }
        };

        let mut by_token: BTreeMap<String, Vec<PushToken>> = BTreeMap::new();
        for record in records {
            by_token.entry(record.token.clone()).or_default().push(record);
        }

        let mut superseded = 0;
        for (_, mut group) in by_token.into_iter().filter(|(_, group)| group.len() > 1) {
            group.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
            let keep = group.remove(0);
            debug!(
                token_id = %keep.id,
                duplicates = group.len(),
                "Resolving duplicate push token records"
            );

            let reason = format!("Duplicate token: superseded by record {}", keep.id);
            for record in group {
                if self.retire(record, &reason, now, errors).await {
                    superseded += 1;
                }
            }
        }

        superseded
    }

    async fn retire(
        &self,
        mut record: PushToken,
        reason: &str,
        now: DateTime<Utc>,
        errors: &mut Vec<String>,
    ) -> bool {
        if !record.deactivate(reason, now) {
            return false;
        }

        match self.store.update(&record).await {
            Ok(()) => true,
            Err(e) => {
                warn!(token_id = %record.id, error = %e, "Failed to deactivate push token");
                errors.push(format!("Failed to deactivate token {}: {e}", record.id));
                false
            }
        }
    }
}
