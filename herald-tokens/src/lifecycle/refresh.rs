use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::TokenLifecycleManager;
use crate::{
    Platform, ScoreBucket, TokenHealthScorer, TokenQuery, UserType, health::CLEANUP_THRESHOLD,
};

/// Healthy and unhealthy counts for one slice of the token population
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BreakdownStats {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
}

impl BreakdownStats {
    const fn record(&mut self, healthy: bool) {
        self.total += 1;
        if healthy {
            self.healthy += 1;
        } else {
            self.unhealthy += 1;
        }
    }
}

/// Outcome of [`TokenLifecycleManager::refresh_token_health`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthRefreshReport {
    pub total_checked: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    /// Tokens whose score fell below the cleanup threshold and were retired
    pub deactivated: usize,
    pub by_platform: BTreeMap<Platform, BreakdownStats>,
    pub by_user_type: BTreeMap<UserType, BreakdownStats>,
    pub score_distribution: BTreeMap<ScoreBucket, usize>,
    pub errors: Vec<String>,
}

impl TokenLifecycleManager {
    /// Recompute and persist the health score of every active token
    ///
    /// Tokens are processed in batches of `health_batch_size`. Any token
    /// scoring below [`CLEANUP_THRESHOLD`] is deactivated. Failures to persist
    /// a record are collected and do not stop the pass.
    pub async fn refresh_token_health(&self) -> HealthRefreshReport {
        let mut report = HealthRefreshReport::default();

        let records = match self.store.find(&TokenQuery::active()).await {
            Ok(records) => records,
            Err(e) => {
                report
                    .errors
                    .push(format!("Failed to query active tokens: {e}"));
                return report;
            }
        };

        let now = self.now();
        let batch_size = self.config.health_batch_size.max(1);

        for (batch_index, batch) in records.chunks(batch_size).enumerate() {
            debug!(batch = batch_index, size = batch.len(), "Scoring token batch");

            for record in batch {
                let mut record = record.clone();
                let validation = self.validator.validate(&record.token);
                let score = self.scorer.score(&record, &validation, now);
                let healthy = TokenHealthScorer::is_healthy(score);

                record.health_metrics.validation_score = score;
                record.health_metrics.is_healthy = healthy;
                record.health_metrics.last_health_check = Some(now);

                report.total_checked += 1;
                *report
                    .score_distribution
                    .entry(ScoreBucket::of(score))
                    .or_default() += 1;
                report
                    .by_platform
                    .entry(record.platform)
                    .or_default()
                    .record(healthy);
                report
                    .by_user_type
                    .entry(record.user_type)
                    .or_default()
                    .record(healthy);
                if healthy {
                    report.healthy += 1;
                } else {
                    report.unhealthy += 1;
                }

                let retire = TokenHealthScorer::needs_cleanup(score)
                    && record.deactivate(
                        format!("Health score {score} below threshold {CLEANUP_THRESHOLD}"),
                        now,
                    );
                if !retire {
                    record.updated_at = now;
                }

                match self.store.update(&record).await {
                    Ok(()) if retire => {
                        report.deactivated += 1;
                        debug!(token_id = %record.id, score, "Deactivated unhealthy push token");
                    }
                    Ok(()) => {}
                    Err(e) => {
                        warn!(token_id = %record.id, error = %e, "Failed to persist token health");
                        report
                            .errors
                            .push(format!("Failed to update token {}: {e}", record.id));
                    }
                }
            }
        }

        info!(
            checked = report.total_checked,
            healthy = report.healthy,
            unhealthy = report.unhealthy,
            deactivated = report.deactivated,
            "Token health refresh complete"
        );

        report
    }
}
