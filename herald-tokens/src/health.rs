//! Token health scoring
//!
//! A heuristic 0-100 rating built from validity, age, recency of use, format
//! modernity and how much device metadata was registered with the token.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{PushToken, ValidationResult};

/// Tokens scoring below this are deactivated
pub const CLEANUP_THRESHOLD: u8 = 25;

/// Tokens scoring below this are reported as unhealthy
pub const HEALTHY_THRESHOLD: u8 = 50;

const VALIDITY_POINTS: u32 = 40;

/// Coarse band a score falls into, used for distribution statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreBucket {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
}

impl ScoreBucket {
    #[must_use]
    pub const fn of(score: u8) -> Self {
        match score {
            80..=u8::MAX => Self::Excellent,
            60..=79 => Self::Good,
            HEALTHY_THRESHOLD..=59 => Self::Fair,
            CLEANUP_THRESHOLD..=49 => Self::Poor,
            _ => Self::Critical,
        }
    }
}

/// Computes token health scores
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenHealthScorer;

impl TokenHealthScorer {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Score `token` given its current `validation`, as of `now`
    #[must_use]
    pub fn score(&self, token: &PushToken, validation: &ValidationResult, now: DateTime<Utc>) -> u8 {
        let validity = if validation.is_valid { VALIDITY_POINTS } else { 0 };

        let age_days = (now - token.created_at).num_days();
        let age = match age_days {
            ..=6 => 20,
            7..=29 => 15,
            30..=89 => 10,
            _ => 5,
        };

        let idle_days = (now - token.last_used).num_days();
        let recency = match idle_days {
            ..=0 => 20,
            1..=6 => 15,
            7..=29 => 10,
            _ => 5,
        };

        let format = if validation.format.is_modern() {
            10
        } else if validation.format.is_legacy() {
            5
        } else {
            0
        };

        let device = match (&token.device_id, &token.device_name) {
            (Some(_), Some(_)) => 10,
            (Some(_), None) | (None, Some(_)) => 5,
            (None, None) => 0,
        };

        let total = (validity + age + recency + format + device).min(100);
        u8::try_from(total).unwrap_or(100)
    }

    /// Whether a score counts as healthy
    #[must_use]
    pub const fn is_healthy(score: u8) -> bool {
        score >= HEALTHY_THRESHOLD
    }

    /// Whether a score is low enough that the token should be retired
    #[must_use]
    pub const fn needs_cleanup(score: u8) -> bool {
        score < CLEANUP_THRESHOLD
    }
}
