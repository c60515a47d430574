//! Push token records and the query shape the lifecycle manager needs from a store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a stored token record
///
/// Several records may carry the same raw token string (re-registrations,
/// device migrations), so records are keyed by a ULID rather than the token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenId {
    id: ulid::Ulid,
}

impl TokenId {
    #[must_use]
    pub const fn new(id: ulid::Ulid) -> Self {
        Self { id }
    }

    /// Generate a new unique record id
    #[must_use]
    pub fn generate() -> Self {
        Self {
            id: ulid::Ulid::new(),
        }
    }

    #[must_use]
    pub const fn ulid(&self) -> ulid::Ulid {
        self.id
    }
}

impl std::fmt::Display for TokenId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl Serialize for TokenId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.id.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let id = ulid::Ulid::from_string(&s).map_err(serde::de::Error::custom)?;
        Ok(Self { id })
    }
}

/// Device platform a token was registered from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
    Web,
}

impl Platform {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ios => "ios",
            Self::Android => "android",
            Self::Web => "web",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of account that owns a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Client,
    Staff,
    Admin,
}

impl UserType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Staff => "staff",
            Self::Admin => "admin",
        }
    }
}

impl std::fmt::Display for UserType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reason a token was found unusable, kept in registration order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrorRecord {
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// Rolling health information maintained by the lifecycle manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthMetrics {
    /// When the health score was last recomputed
    pub last_health_check: Option<DateTime<Utc>>,
    /// Last computed health score, 0 to 100
    pub validation_score: u8,
    pub is_healthy: bool,
    /// Consecutive delivery failures, reset by any success
    pub failure_count: u32,
    pub success_count: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for HealthMetrics {
    fn default() -> Self {
        Self {
            last_health_check: None,
            validation_score: 0,
            is_healthy: true,
            failure_count: 0,
            success_count: 0,
            last_success: None,
            last_failure: None,
            last_error: None,
        }
    }
}

/// A device push token as kept in the token store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushToken {
    pub id: TokenId,
    pub user_id: String,
    pub token: String,
    pub platform: Platform,
    pub is_active: bool,
    pub user_type: UserType,
    pub last_used: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub device_id: Option<String>,
    pub device_name: Option<String>,
    pub validation_errors: Vec<ValidationErrorRecord>,
    pub health_metrics: HealthMetrics,
}

impl PushToken {
    /// A freshly registered, active token
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        token: impl Into<String>,
        platform: Platform,
        user_type: UserType,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TokenId::generate(),
            user_id: user_id.into(),
            token: token.into(),
            platform,
            is_active: true,
            user_type,
            last_used: now,
            created_at: now,
            updated_at: now,
            device_id: None,
            device_name: None,
            validation_errors: Vec::new(),
            health_metrics: HealthMetrics::default(),
        }
    }

    #[must_use]
    pub fn with_device(
        mut self,
        device_id: Option<String>,
        device_name: Option<String>,
    ) -> Self {
        self.device_id = device_id;
        self.device_name = device_name;
        self
    }

    /// Mark the token inactive and record why.
    ///
    /// Returns `false` if the token was already inactive, in which case the
    /// record is left untouched.
    pub fn deactivate(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }

        self.is_active = false;
        self.updated_at = now;
        self.validation_errors.push(ValidationErrorRecord {
            error: reason.into(),
            timestamp: now,
        });
        true
    }
}

/// Filter understood by every [`crate::TokenStore`]
///
/// All set fields must match (logical AND). An empty query matches every
/// record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenQuery {
    pub user_id: Option<String>,
    pub token: Option<String>,
    pub is_active: Option<bool>,
    pub last_used_before: Option<DateTime<Utc>>,
    pub updated_before: Option<DateTime<Utc>>,
}

impl TokenQuery {
    /// Matches every record
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches active records only
    #[must_use]
    pub fn active() -> Self {
        Self {
            is_active: Some(true),
            ..Self::default()
        }
    }

    /// Matches inactive records only
    #[must_use]
    pub fn inactive() -> Self {
        Self {
            is_active: Some(false),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    #[must_use]
    pub const fn last_used_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.last_used_before = Some(cutoff);
        self
    }

    #[must_use]
    pub const fn updated_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.updated_before = Some(cutoff);
        self
    }

    /// Whether `record` satisfies every constraint of this query
    #[must_use]
    pub fn matches(&self, record: &PushToken) -> bool {
        self.user_id.as_ref().is_none_or(|u| *u == record.user_id)
            && self.token.as_ref().is_none_or(|t| *t == record.token)
            && self.is_active.is_none_or(|a| a == record.is_active)
            && self
                .last_used_before
                .is_none_or(|cutoff| record.last_used < cutoff)
            && self
                .updated_before
                .is_none_or(|cutoff| record.updated_at < cutoff)
    }
}
