//! Push token validation, health scoring and lifecycle management
//!
//! Tokens only ever reach a push provider through
//! [`TokenLifecycleManager::get_active_tokens_for_users`], which validates
//! every candidate and retires the ones that no longer pass.

pub mod backends;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod store;
pub mod types;
pub mod validator;

pub use backends::{MemoryTokenStore, TestTokenStore};
pub use error::{Result, StoreError, TokenError};
pub use health::{CLEANUP_THRESHOLD, HEALTHY_THRESHOLD, ScoreBucket, TokenHealthScorer};
pub use lifecycle::{
    ActiveTokens, BreakdownStats, CleanupReport, HealthRefreshReport, InvalidToken,
    LifecycleConfig, Registration, ResolutionStats, ScoredToken, TokenLifecycleManager,
    UsageContext, UsageStatus, UsageUpdate,
};
pub use store::TokenStore;
pub use types::{
    HealthMetrics, Platform, PushToken, TokenId, TokenQuery, UserType, ValidationErrorRecord,
};
pub use validator::{TokenFormat, TokenMetadata, TokenValidator, ValidationResult};
