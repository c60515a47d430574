//! Error types for the herald-tokens crate.

use thiserror::Error;

use crate::TokenId;

/// Errors raised by a [`crate::TokenStore`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record with this id exists.
    #[error("Token record not found: {0}")]
    NotFound(TokenId),

    /// A record with this id is already stored.
    #[error("Token record already exists: {0}")]
    AlreadyExists(TokenId),

    /// The store is unavailable or misbehaved (lock poisoning, backend outage).
    #[error("Token store error: {0}")]
    Internal(String),
}

/// Errors surfaced by the lifecycle manager.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The underlying store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A lookup by raw token string matched no record.
    #[error("Unknown push token: {0}")]
    UnknownToken(String),

    /// A lifecycle setting is out of bounds.
    #[error("Invalid lifecycle configuration: {0}")]
    InvalidConfig(String),
}

/// Specialized `Result` type for token store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("Lock poisoned: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_lifts_into_token_error() {
        let err: TokenError = StoreError::Internal("connection reset".to_string()).into();
        assert!(matches!(err, TokenError::Store(StoreError::Internal(_))));
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn test_poison_conversion() {
        let lock = std::sync::Mutex::new(());
        let _ = std::panic::catch_unwind(|| {
            let _guard = lock.lock();
            panic!("poison the lock");
        });

        let err: StoreError = lock.lock().map(|_| ()).unwrap_err().into();
        assert!(err.to_string().contains("Lock poisoned"));
    }
}
