//! Typed error handling for delivery and retry operations.
//!
//! Delivery errors are split by what the retry engine should do with them:
//! - Validation failures (malformed payload or token) are never retried
//! - Temporary failures (provider rejection, timeout, API error) are retried
//!   with backoff up to the configured attempt limit
//! - System errors are internal problems, retried like API errors

use herald_tokens::TokenError;
use thiserror::Error;

/// Top-level delivery error type.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The notification or token is malformed; retrying cannot help.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The provider could not deliver right now.
    #[error("Temporary failure: {0}")]
    Temporary(#[from] TemporaryError),

    /// Something inside herald went wrong.
    #[error("System error: {0}")]
    System(#[from] SystemError),
}

/// Problems with the notification itself.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Notification has no recipients")]
    NoRecipients,

    #[error("Notification title is empty")]
    EmptyTitle,

    #[error("Notification body is empty")]
    EmptyBody,

    /// A token was rejected by format validation.
    #[error("Invalid push token: {0}")]
    InvalidToken(String),
}

/// Failures that may succeed on a later attempt.
#[derive(Debug, Error)]
pub enum TemporaryError {
    /// The provider answered, but did not deliver.
    #[error("Provider rejected delivery: {0}")]
    ProviderRejected(String),

    /// The provider did not answer within the attempt budget.
    #[error("Delivery attempt timed out: {0}")]
    Timeout(String),

    /// The provider call itself failed (transport, HTTP status, malformed
    /// response).
    #[error("Push provider API error: {0}")]
    Api(String),
}

/// Internal errors.
#[derive(Debug, Error)]
pub enum SystemError {
    /// The token store failed while resolving or updating tokens.
    #[error("Token store error: {0}")]
    Tokens(#[from] TokenError),

    /// The retry engine refused a notification.
    #[error("Retry scheduling failed: {0}")]
    Retry(#[from] RetryError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised by the retry manager.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RetryError {
    /// The notification has already used every allowed attempt.
    #[error("Notification {notification_id} has exhausted all {max_attempts} retry attempts")]
    AttemptsExhausted {
        notification_id: String,
        max_attempts: u32,
    },

    /// Another pass over the retry queue is still running.
    #[error("Retry processing already in progress")]
    AlreadyProcessing,

    /// The retry configuration violates its bounds.
    #[error("Invalid retry configuration: {0}")]
    InvalidConfig(String),
}

/// Coarse classification reported alongside failed deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ValidationError,
    DeliveryFailure,
    Timeout,
    ApiError,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::DeliveryFailure => "DELIVERY_FAILURE",
            Self::Timeout => "TIMEOUT",
            Self::ApiError => "API_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DeliveryError {
    /// Returns `true` if the retry engine should try again.
    ///
    /// Timeouts and API errors are treated as delivery failures for retry
    /// purposes; only validation failures are final.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::Validation(_))
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::ValidationError,
            Self::Temporary(TemporaryError::ProviderRejected(_)) => ErrorKind::DeliveryFailure,
            Self::Temporary(TemporaryError::Timeout(_)) => ErrorKind::Timeout,
            Self::Temporary(TemporaryError::Api(_)) | Self::System(_) => ErrorKind::ApiError,
        }
    }
}

impl From<TokenError> for DeliveryError {
    fn from(error: TokenError) -> Self {
        Self::System(SystemError::Tokens(error))
    }
}

impl From<RetryError> for DeliveryError {
    fn from(error: RetryError) -> Self {
        Self::System(SystemError::Retry(error))
    }
}
