//! The boundaries herald talks to the outside world through

use std::collections::BTreeSet;

use async_trait::async_trait;
use herald_tokens::ScoredToken;
use serde::{Deserialize, Serialize};

use crate::{DeliveryError, Payload};

/// Outcome of one `send_to_users` call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub success: bool,
    pub messages_sent: usize,
    pub errors: Vec<String>,
    /// Recipients that received nothing and are worth another attempt
    #[serde(default)]
    pub failed_user_ids: BTreeSet<String>,
}

impl DeliveryResult {
    /// Every recipient was reached
    #[must_use]
    pub fn delivered(messages_sent: usize) -> Self {
        Self {
            success: true,
            messages_sent,
            ..Self::default()
        }
    }

    /// Nothing was delivered to `failed_user_ids`
    #[must_use]
    pub fn failed(error: impl Into<String>, failed_user_ids: BTreeSet<String>) -> Self {
        Self {
            success: false,
            messages_sent: 0,
            errors: vec![error.into()],
            failed_user_ids,
        }
    }

    /// All errors on one line
    #[must_use]
    pub fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            "Delivery reported failure without details".to_string()
        } else {
            self.errors.join("; ")
        }
    }
}

/// Sends a payload to its users
///
/// This is the only side-effecting boundary the retry manager knows about.
#[async_trait]
pub trait NotificationSender: Send + Sync + std::fmt::Debug {
    /// Attempt delivery of `payload` to every user it names
    ///
    /// # Errors
    /// If the attempt could not be made at all. A reported non-success is an
    /// `Ok` with `success == false`.
    async fn send_to_users(&self, payload: &Payload) -> Result<DeliveryResult, DeliveryError>;
}

/// Per-token result reported by a push provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptStatus {
    Delivered,
    Failed(String),
    /// The device uninstalled the app or revoked the token
    DeviceNotRegistered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub token: String,
    pub status: ReceiptStatus,
}

/// Receipts for one provider batch, one per token sent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub receipts: Vec<Receipt>,
}

/// Upstream push service (Expo, FCM, APNs gateway, ...)
///
/// The wire protocol lives behind this trait.
#[async_trait]
pub trait PushProvider: Send + Sync + std::fmt::Debug {
    /// Send `payload` to every token in `tokens`
    ///
    /// # Errors
    /// If the provider could not be reached or answered with an error for the
    /// batch as a whole
    async fn send_batch(
        &self,
        tokens: &[ScoredToken],
        payload: &Payload,
    ) -> Result<BatchOutcome, DeliveryError>;
}
