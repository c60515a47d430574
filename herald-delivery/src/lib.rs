//! Retry scheduling, circuit breaking and dispatch for push notifications
//!
//! This crate provides:
//! - A circuit breaker shared by all retry activity
//! - Exponential backoff with pluggable jitter strategies
//! - A retry queue and the manager that drives it, with a cancellable
//!   background worker
//! - The first-attempt dispatch path that resolves tokens and feeds failures
//!   into the retry queue

mod circuit_breaker;
mod dispatch;
mod error;
pub mod policy;
mod processor;
pub mod queue;
mod sender;
mod types;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use dispatch::{DeliveryConfig, DispatchOutcome, Dispatcher, TokenDelivery};
pub use error::{
    DeliveryError, ErrorKind, RetryError, SystemError, TemporaryError, ValidationError,
};
pub use policy::{DelayPlan, JitterType, RetryConfig};
pub use processor::{
    QueueStatistics, RetryManager, RetryRequest, RetryStatus, process::ProcessReport,
    worker::RetryWorker,
};
pub use queue::{FailedNotification, RetryId, RetryQueue};
pub use sender::{
    BatchOutcome, DeliveryResult, NotificationSender, PushProvider, Receipt, ReceiptStatus,
};
pub use types::{Extras, Notification, Payload};
