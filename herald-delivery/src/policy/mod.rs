//! Retry policy for the retry manager.

pub mod retry;

pub use retry::{DelayPlan, JitterType, RetryConfig};
