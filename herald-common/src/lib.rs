//! Plumbing shared by every herald crate: logging, shutdown signalling and
//! the clock abstraction the retry and lifecycle machinery read time from.

pub mod clock;
pub mod logging;

pub use clock::{Clock, MockClock, SystemClock};
pub use tracing;

/// Broadcast to background tasks to ask them to wind down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
