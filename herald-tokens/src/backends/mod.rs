//! Token store implementations
//!
//! - `memory`: in-process storage for tests and single-node deployments
//! - `test`: a memory store with injectable failures

pub mod memory;

pub use memory::MemoryTokenStore;
pub use test::TestTokenStore;
