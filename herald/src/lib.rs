//! Herald keeps push notifications flowing when providers and devices do
//! not cooperate.
//!
//! The engine is embedded: the host brings a [`herald_tokens::TokenStore`]
//! and a [`herald_delivery::PushProvider`], and [`Herald::start`] wires them
//! into token resolution, first-attempt dispatch, the retry worker and the
//! periodic token sweep.

pub mod controller;
pub mod sweep;

pub use controller::{CONFIG_ENV, Herald, Running, shutdown_on};
pub use sweep::Sweeper;
