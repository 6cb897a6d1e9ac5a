//! Lifecycle event distribution.
//!
//! Provides an `EventBus` that fans `FlowEvent` messages out to all
//! subscribers via a `tokio::sync::broadcast` channel.

pub mod bus;

pub use bus::EventBus;
