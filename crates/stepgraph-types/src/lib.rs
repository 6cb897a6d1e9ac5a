//! Shared data types for stepgraph.
//!
//! Run records, lifecycle events, engine configuration, and the value types
//! exchanged with the external collaborators (task executor, memory,
//! guardrail). Zero runtime dependencies -- only serde, uuid, chrono,
//! thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod flow;
pub mod guardrail;
pub mod memory;
pub mod task;
