//! Step-graph workflow engine.
//!
//! - `trigger` -- start, step-completion and signal triggers with `all`/`any`
//! - `step` -- step definitions and the `Update` a handler returns
//! - `graph` -- graph builder and structural validation
//! - `parallel` -- fan-out cohorts and their join
//! - `looping` -- bounded loops over an interior stage sequence
//! - `scheduler` -- trigger-driven execution of a built graph
//! - `context` -- handles given to step and element code
//! - `run` -- token meter and the record a run returns
//! - `retry` -- opt-in retries for handler code
//! - `error` -- build-time and run-time errors

pub mod context;
pub mod error;
pub mod graph;
pub mod looping;
pub mod parallel;
pub mod retry;
pub mod run;
pub mod scheduler;
pub mod step;
pub mod trigger;

#[cfg(test)]
mod scenarios;

pub use context::{ElementContext, StepContext};
pub use error::{ElementFailure, FlowError, GraphConfigurationError, PartialCohortFailure};
pub use graph::{FlowGraph, FlowGraphBuilder, GraphDescription, StepDescription};
pub use looping::LoopController;
pub use parallel::{CohortPolicy, ParallelGroup};
pub use retry::RetryPolicy;
pub use run::{RunOutput, TokenMeter};
pub use scheduler::{Scheduler, SchedulerBuilder};
pub use step::{Step, Update};
pub use trigger::Trigger;

/// Shared state carried through a run.
///
/// Handlers read a snapshot and return an `Update`; the scheduler clones the
/// state only when a mutation lands while a snapshot is still held.
pub trait FlowState: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> FlowState for T {}
