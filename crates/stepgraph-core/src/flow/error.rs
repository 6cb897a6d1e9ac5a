//! Error types for graph construction and run execution.
//!
//! `GraphConfigurationError` is only ever returned by
//! `FlowGraphBuilder::build`; a built graph cannot produce one. Everything a
//! run can fail with is a `FlowError`.

use stepgraph_types::error::{GuardrailError, MemoryError, TaskExecutionError};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Build time
// ---------------------------------------------------------------------------

/// Structural defects detected while building a flow graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphConfigurationError {
    #[error("graph has no steps")]
    Empty,

    #[error("step name must not be empty")]
    EmptyStepName,

    #[error("duplicate step name '{0}'")]
    DuplicateStep(String),

    #[error("no step is triggered by start")]
    NoStartStep,

    #[error("multiple steps are triggered by start: {0:?}")]
    MultipleStartSteps(Vec<String>),

    #[error("step '{step}' nests the start trigger inside a combinator")]
    NestedStart { step: String },

    #[error("step '{step}' has an empty trigger combinator")]
    EmptyCombinator { step: String },

    #[error("step '{step}' references unknown step '{reference}'")]
    UnknownStep { step: String, reference: String },

    #[error("step '{step}' listens for signal '{signal}' that no router declares")]
    UnknownSignal { step: String, signal: String },

    #[error("step '{step}' triggers on router '{router}' by name; listen for its signals instead")]
    RouterReferenced { step: String, router: String },

    #[error("step '{step}' references '{interior}', which is interior to loop '{loop_name}'")]
    InteriorStepReferenced {
        step: String,
        interior: String,
        loop_name: String,
    },

    #[error("router '{0}' declares no signals")]
    RouterWithoutSignals(String),

    #[error("router '{router}' declares signal '{signal}' twice")]
    DuplicateSignal { router: String, signal: String },

    #[error("router '{0}' cannot be a terminal step")]
    TerminalRouter(String),

    #[error("loop '{0}' has no iteration cap")]
    UncappedLoop(String),

    #[error("loop '{0}' has no interior steps")]
    EmptyLoop(String),

    #[error("loop '{loop_name}' checks convergence after unknown interior step '{step}'")]
    UnknownCheckStep { loop_name: String, step: String },

    #[error("graph declares no terminal step")]
    NoTerminal,

    #[error("no terminal step is reachable from start (terminals: {0:?})")]
    UnreachableTerminal(Vec<String>),

    #[error("trigger cycle detected involving step '{0}'")]
    CycleDetected(String),
}

// ---------------------------------------------------------------------------
// Run time
// ---------------------------------------------------------------------------

/// One failed element of a parallel group.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementFailure {
    /// Index of the element in the fan-out collection.
    pub index: usize,
    pub error: FlowError,
}

/// A parallel group in which at least one element failed.
///
/// Indices refer to the order of the fan-out collection. Under fail-fast,
/// elements still running when the first failure arrived are listed in
/// `cancelled`.
#[derive(Debug, Clone, PartialEq, Error)]
#[error(
    "parallel group '{group}' failed: {} succeeded, {} failed, {} cancelled",
    .succeeded.len(),
    .failed.len(),
    .cancelled.len()
)]
pub struct PartialCohortFailure {
    pub group: String,
    pub succeeded: Vec<usize>,
    pub failed: Vec<ElementFailure>,
    pub cancelled: Vec<usize>,
}

impl PartialCohortFailure {
    /// Indices of the failed elements.
    pub fn failed_indices(&self) -> Vec<usize> {
        self.failed.iter().map(|f| f.index).collect()
    }
}

/// Errors that abort (or are reported inside) a run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FlowError {
    /// Nothing is ready, nothing is in flight, and no terminal step completed.
    #[error("run reached a dead end (completed: {completed:?}, signals: {signals:?})")]
    DeadEnd {
        completed: Vec<String>,
        signals: Vec<String>,
    },

    #[error("router '{router}' emitted undeclared signal '{signal}' (declared: {declared:?})")]
    RouterContractViolation {
        router: String,
        signal: String,
        declared: Vec<String>,
    },

    #[error(transparent)]
    TaskExecution(#[from] TaskExecutionError),

    #[error(transparent)]
    PartialCohortFailure(#[from] PartialCohortFailure),

    /// The input guardrail refused the run's input.
    #[error("input blocked by guardrail: {reason}")]
    PolicyBlocked { reason: String },

    /// A step failed for a reason of its own (including a panic).
    #[error("step '{step}' failed: {message}")]
    StepFailed { step: String, message: String },

    #[error("step '{step}' timed out after {timeout_ms}ms")]
    StepTimeout { step: String, timeout_ms: u64 },

    #[error("run timed out after {timeout_ms}ms")]
    RunTimeout { timeout_ms: u64 },

    #[error("run cancelled")]
    Cancelled,

    #[error("sub-run depth {depth} exceeds maximum {max}")]
    SubflowDepthExceeded { depth: u32, max: u32 },

    #[error("concurrent run limit of {limit} reached")]
    ConcurrencyLimitReached { limit: u32 },

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Guardrail(#[from] GuardrailError),
}

impl FlowError {
    /// Shorthand for a step-level failure.
    pub fn step_failed(step: impl Into<String>, message: impl Into<String>) -> Self {
        FlowError::StepFailed {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Whether re-invoking the failed work could succeed.
    ///
    /// Engine defects, policy blocks and cancellation are never retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            FlowError::TaskExecution(err) => !matches!(err, TaskExecutionError::Cancelled(_)),
            FlowError::StepFailed { .. } | FlowError::StepTimeout { .. } => true,
            FlowError::Memory(_) | FlowError::Guardrail(_) => true,
            _ => false,
        }
    }
}
