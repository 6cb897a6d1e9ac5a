//! Span attribute names for flow instrumentation.
//!
//! Spans declare these fields with dotted identifiers (`flow.run.status =
//! tracing::field::Empty`); the constants are for recording them later with
//! `Span::record`.

// --- Run attributes ---

/// Name of the graph being run.
pub const FLOW_GRAPH_NAME: &str = "flow.graph.name";

/// Run identifier (UUID v7).
pub const FLOW_RUN_ID: &str = "flow.run.id";

/// Nesting depth; 0 for top-level runs.
pub const FLOW_RUN_DEPTH: &str = "flow.run.depth";

/// Terminal step that ended the run.
pub const FLOW_RUN_TERMINAL: &str = "flow.run.terminal";

/// Final status (`completed`, `failed`, `cancelled`).
pub const FLOW_RUN_STATUS: &str = "flow.run.status";

/// Tokens consumed across every executor call in the run.
pub const FLOW_USAGE_TOTAL_TOKENS: &str = "flow.usage.total_tokens";

// --- Step attributes ---

pub const FLOW_STEP_NAME: &str = "flow.step.name";

/// One of `task`, `router`, `parallel`, `loop`.
pub const FLOW_STEP_KIND: &str = "flow.step.kind";

/// Signal emitted by a router.
pub const FLOW_ROUTER_SIGNAL: &str = "flow.router.signal";

/// Number of elements a parallel group fanned out over.
pub const FLOW_COHORT_SIZE: &str = "flow.cohort.size";

pub const FLOW_LOOP_ITERATION: &str = "flow.loop.iteration";
