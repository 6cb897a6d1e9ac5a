//! Observability for stepgraph: subscriber setup and span attribute names.

pub mod flow_attrs;
pub mod tracing_setup;
