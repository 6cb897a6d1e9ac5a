//! Engine for step-graph workflows.
//!
//! A flow is a set of named steps wired together by triggers: a step runs
//! once the steps or router signals its trigger names have completed. This
//! crate holds the graph builder and validation, the scheduler, parallel
//! cohorts and bounded loops, plus the collaborator traits (`TaskExecutor`,
//! `MemoryStore`, `Guardrail`) that steps call out to. It depends only on
//! `stepgraph-types` and never on a concrete LLM client.

pub mod config;
pub mod event;
pub mod flow;
pub mod guardrail;
pub mod memory;
pub mod task;
