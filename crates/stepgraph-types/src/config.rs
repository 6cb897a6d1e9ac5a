//! Engine configuration types for stepgraph.
//!
//! `EngineConfig` is the `stepgraph.toml` document that controls run-level
//! concurrency, timeouts, and event channel sizing. Every field has a default
//! so an empty file (or no file at all) yields a usable configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration for a `Scheduler`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of work units (steps and cohort elements) executing at
    /// once inside a single run.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Default step timeout in seconds. Individual steps may override it.
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,

    /// Whole-run timeout in seconds.
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,

    /// Optional cap on concurrently active top-level runs per scheduler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_runs: Option<u32>,

    /// Capacity of the lifecycle event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Maximum nesting depth for sub-runs started from inside a step.
    #[serde(default = "default_max_subflow_depth")]
    pub max_subflow_depth: u32,
}

fn default_max_concurrency() -> usize {
    8
}

fn default_step_timeout_secs() -> u64 {
    300
}

fn default_run_timeout_secs() -> u64 {
    1800
}

fn default_event_capacity() -> usize {
    1024
}

fn default_max_subflow_depth() -> u32 {
    5
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            step_timeout_secs: default_step_timeout_secs(),
            run_timeout_secs: default_run_timeout_secs(),
            max_concurrent_runs: None,
            event_capacity: default_event_capacity(),
            max_subflow_depth: default_max_subflow_depth(),
        }
    }
}

impl EngineConfig {
    /// Concurrency limit with a floor of one permit.
    pub fn effective_concurrency(&self) -> usize {
        self.max_concurrency.max(1)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}
