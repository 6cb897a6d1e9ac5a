//! Per-run bookkeeping: the token meter and the run's returned record.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use stepgraph_types::flow::{LoopIterationRecord, RunStatus, RunSummary, StepRecord};
use uuid::Uuid;

/// Lock-free token counter shared by every step of a run.
///
/// Cloning produces a shared view of the same counter.
#[derive(Debug, Clone, Default)]
pub struct TokenMeter {
    tokens: Arc<AtomicU64>,
}

impl TokenMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `tokens` and return the new total.
    pub fn add(&self, tokens: u64) -> u64 {
        self.tokens.fetch_add(tokens, Ordering::SeqCst).saturating_add(tokens)
    }

    pub fn total(&self) -> u64 {
        self.tokens.load(Ordering::SeqCst)
    }
}

/// Everything a successful run returns.
#[derive(Debug, Clone)]
pub struct RunOutput<S> {
    pub run_id: Uuid,
    /// Output of the terminal step that ended the run.
    pub output: Value,
    /// Name of that terminal step.
    pub terminal: String,
    /// Final shared state.
    pub state: S,
    /// Completed steps in completion order, including routers, loop stages
    /// and the loop and group nodes themselves.
    pub history: Vec<StepRecord>,
    /// Signals in emission order.
    pub signals: Vec<String>,
    pub loops: BTreeMap<String, LoopIterationRecord>,
    pub total_tokens: u64,
    pub elapsed_ms: u64,
}

impl<S> RunOutput<S> {
    /// Names of completed steps in completion order.
    pub fn completed_steps(&self) -> impl Iterator<Item = &str> {
        self.history.iter().map(|r| r.step.as_str())
    }

    /// Whether `step` appears in the history.
    pub fn ran(&self, step: &str) -> bool {
        self.history.iter().any(|r| r.step == step)
    }

    /// Serialisable summary without the typed state.
    pub fn summary(&self, graph: &str) -> RunSummary {
        RunSummary {
            run_id: self.run_id,
            graph: graph.to_string(),
            status: RunStatus::Completed,
            output: self.output.clone(),
            history: self.history.clone(),
            signals: self.signals.clone(),
            total_tokens: self.total_tokens,
            elapsed_ms: self.elapsed_ms,
        }
    }
}
