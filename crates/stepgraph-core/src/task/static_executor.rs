//! Fixture-backed `TaskExecutor`.
//!
//! Returns preconfigured results per task name, with optional injected
//! failures and delays. Shared by unit tests, scenario tests and the CLI's
//! offline runner.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{Map, Value};
use stepgraph_types::error::TaskExecutionError;
use stepgraph_types::task::{TaskOutput, TaskSpec};

use super::executor::TaskExecutor;

/// Failure injected when an input field matches a value.
#[derive(Debug, Clone)]
struct InputFailure {
    key: String,
    value: Value,
    message: String,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub task: String,
    pub inputs: Map<String, Value>,
}

/// A `TaskExecutor` that answers from fixtures.
#[derive(Debug, Default)]
pub struct StaticExecutor {
    results: HashMap<String, TaskOutput>,
    default: Option<TaskOutput>,
    failures: HashMap<String, String>,
    input_failures: HashMap<String, Vec<InputFailure>>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<RecordedCall>>,
    call_count: AtomicUsize,
}

impl StaticExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `task` with `result`, reporting `tokens` consumed.
    pub fn with_result(mut self, task: &str, result: Value, tokens: u64) -> Self {
        self.results
            .insert(task.to_string(), TaskOutput::new(result, tokens));
        self
    }

    /// Answer any task without its own fixture with `result`.
    pub fn with_default(mut self, result: Value, tokens: u64) -> Self {
        self.default = Some(TaskOutput::new(result, tokens));
        self
    }

    /// Fail every call to `task`.
    pub fn with_failure(mut self, task: &str, message: &str) -> Self {
        self.failures.insert(task.to_string(), message.to_string());
        self
    }

    /// Fail calls to `task` whose `inputs[key]` equals `value`.
    pub fn with_failure_when(mut self, task: &str, key: &str, value: Value, message: &str) -> Self {
        self.input_failures
            .entry(task.to_string())
            .or_default()
            .push(InputFailure {
                key: key.to_string(),
                value,
                message: message.to_string(),
            });
        self
    }

    /// Sleep for `delay` before answering `task`.
    pub fn with_delay(mut self, task: &str, delay: Duration) -> Self {
        self.delays.insert(task.to_string(), delay);
        self
    }

    /// Number of `execute` calls received so far.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Calls received so far, in arrival order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn record(&self, task: &str, inputs: &Map<String, Value>) {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(RecordedCall {
                task: task.to_string(),
                inputs: inputs.clone(),
            });
    }

    fn answer(&self, task: &str, inputs: &Map<String, Value>) -> Result<TaskOutput, TaskExecutionError> {
        if let Some(message) = self.failures.get(task) {
            return Err(TaskExecutionError::Failed {
                task: task.to_string(),
                message: message.clone(),
            });
        }

        let matched = self.input_failures.get(task).and_then(|rules| {
            rules
                .iter()
                .find(|rule| inputs.get(&rule.key) == Some(&rule.value))
        });
        if let Some(rule) = matched {
            return Err(TaskExecutionError::Failed {
                task: task.to_string(),
                message: rule.message.clone(),
            });
        }

        self.results
            .get(task)
            .or(self.default.as_ref())
            .cloned()
            .ok_or_else(|| TaskExecutionError::Failed {
                task: task.to_string(),
                message: "no fixture configured".to_string(),
            })
    }
}

impl TaskExecutor for StaticExecutor {
    fn name(&self) -> &str {
        "static"
    }

    async fn execute(
        &self,
        spec: &TaskSpec,
        inputs: Map<String, Value>,
    ) -> Result<TaskOutput, TaskExecutionError> {
        self.record(&spec.name, &inputs);

        if let Some(delay) = self.delays.get(&spec.name) {
            tokio::time::sleep(*delay).await;
        }

        let result = self.answer(&spec.name, &inputs);
        tracing::debug!(
            executor = "static",
            task = %spec.name,
            ok = result.is_ok(),
            "fixture answered"
        );
        result
    }
}
