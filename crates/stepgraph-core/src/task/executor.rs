//! TaskExecutor trait definition.
//!
//! The boundary between the engine and whatever performs delegated work
//! (typically an LLM-backed agent). Uses RPITIT like the other collaborator
//! traits; see [`super::BoxTaskExecutor`] for dynamic dispatch.

use serde_json::{Map, Value};
use stepgraph_types::error::TaskExecutionError;
use stepgraph_types::task::{TaskOutput, TaskSpec};

/// Executes one unit of delegated work.
///
/// Implementations must be safe to call concurrently; the scheduler invokes
/// `execute` from many steps and cohort elements at once. The engine never
/// retries a failed call on its own.
pub trait TaskExecutor: Send + Sync {
    /// Human-readable executor name, used in logs.
    fn name(&self) -> &str;

    /// Run `spec` with `inputs` and return its structured result and usage.
    fn execute(
        &self,
        spec: &TaskSpec,
        inputs: Map<String, Value>,
    ) -> impl std::future::Future<Output = Result<TaskOutput, TaskExecutionError>> + Send;
}

/// Shared executors, so a caller can keep a handle to the instance it gave
/// the scheduler.
impl<T: TaskExecutor> TaskExecutor for std::sync::Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn execute(
        &self,
        spec: &TaskSpec,
        inputs: Map<String, Value>,
    ) -> impl std::future::Future<Output = Result<TaskOutput, TaskExecutionError>> + Send {
        (**self).execute(spec, inputs)
    }
}
