//! BoxTaskExecutor -- object-safe dynamic dispatch wrapper for TaskExecutor.
//!
//! 1. `TaskExecutorDyn` is an object-safe mirror with boxed futures
//! 2. Blanket impl of `TaskExecutorDyn` for every `T: TaskExecutor`
//! 3. `BoxTaskExecutor` wraps `Box<dyn TaskExecutorDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use serde_json::{Map, Value};
use stepgraph_types::error::TaskExecutionError;
use stepgraph_types::task::{TaskOutput, TaskSpec};

use super::executor::TaskExecutor;

/// Object-safe version of [`TaskExecutor`] with boxed futures.
pub trait TaskExecutorDyn: Send + Sync {
    fn name(&self) -> &str;

    fn execute_boxed<'a>(
        &'a self,
        spec: &'a TaskSpec,
        inputs: Map<String, Value>,
    ) -> Pin<Box<dyn Future<Output = Result<TaskOutput, TaskExecutionError>> + Send + 'a>>;
}

impl<T: TaskExecutor> TaskExecutorDyn for T {
    fn name(&self) -> &str {
        TaskExecutor::name(self)
    }

    fn execute_boxed<'a>(
        &'a self,
        spec: &'a TaskSpec,
        inputs: Map<String, Value>,
    ) -> Pin<Box<dyn Future<Output = Result<TaskOutput, TaskExecutionError>> + Send + 'a>> {
        Box::pin(self.execute(spec, inputs))
    }
}

/// Type-erased task executor held by the scheduler.
pub struct BoxTaskExecutor {
    inner: Box<dyn TaskExecutorDyn + Send + Sync>,
}

impl BoxTaskExecutor {
    pub fn new<T: TaskExecutor + 'static>(executor: T) -> Self {
        Self {
            inner: Box::new(executor),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn execute(
        &self,
        spec: &TaskSpec,
        inputs: Map<String, Value>,
    ) -> Result<TaskOutput, TaskExecutionError> {
        self.inner.execute_boxed(spec, inputs).await
    }
}

impl std::fmt::Debug for BoxTaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxTaskExecutor")
            .field("name", &self.inner.name())
            .finish()
    }
}
