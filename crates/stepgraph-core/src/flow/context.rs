//! Handles given to step and cohort-element code.
//!
//! A context carries a read-only snapshot of the run's state plus access to
//! the run's collaborators. It never grants write access; writes go through
//! the [`Update`](super::step::Update) a step returns.

use std::sync::Arc;

use serde_json::{Map, Value};
use stepgraph_types::error::TaskExecutionError;
use stepgraph_types::event::FlowEvent;
use stepgraph_types::guardrail::GuardrailDirection;
use stepgraph_types::memory::SessionKey;
use stepgraph_types::task::{TaskOutput, TaskSpec};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::FlowState;
use super::error::FlowError;
use super::graph::FlowGraph;
use super::run::{RunOutput, TokenMeter};
use super::scheduler::Scheduler;

/// Run-wide handles shared by every context of one run.
#[derive(Debug, Clone)]
pub(crate) struct RunScope {
    pub(crate) run_id: Uuid,
    pub(crate) cancel: CancellationToken,
    pub(crate) depth: u32,
    pub(crate) meter: TokenMeter,
    pub(crate) scheduler: Scheduler,
}

/// Context passed to a step handler.
pub struct StepContext<S> {
    state: Arc<S>,
    step: String,
    scope: RunScope,
}

impl<S: FlowState> StepContext<S> {
    pub(crate) fn new(state: Arc<S>, step: impl Into<String>, scope: RunScope) -> Self {
        Self {
            state,
            step: step.into(),
            scope,
        }
    }

    /// Same snapshot and run, scoped to a cohort element's token.
    pub(crate) fn for_element(&self, cancel: CancellationToken) -> Self {
        Self {
            state: Arc::clone(&self.state),
            step: self.step.clone(),
            scope: RunScope {
                cancel,
                ..self.scope.clone()
            },
        }
    }

    /// The run's state as of this step's launch.
    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn snapshot(&self) -> Arc<S> {
        Arc::clone(&self.state)
    }

    pub fn step_name(&self) -> &str {
        &self.step
    }

    pub fn run_id(&self) -> Uuid {
        self.scope.run_id
    }

    /// Nesting depth of this run; 0 for top-level runs.
    pub fn depth(&self) -> u32 {
        self.scope.depth
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.scope.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.scope.cancel.is_cancelled()
    }

    /// Tokens consumed by the run so far.
    pub fn tokens_used(&self) -> u64 {
        self.scope.meter.total()
    }

    pub(crate) fn publish(&self, event: FlowEvent) {
        self.scope.scheduler.event_bus().publish(event);
    }

    /// Delegate work to the scheduler's task executor.
    ///
    /// This is a suspension point: other ready steps run while the call is
    /// outstanding. Cancellation of the run abandons the call. Consumed
    /// tokens are added to the run's meter, and when a guardrail is
    /// configured every response is screened and replaced if it
    /// intervenes. The call is never retried here.
    pub async fn execute(
        &self,
        spec: &TaskSpec,
        inputs: Map<String, Value>,
    ) -> Result<TaskOutput, FlowError> {
        let scheduler = &self.scope.scheduler;
        let Some(executor) = scheduler.executor() else {
            return Err(TaskExecutionError::Unavailable("no task executor configured".to_string()).into());
        };

        tracing::debug!(
            run_id = %self.scope.run_id,
            step = %self.step,
            task = %spec.name,
            executor = executor.name(),
            "executing task"
        );

        let mut output = tokio::select! {
            _ = self.scope.cancel.cancelled() => return Err(FlowError::Cancelled),
            result = executor.execute(spec, inputs) => result?,
        };

        let total = self.scope.meter.add(output.usage.tokens_consumed);
        tracing::debug!(
            run_id = %self.scope.run_id,
            task = %spec.name,
            tokens = output.usage.tokens_consumed,
            total_tokens = total,
            "task completed"
        );

        if let Some(guardrail) = scheduler.guardrail() {
            // Structured results are screened as their JSON rendering.
            let screened = match output.text() {
                Some(text) => text.to_string(),
                None => output.result.to_string(),
            };
            let verdict = guardrail.check(&screened, GuardrailDirection::Output).await?;
            if !verdict.allowed {
                tracing::warn!(
                    run_id = %self.scope.run_id,
                    task = %spec.name,
                    "guardrail replaced task output"
                );
                substitute_text(&mut output.result, verdict.sanitized_text);
            }
        }

        Ok(output)
    }

    /// Load conversation context from the memory collaborator.
    pub async fn load_memory(&self, key: &SessionKey) -> Result<String, FlowError> {
        let store = self.scope.scheduler.memory().ok_or_else(no_memory)?;
        Ok(store.load(key).await?)
    }

    /// Record an exchange with the memory collaborator.
    pub async fn save_memory(
        &self,
        key: &SessionKey,
        user_text: &str,
        response_text: &str,
    ) -> Result<(), FlowError> {
        let store = self.scope.scheduler.memory().ok_or_else(no_memory)?;
        Ok(store.save(key, user_text, response_text).await?)
    }

    /// Run another graph to completion as a nested run.
    ///
    /// The nested run shares this run's collaborators, is cancelled with it,
    /// and adds its token usage to this run's meter.
    pub async fn subflow<T: FlowState>(
        &self,
        graph: &FlowGraph<T>,
        initial: T,
    ) -> Result<RunOutput<T>, FlowError> {
        let output = self
            .scope
            .scheduler
            .run_nested(graph, initial, &self.scope.cancel, self.scope.depth + 1)
            .await?;
        self.scope.meter.add(output.total_tokens);
        Ok(output)
    }
}

impl<S> std::fmt::Debug for StepContext<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepContext")
            .field("step", &self.step)
            .field("run_id", &self.scope.run_id)
            .field("depth", &self.scope.depth)
            .finish()
    }
}

fn no_memory() -> FlowError {
    FlowError::Memory(stepgraph_types::error::MemoryError::Unavailable(
        "no memory store configured".to_string(),
    ))
}

/// Replace the textual payload of a task result.
fn substitute_text(result: &mut Value, text: String) {
    match result {
        Value::Object(map) if map.contains_key("text") => {
            map.insert("text".to_string(), Value::String(text));
        }
        Value::Object(map) if map.contains_key("raw") => {
            map.insert("raw".to_string(), Value::String(text));
        }
        other => *other = Value::String(text),
    }
}

// ---------------------------------------------------------------------------
// Cohort elements
// ---------------------------------------------------------------------------

/// Context passed to a parallel group's template, once per element.
///
/// Reads see the state as of the group's launch. There is no way to write
/// shared state from here; the element's return value goes to the group's
/// result sink at its index.
pub struct ElementContext<S> {
    inner: StepContext<S>,
    index: usize,
    element: Value,
}

impl<S: FlowState> ElementContext<S> {
    pub(crate) fn new(inner: StepContext<S>, index: usize, element: Value) -> Self {
        Self {
            inner,
            index,
            element,
        }
    }

    /// Position of this element in the fan-out collection.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn element(&self) -> &Value {
        &self.element
    }

    pub fn state(&self) -> &S {
        self.inner.state()
    }

    pub fn group_name(&self) -> &str {
        self.inner.step_name()
    }

    pub fn run_id(&self) -> Uuid {
        self.inner.run_id()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        self.inner.cancellation()
    }

    pub async fn execute(
        &self,
        spec: &TaskSpec,
        inputs: Map<String, Value>,
    ) -> Result<TaskOutput, FlowError> {
        self.inner.execute(spec, inputs).await
    }

    pub async fn subflow<T: FlowState>(
        &self,
        graph: &FlowGraph<T>,
        initial: T,
    ) -> Result<RunOutput<T>, FlowError> {
        self.inner.subflow(graph, initial).await
    }
}

impl<S> std::fmt::Debug for ElementContext<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementContext")
            .field("group", &self.inner.step)
            .field("index", &self.index)
            .finish()
    }
}
