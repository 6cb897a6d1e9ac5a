//! Step definitions.
//!
//! A `Step` is immutable once its graph is built. Handlers never receive
//! `&mut S`; they read a snapshot through their context and return an
//! [`Update`] that the scheduler applies after the step completes, so every
//! mutation of a run's state happens on the scheduler's side in completion
//! order.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::Value;
use stepgraph_types::flow::StepKind;

use super::FlowState;
use super::context::StepContext;
use super::error::FlowError;
use super::looping::LoopController;
use super::parallel::ParallelGroup;
use super::trigger::Trigger;

pub(crate) type TaskHandler<S> =
    Arc<dyn Fn(StepContext<S>) -> BoxFuture<'static, Result<Update<S>, FlowError>> + Send + Sync>;

pub(crate) type RouteFn<S> = Arc<dyn Fn(&S) -> String + Send + Sync>;

// ---------------------------------------------------------------------------
// Update
// ---------------------------------------------------------------------------

/// The effect of a completed step: an optional state mutation and an
/// optional output value.
///
/// The output only matters for terminal steps, where it becomes the run's
/// output.
pub struct Update<S> {
    mutation: Option<Box<dyn FnOnce(&mut S) + Send>>,
    output: Option<Value>,
}

impl<S> Update<S> {
    /// No state change, no output.
    pub fn none() -> Self {
        Self {
            mutation: None,
            output: None,
        }
    }

    /// Mutate the run's state when the step completes.
    pub fn with(mutation: impl FnOnce(&mut S) + Send + 'static) -> Self {
        Self {
            mutation: Some(Box::new(mutation)),
            output: None,
        }
    }

    /// Only an output value.
    pub fn output(value: impl Into<Value>) -> Self {
        Self::none().with_output(value)
    }

    pub fn with_output(mut self, value: impl Into<Value>) -> Self {
        self.output = Some(value.into());
        self
    }

    pub fn has_mutation(&self) -> bool {
        self.mutation.is_some()
    }

    /// Split into the mutation and the output.
    pub(crate) fn into_parts(self) -> (Option<Box<dyn FnOnce(&mut S) + Send>>, Option<Value>) {
        (self.mutation, self.output)
    }
}

impl<S> Default for Update<S> {
    fn default() -> Self {
        Self::none()
    }
}

impl<S> std::fmt::Debug for Update<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Update")
            .field("mutation", &self.mutation.is_some())
            .field("output", &self.output)
            .finish()
    }
}

pub(crate) fn task_handler<S, F, Fut>(handler: F) -> TaskHandler<S>
where
    S: FlowState,
    F: Fn(StepContext<S>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Update<S>, FlowError>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(handler(ctx)))
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// Router body: a pure choice over the declared signals.
pub(crate) struct Router<S> {
    pub(crate) signals: Vec<String>,
    pub(crate) route: RouteFn<S>,
}

pub(crate) enum StepBody<S> {
    Task(TaskHandler<S>),
    Router(Router<S>),
    Parallel(Arc<ParallelGroup<S>>),
    Loop(LoopController<S>),
}

/// A named node in a flow graph.
pub struct Step<S> {
    pub(crate) name: String,
    pub(crate) trigger: Trigger,
    pub(crate) body: StepBody<S>,
    pub(crate) terminal: bool,
    pub(crate) timeout: Option<Duration>,
}

impl<S: FlowState> Step<S> {
    fn with_body(name: impl Into<String>, trigger: impl Into<Trigger>, body: StepBody<S>) -> Self {
        Self {
            name: name.into(),
            trigger: trigger.into(),
            body,
            terminal: false,
            timeout: None,
        }
    }

    /// A plain step running `handler`.
    pub fn task<F, Fut>(name: impl Into<String>, trigger: impl Into<Trigger>, handler: F) -> Self
    where
        F: Fn(StepContext<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Update<S>, FlowError>> + Send + 'static,
    {
        Self::with_body(name, trigger, StepBody::Task(task_handler(handler)))
    }

    /// A router that emits one of `signals`, chosen by `route`.
    ///
    /// Routers run inline on the scheduler and must not block. Downstream
    /// steps trigger on the emitted signal, never on the router's name.
    pub fn router<I, T, F, R>(
        name: impl Into<String>,
        trigger: impl Into<Trigger>,
        signals: I,
        route: F,
    ) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
        F: Fn(&S) -> R + Send + Sync + 'static,
        R: Into<String>,
    {
        let router = Router {
            signals: signals.into_iter().map(Into::into).collect(),
            route: Arc::new(move |state| route(state).into()),
        };
        Self::with_body(name, trigger, StepBody::Router(router))
    }

    /// A fan-out/join node.
    pub fn parallel(
        name: impl Into<String>,
        trigger: impl Into<Trigger>,
        group: ParallelGroup<S>,
    ) -> Self {
        Self::with_body(name, trigger, StepBody::Parallel(Arc::new(group)))
    }

    /// A bounded loop node.
    pub fn looped(
        name: impl Into<String>,
        trigger: impl Into<Trigger>,
        controller: LoopController<S>,
    ) -> Self {
        Self::with_body(name, trigger, StepBody::Loop(controller))
    }

    /// Mark as an exit point. Completing any terminal step ends the run.
    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }

    /// Override the scheduler's default step timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl<S> Step<S> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    pub fn kind(&self) -> StepKind {
        match self.body {
            StepBody::Task(_) => StepKind::Task,
            StepBody::Router(_) => StepKind::Router,
            StepBody::Parallel(_) => StepKind::Parallel,
            StepBody::Loop(_) => StepKind::Loop,
        }
    }

    /// Signals declared by a router step; empty for other kinds.
    pub fn signals(&self) -> &[String] {
        match &self.body {
            StepBody::Router(router) => &router.signals,
            _ => &[],
        }
    }
}

impl<S> std::fmt::Debug for Step<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("trigger", &self.trigger)
            .field("terminal", &self.terminal)
            .finish()
    }
}
