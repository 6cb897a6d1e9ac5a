//! Bounded loops over a linear interior sequence.
//!
//! A loop is one node in its graph. Its interior stages are not addressable
//! by outside triggers; the scheduler runs them in order, asks the
//! convergence predicate after the check stage, and either re-enters the
//! sequence or releases control to whatever triggers on the loop's name.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use stepgraph_types::flow::{LoopIterationRecord, StepKind};

use super::FlowState;
use super::context::StepContext;
use super::error::FlowError;
use super::parallel::ParallelGroup;
use super::step::{TaskHandler, Update, task_handler};

type PredicateFn<S> = Arc<dyn Fn(&S) -> bool + Send + Sync>;

pub(crate) enum StageBody<S> {
    Task(TaskHandler<S>),
    Parallel(Arc<ParallelGroup<S>>),
}

/// One interior stage of a loop.
pub(crate) struct LoopStage<S> {
    pub(crate) name: String,
    pub(crate) body: StageBody<S>,
    pub(crate) timeout: Option<Duration>,
}

impl<S> LoopStage<S> {
    pub(crate) fn kind(&self) -> StepKind {
        match self.body {
            StageBody::Task(_) => StepKind::Task,
            StageBody::Parallel(_) => StepKind::Parallel,
        }
    }
}

/// Re-enters a sequence of stages until `until` holds or the cap is hit.
///
/// The cap counts passes entered, so a cap of 2 with a predicate that never
/// holds runs the sequence exactly twice.
pub struct LoopController<S> {
    pub(crate) max_iterations: u32,
    pub(crate) until: PredicateFn<S>,
    pub(crate) stages: Vec<LoopStage<S>>,
    pub(crate) check_after: Option<String>,
}

impl<S: FlowState> LoopController<S> {
    pub fn new(max_iterations: u32, until: impl Fn(&S) -> bool + Send + Sync + 'static) -> Self {
        Self {
            max_iterations,
            until: Arc::new(until),
            stages: Vec::new(),
            check_after: None,
        }
    }

    /// Append a plain stage.
    pub fn task<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(StepContext<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Update<S>, FlowError>> + Send + 'static,
    {
        self.stages.push(LoopStage {
            name: name.into(),
            body: StageBody::Task(task_handler(handler)),
            timeout: None,
        });
        self
    }

    /// Append a fan-out stage.
    pub fn parallel(mut self, name: impl Into<String>, group: ParallelGroup<S>) -> Self {
        self.stages.push(LoopStage {
            name: name.into(),
            body: StageBody::Parallel(Arc::new(group)),
            timeout: None,
        });
        self
    }

    /// Override the timeout of the most recently added stage.
    pub fn stage_timeout(mut self, timeout: Duration) -> Self {
        if let Some(stage) = self.stages.last_mut() {
            stage.timeout = Some(timeout);
        }
        self
    }

    /// Evaluate the predicate after `stage` instead of after the last one.
    pub fn check_after(mut self, stage: impl Into<String>) -> Self {
        self.check_after = Some(stage.into());
        self
    }
}

impl<S> LoopController<S> {
    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|s| s.name.as_str())
    }

    /// Position of the check stage. Only meaningful on a validated graph.
    pub(crate) fn check_position(&self) -> usize {
        self.check_after
            .as_deref()
            .and_then(|name| self.stages.iter().position(|s| s.name == name))
            .unwrap_or_else(|| self.stages.len().saturating_sub(1))
    }
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

/// What the scheduler should do after an interior stage completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopAdvance {
    /// Run the stage at this position. `new_pass` is set when the sequence
    /// was re-entered.
    Stage { position: usize, new_pass: bool },
    /// Release control past the loop.
    Done(LoopIterationRecord),
}

/// Per-run progress through one loop.
#[derive(Debug, Clone)]
pub(crate) struct LoopCursor {
    pub(crate) iteration: u32,
    pub(crate) position: usize,
    pub(crate) started: tokio::time::Instant,
    pub(crate) started_at: DateTime<Utc>,
}

impl LoopCursor {
    /// Enter the first pass.
    pub(crate) fn enter() -> Self {
        Self {
            iteration: 1,
            position: 0,
            started: tokio::time::Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// Advance after the stage at `self.position` completed against `state`.
    pub(crate) fn advance<S>(&mut self, controller: &LoopController<S>, state: &S) -> LoopAdvance {
        let cap = controller.max_iterations;

        if self.position == controller.check_position() && (controller.until)(state) {
            return LoopAdvance::Done(LoopIterationRecord {
                iterations: self.iteration,
                converged: true,
                max_iterations: cap,
            });
        }

        if self.position + 1 < controller.stages.len() {
            self.position += 1;
            return LoopAdvance::Stage {
                position: self.position,
                new_pass: false,
            };
        }

        if self.iteration < cap {
            self.iteration += 1;
            self.position = 0;
            return LoopAdvance::Stage {
                position: 0,
                new_pass: true,
            };
        }

        tracing::warn!(
            iterations = self.iteration,
            max_iterations = cap,
            "loop reached its cap without converging"
        );
        LoopAdvance::Done(LoopIterationRecord {
            iterations: self.iteration,
            converged: false,
            max_iterations: cap,
        })
    }
}
