//! Parallel groups: fan out over a runtime collection, then join.
//!
//! Every element runs the same template concurrently against a read-only
//! snapshot of the run's state. Elements never write shared state; their
//! results land in a per-index sink and the group's `merge` applies them in
//! a single mutation, ordered by element index.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::Value;
use stepgraph_types::event::FlowEvent;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::FlowState;
use super::context::{ElementContext, StepContext};
use super::error::{ElementFailure, FlowError, PartialCohortFailure};

type ElementsFn<S> = Arc<dyn Fn(&S) -> Vec<Value> + Send + Sync>;
type TemplateFn<S> =
    Arc<dyn Fn(ElementContext<S>) -> BoxFuture<'static, Result<Value, FlowError>> + Send + Sync>;
type MergeFn<S> = Arc<dyn Fn(&mut S, Vec<Value>) + Send + Sync>;
type FailureFn<S> =
    Arc<dyn Fn(&mut S, &PartialCohortFailure, Vec<(usize, Value)>) -> Result<(), FlowError> + Send + Sync>;

/// What happens to the rest of a cohort when one element fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CohortPolicy {
    /// Cancel the remaining elements on the first failure.
    #[default]
    FailFast,
    /// Let every element finish, then report all failures together.
    CollectAll,
}

/// A fan-out/join node definition.
pub struct ParallelGroup<S> {
    pub(crate) elements: ElementsFn<S>,
    pub(crate) template: TemplateFn<S>,
    pub(crate) merge: Option<MergeFn<S>>,
    pub(crate) on_failure: Option<FailureFn<S>>,
    pub(crate) policy: CohortPolicy,
}

impl<S: FlowState> ParallelGroup<S> {
    /// `elements` computes the fan-out collection from the state at launch
    /// time; `template` runs once per element.
    pub fn new<E, F, Fut>(elements: E, template: F) -> Self
    where
        E: Fn(&S) -> Vec<Value> + Send + Sync + 'static,
        F: Fn(ElementContext<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, FlowError>> + Send + 'static,
    {
        Self {
            elements: Arc::new(elements),
            template: Arc::new(move |ctx| Box::pin(template(ctx))),
            merge: None,
            on_failure: None,
            policy: CohortPolicy::default(),
        }
    }

    /// Apply the joined results (ordered by element index) to the state.
    pub fn merge(mut self, merge: impl Fn(&mut S, Vec<Value>) + Send + Sync + 'static) -> Self {
        self.merge = Some(Arc::new(merge));
        self
    }

    /// Handle a partial failure instead of aborting the run.
    ///
    /// Receives the failure report and the results of the elements that did
    /// succeed. Returning `Ok` completes the group in degraded mode;
    /// returning `Err` fails the run with that error.
    pub fn on_failure<F>(mut self, handler: F) -> Self
    where
        F: Fn(&mut S, &PartialCohortFailure, Vec<(usize, Value)>) -> Result<(), FlowError>
            + Send
            + Sync
            + 'static,
    {
        self.on_failure = Some(Arc::new(handler));
        self
    }

    pub fn policy(mut self, policy: CohortPolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl<S> std::fmt::Debug for ParallelGroup<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelGroup")
            .field("policy", &self.policy)
            .field("merge", &self.merge.is_some())
            .field("on_failure", &self.on_failure.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Result of one cohort, before it is applied to the state.
#[derive(Debug)]
pub(crate) enum CohortOutcome {
    /// Every element succeeded; results in element order.
    Joined(Vec<Value>),
    /// At least one element failed.
    Failed {
        failure: PartialCohortFailure,
        partial: Vec<(usize, Value)>,
    },
}

/// Run every element of `group` and collect the outcome.
///
/// Each element takes a permit from `permits` before running and is bounded
/// by `timeout`. The cohort's own token is a child of the step's, so a run
/// cancellation reaches every element while a fail-fast abort stays inside
/// the cohort.
pub(crate) async fn run_cohort<S: FlowState>(
    group: Arc<ParallelGroup<S>>,
    ctx: StepContext<S>,
    permits: Arc<Semaphore>,
    timeout: Duration,
) -> Result<CohortOutcome, FlowError> {
    let name = ctx.step_name().to_string();
    let elements = (group.elements)(ctx.state());
    let size = elements.len();

    ctx.publish(FlowEvent::CohortStarted {
        run_id: ctx.run_id(),
        group: name.clone(),
        size,
    });
    tracing::debug!(run_id = %ctx.run_id(), group = %name, size, "cohort fan-out");

    if size == 0 {
        ctx.publish(FlowEvent::CohortJoined {
            run_id: ctx.run_id(),
            group: name,
            succeeded: 0,
            failed: 0,
        });
        return Ok(CohortOutcome::Joined(Vec::new()));
    }

    let cohort_token = ctx.cancellation().child_token();
    let mut set = JoinSet::new();
    let mut task_index = HashMap::with_capacity(size);

    for (index, element) in elements.into_iter().enumerate() {
        let element_ctx = ElementContext::new(ctx.for_element(cohort_token.child_token()), index, element);
        let future = (group.template)(element_ctx);
        let token = cohort_token.clone();
        let permits = Arc::clone(&permits);
        let step = name.clone();

        let handle = set.spawn(async move {
            let outcome = tokio::select! {
                _ = token.cancelled() => None,
                result = async move {
                    let Ok(_permit) = permits.acquire_owned().await else {
                        return Err(FlowError::Cancelled);
                    };
                    match tokio::time::timeout(timeout, future).await {
                        Ok(result) => result,
                        Err(_) => Err(FlowError::StepTimeout {
                            step,
                            timeout_ms: timeout.as_millis() as u64,
                        }),
                    }
                } => Some(result),
            };
            (index, outcome)
        });
        task_index.insert(handle.id(), index);
    }

    let mut results: Vec<Option<Value>> = vec![None; size];
    let mut failed = Vec::new();
    let mut cancelled = Vec::new();

    while let Some(joined) = set.join_next().await {
        let (index, outcome) = match joined {
            Ok(pair) => pair,
            Err(join_err) => {
                let Some(index) = task_index.get(&join_err.id()).copied() else {
                    continue;
                };
                let message = if join_err.is_panic() {
                    "element panicked".to_string()
                } else {
                    "element aborted".to_string()
                };
                (index, Some(Err(FlowError::step_failed(name.clone(), message))))
            }
        };

        match outcome {
            Some(Ok(value)) => results[index] = Some(value),
            Some(Err(error)) => {
                tracing::warn!(run_id = %ctx.run_id(), group = %name, index, error = %error, "cohort element failed");
                failed.push(ElementFailure { index, error });
                if group.policy == CohortPolicy::FailFast && !cohort_token.is_cancelled() {
                    cohort_token.cancel();
                }
            }
            None => cancelled.push(index),
        }
    }

    if ctx.cancellation().is_cancelled() {
        return Err(FlowError::Cancelled);
    }

    failed.sort_by_key(|f| f.index);
    cancelled.sort_unstable();
    let succeeded: Vec<usize> = results
        .iter()
        .enumerate()
        .filter_map(|(i, r)| r.as_ref().map(|_| i))
        .collect();

    ctx.publish(FlowEvent::CohortJoined {
        run_id: ctx.run_id(),
        group: name.clone(),
        succeeded: succeeded.len(),
        failed: failed.len(),
    });

    if failed.is_empty() && cancelled.is_empty() {
        return Ok(CohortOutcome::Joined(results.into_iter().flatten().collect()));
    }

    let partial = results
        .into_iter()
        .enumerate()
        .filter_map(|(i, r)| r.map(|v| (i, v)))
        .collect();

    Ok(CohortOutcome::Failed {
        failure: PartialCohortFailure {
            group: name,
            succeeded,
            failed,
            cancelled,
        },
        partial,
    })
}

/// Apply a cohort outcome to the state.
///
/// Returns the joined results as an array when `want_output` is set (the
/// group is terminal), `Null` otherwise.
pub(crate) fn apply_outcome<S: FlowState>(
    group: &ParallelGroup<S>,
    outcome: CohortOutcome,
    state: &mut Arc<S>,
    want_output: bool,
) -> Result<Value, FlowError> {
    match outcome {
        CohortOutcome::Joined(values) => {
            let output = if want_output {
                Value::Array(values.clone())
            } else {
                Value::Null
            };
            if let Some(merge) = &group.merge {
                merge(Arc::make_mut(state), values);
            }
            Ok(output)
        }
        CohortOutcome::Failed { failure, partial } => match &group.on_failure {
            Some(handler) => {
                handler(Arc::make_mut(state), &failure, partial)?;
                Ok(Value::Null)
            }
            None => Err(FlowError::PartialCohortFailure(failure)),
        },
    }
}
