//! Trigger-driven scheduler.
//!
//! The scheduler owns no graph. Each call to [`Scheduler::run`] drives one
//! built [`FlowGraph`] from its start step to its first completed terminal
//! step.
//!
//! # Execution model
//!
//! 1. Every step whose trigger is satisfied and that has not been launched is
//!    started. Routers run inline; tasks, groups and loop stages are spawned
//!    into a `JoinSet` and gated by the run's concurrency semaphore.
//! 2. The driver waits for the next completion, applies its update to the
//!    shared state, records it, and repeats from 1.
//! 3. The first terminal step to complete ends the run. Everything still in
//!    flight is cancelled and its result discarded.
//! 4. A run with nothing in flight and nothing ready is a dead end.
//!
//! A step is launched at most once per run. State mutations happen only on
//! the driver, in completion order.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use stepgraph_types::config::EngineConfig;
use stepgraph_types::event::FlowEvent;
use stepgraph_types::flow::{LoopIterationRecord, StepKind, StepRecord};
use stepgraph_types::guardrail::GuardrailDirection;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, broadcast};
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::EventBus;
use crate::guardrail::{BoxGuardrail, Guardrail};
use crate::memory::{BoxMemoryStore, MemoryStore};
use crate::task::{BoxTaskExecutor, TaskExecutor};

use super::FlowState;
use super::context::{RunScope, StepContext};
use super::error::FlowError;
use super::graph::FlowGraph;
use super::looping::{LoopAdvance, LoopCursor, StageBody};
use super::parallel::{CohortOutcome, ParallelGroup, apply_outcome, run_cohort};
use super::run::{RunOutput, TokenMeter};
use super::step::{Router, Step, StepBody, TaskHandler, Update};

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

struct SchedulerInner {
    config: EngineConfig,
    executor: Option<BoxTaskExecutor>,
    memory: Option<BoxMemoryStore>,
    guardrail: Option<BoxGuardrail>,
    event_bus: EventBus,
    run_tokens: DashMap<Uuid, CancellationToken>,
    run_slots: Option<Arc<Semaphore>>,
}

/// Runs flow graphs against a set of collaborators.
///
/// Cheap to clone; clones share collaborators, the event bus and the table
/// of active runs.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::default()
    }

    /// A scheduler with no collaborators.
    pub fn new(config: EngineConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.event_bus
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.inner.event_bus.subscribe()
    }

    pub(crate) fn executor(&self) -> Option<&BoxTaskExecutor> {
        self.inner.executor.as_ref()
    }

    pub(crate) fn memory(&self) -> Option<&BoxMemoryStore> {
        self.inner.memory.as_ref()
    }

    pub(crate) fn guardrail(&self) -> Option<&BoxGuardrail> {
        self.inner.guardrail.as_ref()
    }

    /// Run `graph` from `initial` to its first completed terminal step.
    pub async fn run<S: FlowState>(
        &self,
        graph: &FlowGraph<S>,
        initial: S,
    ) -> Result<RunOutput<S>, FlowError> {
        self.run_with_cancel(graph, initial, &CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run), but the run also stops when `cancel` fires.
    pub async fn run_with_cancel<S: FlowState>(
        &self,
        graph: &FlowGraph<S>,
        initial: S,
        cancel: &CancellationToken,
    ) -> Result<RunOutput<S>, FlowError> {
        let _slot = self.acquire_run_slot()?;
        self.execute_run(graph, initial, cancel.child_token(), 0)
            .await
    }

    /// Cancel an active run. Returns false if no such run is active.
    pub fn cancel(&self, run_id: Uuid) -> bool {
        match self.inner.run_tokens.get(&run_id) {
            Some(token) => {
                tracing::info!(run_id = %run_id, "cancelling run");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Ids of runs currently executing, nested runs included.
    pub fn active_runs(&self) -> Vec<Uuid> {
        self.inner.run_tokens.iter().map(|e| *e.key()).collect()
    }

    /// Run `graph` as a child of another run.
    ///
    /// Nested runs do not take a top-level run slot; they get their own
    /// concurrency semaphore and are bounded by depth instead.
    pub(crate) async fn run_nested<T: FlowState>(
        &self,
        graph: &FlowGraph<T>,
        initial: T,
        parent: &CancellationToken,
        depth: u32,
    ) -> Result<RunOutput<T>, FlowError> {
        let max = self.inner.config.max_subflow_depth;
        if depth > max {
            return Err(FlowError::SubflowDepthExceeded { depth, max });
        }
        self.execute_run(graph, initial, parent.child_token(), depth)
            .await
    }

    fn acquire_run_slot(&self) -> Result<Option<OwnedSemaphorePermit>, FlowError> {
        let Some(slots) = &self.inner.run_slots else {
            return Ok(None);
        };
        let permit = Arc::clone(slots).try_acquire_owned().map_err(|_| {
            FlowError::ConcurrencyLimitReached {
                limit: self.inner.config.max_concurrent_runs.unwrap_or_default(),
            }
        })?;
        Ok(Some(permit))
    }

    async fn execute_run<S: FlowState>(
        &self,
        graph: &FlowGraph<S>,
        initial: S,
        cancel: CancellationToken,
        depth: u32,
    ) -> Result<RunOutput<S>, FlowError> {
        let run_id = Uuid::now_v7();
        let started = Instant::now();
        self.inner.run_tokens.insert(run_id, cancel.clone());

        self.inner.event_bus.publish(FlowEvent::RunStarted {
            run_id,
            graph: graph.name().to_string(),
            depth,
        });
        tracing::info!(run_id = %run_id, graph = graph.name(), depth, "run started");

        let scope = RunScope {
            run_id,
            cancel: cancel.clone(),
            depth,
            meter: TokenMeter::new(),
            scheduler: self.clone(),
        };
        let config = &self.inner.config;
        let driven = async move {
            self.screen_input(graph, &initial, run_id).await?;
            RunDriver::new(graph, initial, scope, config, started)
                .drive()
                .await
        };

        let run_timeout = config.run_timeout();
        let result = match tokio::time::timeout(run_timeout, driven).await {
            Ok(result) => result,
            Err(_) => Err(FlowError::RunTimeout {
                timeout_ms: run_timeout.as_millis() as u64,
            }),
        };

        cancel.cancel();
        self.inner.run_tokens.remove(&run_id);
        let duration_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(output) => {
                tracing::info!(
                    run_id = %run_id,
                    terminal = %output.terminal,
                    total_tokens = output.total_tokens,
                    duration_ms,
                    "run completed"
                );
                self.inner.event_bus.publish(FlowEvent::RunCompleted {
                    run_id,
                    terminal: output.terminal.clone(),
                    total_tokens: output.total_tokens,
                    duration_ms,
                });
            }
            Err(FlowError::Cancelled) => {
                tracing::info!(run_id = %run_id, duration_ms, "run cancelled");
                self.inner.event_bus.publish(FlowEvent::RunCancelled {
                    run_id,
                    reason: "cancellation requested".to_string(),
                });
            }
            Err(err) => {
                tracing::warn!(run_id = %run_id, error = %err, duration_ms, "run failed");
                self.inner.event_bus.publish(FlowEvent::RunFailed {
                    run_id,
                    error: err.to_string(),
                });
            }
        }

        result
    }

    /// Screen the run's input text when both the graph and the scheduler
    /// opt in.
    async fn screen_input<S: FlowState>(
        &self,
        graph: &FlowGraph<S>,
        state: &S,
        run_id: Uuid,
    ) -> Result<(), FlowError> {
        let (Some(text_of), Some(guardrail)) = (graph.input_guard(), self.guardrail()) else {
            return Ok(());
        };
        let text = text_of(state);
        let verdict = guardrail.check(&text, GuardrailDirection::Input).await?;
        if verdict.allowed {
            return Ok(());
        }
        tracing::warn!(run_id = %run_id, graph = graph.name(), "guardrail blocked run input");
        Err(FlowError::PolicyBlocked {
            reason: verdict.sanitized_text,
        })
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.inner.config)
            .field("executor", &self.inner.executor.as_ref().map(|e| e.name()))
            .field("memory", &self.inner.memory.is_some())
            .field("guardrail", &self.inner.guardrail.is_some())
            .field("active_runs", &self.inner.run_tokens.len())
            .finish()
    }
}

/// Assembles a [`Scheduler`] from its configuration and collaborators.
#[derive(Default)]
pub struct SchedulerBuilder {
    config: EngineConfig,
    executor: Option<BoxTaskExecutor>,
    memory: Option<BoxMemoryStore>,
    guardrail: Option<BoxGuardrail>,
    event_bus: Option<EventBus>,
}

impl SchedulerBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn executor<T: TaskExecutor + 'static>(mut self, executor: T) -> Self {
        self.executor = Some(BoxTaskExecutor::new(executor));
        self
    }

    pub fn memory<T: MemoryStore + 'static>(mut self, store: T) -> Self {
        self.memory = Some(BoxMemoryStore::new(store));
        self
    }

    pub fn guardrail<T: Guardrail + 'static>(mut self, guardrail: T) -> Self {
        self.guardrail = Some(BoxGuardrail::new(guardrail));
        self
    }

    /// Share an existing bus instead of creating one from the config.
    pub fn event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn build(self) -> Scheduler {
        let mut config = self.config;
        // A zero run cap would reject every run.
        config.max_concurrent_runs = config.max_concurrent_runs.map(|limit| limit.max(1));
        let event_bus = self
            .event_bus
            .unwrap_or_else(|| EventBus::new(config.event_capacity));
        let run_slots = config
            .max_concurrent_runs
            .map(|limit| Arc::new(Semaphore::new(limit as usize)));
        Scheduler {
            inner: Arc::new(SchedulerInner {
                config,
                executor: self.executor,
                memory: self.memory,
                guardrail: self.guardrail,
                event_bus,
                run_tokens: DashMap::new(),
                run_slots,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Run driver
// ---------------------------------------------------------------------------

/// A unit of spawned work: a graph node, or one stage of a loop node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Node(usize),
    Stage { node: usize, position: usize },
}

enum Work<S> {
    Task(TaskHandler<S>),
    Cohort(Arc<ParallelGroup<S>>),
}

enum Finished<S> {
    Task(Update<S>),
    Cohort(CohortOutcome),
}

struct Done<S> {
    unit: Unit,
    started_at: DateTime<Utc>,
    elapsed: Duration,
    result: Result<Finished<S>, FlowError>,
}

/// Per-run execution state. Lives for exactly one call to `drive`.
struct RunDriver<'g, S> {
    graph: &'g FlowGraph<S>,
    scope: RunScope,
    permits: Arc<Semaphore>,
    step_timeout: Duration,
    started: Instant,

    state: Arc<S>,
    completed: BTreeSet<String>,
    signals: BTreeSet<String>,
    signal_order: Vec<String>,
    launched: HashSet<usize>,
    history: Vec<StepRecord>,
    loops: HashMap<usize, LoopCursor>,
    loop_records: BTreeMap<String, LoopIterationRecord>,

    in_flight: JoinSet<Done<S>>,
    units: HashMap<Id, Unit>,
}

impl<'g, S: FlowState> RunDriver<'g, S> {
    fn new(
        graph: &'g FlowGraph<S>,
        initial: S,
        scope: RunScope,
        config: &EngineConfig,
        started: Instant,
    ) -> Self {
        Self {
            graph,
            scope,
            permits: Arc::new(Semaphore::new(config.effective_concurrency())),
            step_timeout: config.step_timeout(),
            started,
            state: Arc::new(initial),
            completed: BTreeSet::new(),
            signals: BTreeSet::new(),
            signal_order: Vec::new(),
            launched: HashSet::new(),
            history: Vec::new(),
            loops: HashMap::new(),
            loop_records: BTreeMap::new(),
            in_flight: JoinSet::new(),
            units: HashMap::new(),
        }
    }

    async fn drive(mut self) -> Result<RunOutput<S>, FlowError> {
        loop {
            self.pump()?;

            if self.in_flight.is_empty() {
                tracing::warn!(
                    run_id = %self.scope.run_id,
                    completed = self.completed.len(),
                    "run reached a dead end"
                );
                return Err(FlowError::DeadEnd {
                    completed: self.completed.iter().cloned().collect(),
                    signals: self.signal_order.clone(),
                });
            }

            let cancel = self.scope.cancel.clone();
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                joined = self.in_flight.join_next_with_id() => Some(joined),
            };
            let Some(joined) = joined else {
                self.in_flight.abort_all();
                return Err(FlowError::Cancelled);
            };

            let done = match joined {
                Some(Ok((id, done))) => {
                    self.units.remove(&id);
                    done
                }
                Some(Err(join_err)) => {
                    let name = self
                        .units
                        .remove(&join_err.id())
                        .map_or("unknown", |unit| self.unit_name(unit));
                    let message = if join_err.is_panic() {
                        "step panicked"
                    } else {
                        "step aborted"
                    };
                    return Err(self.fail(name, FlowError::step_failed(name, message)));
                }
                None => continue,
            };

            if let Some((terminal, output)) = self.complete(done)? {
                return Ok(self.finish(terminal, output));
            }
        }
    }

    /// Launch everything that is ready. Routers run inline, and a signal can
    /// make further steps ready, so repeat until a pass routes nothing.
    fn pump(&mut self) -> Result<(), FlowError> {
        let graph = self.graph;
        loop {
            let mut routed = false;
            for (idx, step) in graph.steps().iter().enumerate() {
                if self.launched.contains(&idx)
                    || !step.trigger.is_satisfied(&self.completed, &self.signals)
                {
                    continue;
                }
                self.launched.insert(idx);

                match &step.body {
                    StepBody::Router(router) => {
                        self.route(step, router)?;
                        routed = true;
                    }
                    StepBody::Task(handler) => self.launch(
                        Unit::Node(idx),
                        &step.name,
                        StepKind::Task,
                        Work::Task(Arc::clone(handler)),
                        step.timeout,
                    ),
                    StepBody::Parallel(group) => self.launch(
                        Unit::Node(idx),
                        &step.name,
                        StepKind::Parallel,
                        Work::Cohort(Arc::clone(group)),
                        step.timeout,
                    ),
                    StepBody::Loop(controller) => {
                        self.publish(FlowEvent::StepStarted {
                            run_id: self.scope.run_id,
                            step: step.name.clone(),
                            kind: StepKind::Loop,
                        });
                        self.publish(FlowEvent::LoopIteration {
                            run_id: self.scope.run_id,
                            loop_name: step.name.clone(),
                            iteration: 1,
                            max_iterations: controller.max_iterations(),
                        });
                        self.loops.insert(idx, LoopCursor::enter());
                        self.launch_stage(idx, 0);
                    }
                }
            }
            if !routed {
                return Ok(());
            }
        }
    }

    fn route(&mut self, step: &'g Step<S>, router: &'g Router<S>) -> Result<(), FlowError> {
        let started_at = Utc::now();
        let signal = (router.route)(self.state.as_ref());

        if !router.signals.contains(&signal) {
            let err = FlowError::RouterContractViolation {
                router: step.name.clone(),
                signal,
                declared: router.signals.clone(),
            };
            return Err(self.fail(&step.name, err));
        }

        tracing::info!(
            run_id = %self.scope.run_id,
            router = %step.name,
            signal = %signal,
            "router emitted signal"
        );
        self.publish(FlowEvent::SignalEmitted {
            run_id: self.scope.run_id,
            router: step.name.clone(),
            signal: signal.clone(),
        });
        if self.signals.insert(signal.clone()) {
            self.signal_order.push(signal.clone());
        }
        self.history.push(StepRecord {
            step: step.name.clone(),
            kind: StepKind::Router,
            started_at,
            duration_ms: 0,
            signal: Some(signal),
        });
        Ok(())
    }

    fn launch(
        &mut self,
        unit: Unit,
        name: &str,
        kind: StepKind,
        work: Work<S>,
        timeout: Option<Duration>,
    ) {
        let timeout = timeout.unwrap_or(self.step_timeout);
        self.publish(FlowEvent::StepStarted {
            run_id: self.scope.run_id,
            step: name.to_string(),
            kind,
        });
        tracing::debug!(run_id = %self.scope.run_id, step = name, kind = %kind, "step launched");

        let ctx = StepContext::new(Arc::clone(&self.state), name, self.scope.clone());
        let token = self.scope.cancel.clone();
        let permits = Arc::clone(&self.permits);

        let handle = match work {
            Work::Task(handler) => {
                let future = handler(ctx);
                let step = name.to_string();
                self.in_flight.spawn(async move {
                    let started_at = Utc::now();
                    let clock = Instant::now();
                    let result = tokio::select! {
                        biased;
                        _ = token.cancelled() => Err(FlowError::Cancelled),
                        result = async move {
                            let Ok(_permit) = permits.acquire_owned().await else {
                                return Err(FlowError::Cancelled);
                            };
                            match tokio::time::timeout(timeout, future).await {
                                Ok(result) => result.map(Finished::Task),
                                Err(_) => Err(FlowError::StepTimeout {
                                    step,
                                    timeout_ms: timeout.as_millis() as u64,
                                }),
                            }
                        } => result,
                    };
                    Done {
                        unit,
                        started_at,
                        elapsed: clock.elapsed(),
                        result,
                    }
                })
            }
            Work::Cohort(group) => self.in_flight.spawn(async move {
                let started_at = Utc::now();
                let clock = Instant::now();
                let result = tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(FlowError::Cancelled),
                    result = run_cohort(group, ctx, permits, timeout) => result.map(Finished::Cohort),
                };
                Done {
                    unit,
                    started_at,
                    elapsed: clock.elapsed(),
                    result,
                }
            }),
        };
        self.units.insert(handle.id(), unit);
    }

    fn launch_stage(&mut self, node: usize, position: usize) {
        let graph = self.graph;
        let StepBody::Loop(controller) = &graph.steps()[node].body else {
            return;
        };
        let stage = &controller.stages[position];
        let work = match &stage.body {
            StageBody::Task(handler) => Work::Task(Arc::clone(handler)),
            StageBody::Parallel(group) => Work::Cohort(Arc::clone(group)),
        };
        self.launch(
            Unit::Stage { node, position },
            &stage.name,
            stage.kind(),
            work,
            stage.timeout,
        );
    }

    /// Apply a finished unit. Returns the terminal node and the run output
    /// when the unit ended the run.
    fn complete(&mut self, done: Done<S>) -> Result<Option<(usize, Value)>, FlowError> {
        let graph = self.graph;
        let name = self.unit_name(done.unit);

        let finished = match done.result {
            Ok(finished) => finished,
            Err(err) => return Err(self.fail(name, err)),
        };

        let output = match finished {
            Finished::Task(update) => {
                let (mutation, output) = update.into_parts();
                if let Some(mutation) = mutation {
                    mutation(Arc::make_mut(&mut self.state));
                }
                output.unwrap_or(Value::Null)
            }
            Finished::Cohort(outcome) => {
                let Some(group) = self.group_of(done.unit) else {
                    return Err(self.fail(name, FlowError::step_failed(name, "not a parallel group")));
                };
                let want_output =
                    matches!(done.unit, Unit::Node(idx) if graph.steps()[idx].terminal);
                match apply_outcome(group, outcome, &mut self.state, want_output) {
                    Ok(output) => output,
                    Err(err) => return Err(self.fail(name, err)),
                }
            }
        };

        let duration_ms = done.elapsed.as_millis() as u64;
        self.publish(FlowEvent::StepCompleted {
            run_id: self.scope.run_id,
            step: name.to_string(),
            duration_ms,
        });
        self.history.push(StepRecord {
            step: name.to_string(),
            kind: self.unit_kind(done.unit),
            started_at: done.started_at,
            duration_ms,
            signal: None,
        });
        tracing::debug!(run_id = %self.scope.run_id, step = name, duration_ms, "step completed");

        match done.unit {
            Unit::Node(idx) => {
                self.completed.insert(name.to_string());
                if graph.steps()[idx].terminal {
                    return Ok(Some((idx, output)));
                }
                Ok(None)
            }
            Unit::Stage { node, .. } => Ok(self.advance_loop(node)),
        }
    }

    fn advance_loop(&mut self, node: usize) -> Option<(usize, Value)> {
        let graph = self.graph;
        let step = &graph.steps()[node];
        let StepBody::Loop(controller) = &step.body else {
            return None;
        };
        let cursor = self.loops.get_mut(&node)?;
        let advance = cursor.advance(controller, self.state.as_ref());
        let iteration = cursor.iteration;

        match advance {
            LoopAdvance::Stage { position, new_pass } => {
                if new_pass {
                    tracing::info!(
                        run_id = %self.scope.run_id,
                        loop_name = %step.name,
                        iteration,
                        max_iterations = controller.max_iterations(),
                        "loop re-entered"
                    );
                    self.publish(FlowEvent::LoopIteration {
                        run_id: self.scope.run_id,
                        loop_name: step.name.clone(),
                        iteration,
                        max_iterations: controller.max_iterations(),
                    });
                }
                self.launch_stage(node, position);
                None
            }
            LoopAdvance::Done(record) => {
                let cursor = self.loops.remove(&node)?;
                let duration_ms = cursor.started.elapsed().as_millis() as u64;
                tracing::info!(
                    run_id = %self.scope.run_id,
                    loop_name = %step.name,
                    iterations = record.iterations,
                    converged = record.converged,
                    "loop finished"
                );
                self.loop_records.insert(step.name.clone(), record);
                self.completed.insert(step.name.clone());
                self.history.push(StepRecord {
                    step: step.name.clone(),
                    kind: StepKind::Loop,
                    started_at: cursor.started_at,
                    duration_ms,
                    signal: None,
                });
                self.publish(FlowEvent::StepCompleted {
                    run_id: self.scope.run_id,
                    step: step.name.clone(),
                    duration_ms,
                });
                step.terminal.then_some((node, Value::Null))
            }
        }
    }

    /// Record a step failure and stop everything still in flight.
    fn fail(&mut self, step: &str, err: FlowError) -> FlowError {
        tracing::warn!(run_id = %self.scope.run_id, step, error = %err, "step failed");
        self.publish(FlowEvent::StepFailed {
            run_id: self.scope.run_id,
            step: step.to_string(),
            error: err.to_string(),
        });
        self.scope.cancel.cancel();
        self.in_flight.abort_all();
        err
    }

    fn finish(mut self, terminal: usize, output: Value) -> RunOutput<S> {
        // Late results from the losing branches are discarded.
        self.scope.cancel.cancel();
        self.in_flight.abort_all();

        let state = Arc::try_unwrap(self.state).unwrap_or_else(|shared| (*shared).clone());
        RunOutput {
            run_id: self.scope.run_id,
            output,
            terminal: self.graph.steps()[terminal].name.clone(),
            state,
            history: self.history,
            signals: self.signal_order,
            loops: self.loop_records,
            total_tokens: self.scope.meter.total(),
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        }
    }

    fn publish(&self, event: FlowEvent) {
        self.scope.scheduler.event_bus().publish(event);
    }

    fn unit_name(&self, unit: Unit) -> &'g str {
        let graph = self.graph;
        match unit {
            Unit::Node(idx) => &graph.steps()[idx].name,
            Unit::Stage { node, position } => match &graph.steps()[node].body {
                StepBody::Loop(controller) => &controller.stages[position].name,
                _ => &graph.steps()[node].name,
            },
        }
    }

    fn unit_kind(&self, unit: Unit) -> StepKind {
        let graph = self.graph;
        match unit {
            Unit::Node(idx) => graph.steps()[idx].kind(),
            Unit::Stage { node, position } => match &graph.steps()[node].body {
                StepBody::Loop(controller) => controller.stages[position].kind(),
                _ => graph.steps()[node].kind(),
            },
        }
    }

    fn group_of(&self, unit: Unit) -> Option<&'g ParallelGroup<S>> {
        let graph = self.graph;
        match unit {
            Unit::Node(idx) => match &graph.steps()[idx].body {
                StepBody::Parallel(group) => Some(group.as_ref()),
                _ => None,
            },
            Unit::Stage { node, position } => match &graph.steps()[node].body {
                StepBody::Loop(controller) => match &controller.stages[position].body {
                    StageBody::Parallel(group) => Some(group.as_ref()),
                    StageBody::Task(_) => None,
                },
                _ => None,
            },
        }
    }
}
