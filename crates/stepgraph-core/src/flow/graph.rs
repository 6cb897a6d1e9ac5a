//! Flow graphs: construction, validation, and description.
//!
//! A `FlowGraph` is built once and then shared read-only by any number of
//! concurrent runs. `FlowGraphBuilder::build` performs every structural
//! check up front, so the scheduler can treat a built graph as well formed:
//!
//! - step names are non-empty and unique (loop stages included)
//! - exactly one step triggers on `Start`, and `Start` never nests
//! - every referenced step exists and is neither a router nor loop-interior
//! - every referenced signal is declared by some router
//! - loops have a cap, at least one stage, and a known check stage
//! - some terminal is reachable from start and the trigger graph is acyclic

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde::Serialize;
use stepgraph_types::flow::StepKind;

use super::FlowState;
use super::error::GraphConfigurationError;
use super::step::{Step, StepBody};
use super::trigger::Trigger;

pub(crate) type InputGuardFn<S> = Arc<dyn Fn(&S) -> String + Send + Sync>;

/// An immutable, validated step graph.
pub struct FlowGraph<S> {
    name: String,
    steps: Vec<Step<S>>,
    index: HashMap<String, usize>,
    input_guard: Option<InputGuardFn<S>>,
}

impl<S: FlowState> FlowGraph<S> {
    pub fn builder(name: impl Into<String>) -> FlowGraphBuilder<S> {
        FlowGraphBuilder {
            name: name.into(),
            steps: Vec::new(),
            input_guard: None,
        }
    }
}

impl<S> FlowGraph<S> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Steps in declaration order.
    pub fn steps(&self) -> &[Step<S>] {
        &self.steps
    }

    pub fn step(&self, name: &str) -> Option<&Step<S>> {
        self.index.get(name).map(|&i| &self.steps[i])
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Names of the terminal steps in declaration order.
    pub fn terminals(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.terminal)
            .map(|s| s.name.as_str())
            .collect()
    }

    /// The step triggered by `Start`.
    pub fn start_step(&self) -> &str {
        self.steps
            .iter()
            .find(|s| s.trigger.is_start())
            .map(|s| s.name.as_str())
            .unwrap_or_default()
    }

    pub(crate) fn input_guard(&self) -> Option<&InputGuardFn<S>> {
        self.input_guard.as_ref()
    }

    /// Serialisable summary of the graph's structure.
    pub fn describe(&self) -> GraphDescription {
        GraphDescription {
            name: self.name.clone(),
            start: self.start_step().to_string(),
            terminals: self.terminals().into_iter().map(String::from).collect(),
            steps: self
                .steps
                .iter()
                .map(|step| {
                    let (stages, max_iterations) = match &step.body {
                        StepBody::Loop(controller) => (
                            controller.stage_names().map(String::from).collect(),
                            Some(controller.max_iterations()),
                        ),
                        _ => (Vec::new(), None),
                    };
                    StepDescription {
                        name: step.name.clone(),
                        kind: step.kind(),
                        trigger: step.trigger.clone(),
                        terminal: step.terminal,
                        signals: step.signals().to_vec(),
                        stages,
                        max_iterations,
                    }
                })
                .collect(),
        }
    }
}

impl<S> std::fmt::Debug for FlowGraph<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowGraph")
            .field("name", &self.name)
            .field("steps", &self.steps)
            .field("input_guard", &self.input_guard.is_some())
            .finish()
    }
}

/// Structure of a graph, as returned by [`FlowGraph::describe`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphDescription {
    pub name: String,
    pub start: String,
    pub terminals: Vec<String>,
    pub steps: Vec<StepDescription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepDescription {
    pub name: String,
    pub kind: StepKind,
    pub trigger: Trigger,
    pub terminal: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub signals: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Accumulates steps; `build` validates them into a [`FlowGraph`].
pub struct FlowGraphBuilder<S> {
    name: String,
    steps: Vec<Step<S>>,
    input_guard: Option<InputGuardFn<S>>,
}

impl<S: FlowState> FlowGraphBuilder<S> {
    pub fn step(mut self, step: Step<S>) -> Self {
        self.steps.push(step);
        self
    }

    /// Text screened by the input guardrail before the first step runs.
    pub fn input_guard(mut self, text: impl Fn(&S) -> String + Send + Sync + 'static) -> Self {
        self.input_guard = Some(Arc::new(text));
        self
    }

    pub fn build(self) -> Result<FlowGraph<S>, GraphConfigurationError> {
        let index = validate(&self.steps)?;
        tracing::debug!(graph = %self.name, steps = self.steps.len(), "flow graph built");
        Ok(FlowGraph {
            name: self.name,
            steps: self.steps,
            index,
            input_guard: self.input_guard,
        })
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate<S>(steps: &[Step<S>]) -> Result<HashMap<String, usize>, GraphConfigurationError> {
    if steps.is_empty() {
        return Err(GraphConfigurationError::Empty);
    }

    let index = check_names(steps)?;
    let interior = interior_owners(steps);
    check_start(steps)?;
    check_nodes(steps)?;
    check_references(steps, &index, &interior)?;

    if !steps.iter().any(|s| s.terminal) {
        return Err(GraphConfigurationError::NoTerminal);
    }

    check_reachable(steps)?;
    check_acyclic(steps, &index)?;
    Ok(index)
}

/// Unique, non-empty names across top-level steps and loop stages.
fn check_names<S>(steps: &[Step<S>]) -> Result<HashMap<String, usize>, GraphConfigurationError> {
    let mut index = HashMap::with_capacity(steps.len());
    let mut seen = HashSet::new();

    for (i, step) in steps.iter().enumerate() {
        let mut names = vec![step.name.as_str()];
        if let StepBody::Loop(controller) = &step.body {
            names.extend(controller.stage_names());
        }
        for name in names {
            if name.is_empty() {
                return Err(GraphConfigurationError::EmptyStepName);
            }
            if !seen.insert(name) {
                return Err(GraphConfigurationError::DuplicateStep(name.to_string()));
            }
        }
        index.insert(step.name.clone(), i);
    }
    Ok(index)
}

/// Map of loop stage name to owning loop name.
fn interior_owners<S>(steps: &[Step<S>]) -> HashMap<&str, &str> {
    steps
        .iter()
        .filter_map(|step| match &step.body {
            StepBody::Loop(controller) => Some(
                controller
                    .stage_names()
                    .map(move |stage| (stage, step.name.as_str())),
            ),
            _ => None,
        })
        .flatten()
        .collect()
}

fn check_start<S>(steps: &[Step<S>]) -> Result<(), GraphConfigurationError> {
    for step in steps {
        if step.trigger.has_nested_start() {
            return Err(GraphConfigurationError::NestedStart {
                step: step.name.clone(),
            });
        }
        if step.trigger.has_empty_combinator() {
            return Err(GraphConfigurationError::EmptyCombinator {
                step: step.name.clone(),
            });
        }
    }

    let starts: Vec<String> = steps
        .iter()
        .filter(|s| s.trigger.is_start())
        .map(|s| s.name.clone())
        .collect();
    match starts.len() {
        0 => Err(GraphConfigurationError::NoStartStep),
        1 => Ok(()),
        _ => Err(GraphConfigurationError::MultipleStartSteps(starts)),
    }
}

/// Per-kind checks for routers and loops.
fn check_nodes<S>(steps: &[Step<S>]) -> Result<(), GraphConfigurationError> {
    for step in steps {
        match &step.body {
            StepBody::Router(router) => {
                if step.terminal {
                    return Err(GraphConfigurationError::TerminalRouter(step.name.clone()));
                }
                if router.signals.is_empty() {
                    return Err(GraphConfigurationError::RouterWithoutSignals(step.name.clone()));
                }
                let mut seen = HashSet::new();
                for signal in &router.signals {
                    if !seen.insert(signal.as_str()) {
                        return Err(GraphConfigurationError::DuplicateSignal {
                            router: step.name.clone(),
                            signal: signal.clone(),
                        });
                    }
                }
            }
            StepBody::Loop(controller) => {
                if controller.max_iterations == 0 {
                    return Err(GraphConfigurationError::UncappedLoop(step.name.clone()));
                }
                if controller.stages.is_empty() {
                    return Err(GraphConfigurationError::EmptyLoop(step.name.clone()));
                }
                if let Some(check) = &controller.check_after {
                    if !controller.stages.iter().any(|s| &s.name == check) {
                        return Err(GraphConfigurationError::UnknownCheckStep {
                            loop_name: step.name.clone(),
                            step: check.clone(),
                        });
                    }
                }
            }
            StepBody::Task(_) | StepBody::Parallel(_) => {}
        }
    }
    Ok(())
}

fn check_references<S>(
    steps: &[Step<S>],
    index: &HashMap<String, usize>,
    interior: &HashMap<&str, &str>,
) -> Result<(), GraphConfigurationError> {
    let declared: HashSet<&str> = steps
        .iter()
        .flat_map(|s| s.signals().iter().map(String::as_str))
        .collect();

    for step in steps {
        for reference in step.trigger.step_refs() {
            match index.get(reference) {
                Some(&i) if steps[i].kind() == StepKind::Router => {
                    return Err(GraphConfigurationError::RouterReferenced {
                        step: step.name.clone(),
                        router: reference.to_string(),
                    });
                }
                Some(_) => {}
                None => {
                    return Err(match interior.get(reference) {
                        Some(owner) => GraphConfigurationError::InteriorStepReferenced {
                            step: step.name.clone(),
                            interior: reference.to_string(),
                            loop_name: owner.to_string(),
                        },
                        None => GraphConfigurationError::UnknownStep {
                            step: step.name.clone(),
                            reference: reference.to_string(),
                        },
                    });
                }
            }
        }

        for signal in step.trigger.signal_refs() {
            if !declared.contains(signal) {
                return Err(GraphConfigurationError::UnknownSignal {
                    step: step.name.clone(),
                    signal: signal.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Edges run from each referenced step (or each router declaring a
/// referenced signal) to the referencing step.
fn check_acyclic<S>(
    steps: &[Step<S>],
    index: &HashMap<String, usize>,
) -> Result<(), GraphConfigurationError> {
    let mut graph = DiGraph::<&str, ()>::new();
    let nodes: Vec<_> = steps.iter().map(|s| graph.add_node(s.name.as_str())).collect();

    let mut emitters: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, step) in steps.iter().enumerate() {
        for signal in step.signals() {
            emitters.entry(signal.as_str()).or_default().push(i);
        }
    }

    for (to, step) in steps.iter().enumerate() {
        for reference in step.trigger.step_refs() {
            if let Some(&from) = index.get(reference) {
                graph.add_edge(nodes[from], nodes[to], ());
            }
        }
        for signal in step.trigger.signal_refs() {
            for &from in emitters.get(signal).map(Vec::as_slice).unwrap_or_default() {
                graph.add_edge(nodes[from], nodes[to], ());
            }
        }
    }

    toposort(&graph, None).map_err(|cycle| {
        GraphConfigurationError::CycleDetected(graph[cycle.node_id()].to_string())
    })?;
    Ok(())
}

/// Fixpoint over "could this step ever run": a step can run once its
/// trigger is satisfiable from steps that can run and signals declared by
/// routers that can run.
fn check_reachable<S>(steps: &[Step<S>]) -> Result<(), GraphConfigurationError> {
    let mut reachable = vec![false; steps.len()];
    let mut completed = BTreeSet::new();
    let mut signals = BTreeSet::new();

    loop {
        let mut changed = false;
        for (i, step) in steps.iter().enumerate() {
            if reachable[i] || !step.trigger.is_satisfied(&completed, &signals) {
                continue;
            }
            reachable[i] = true;
            changed = true;
            match step.kind() {
                StepKind::Router => signals.extend(step.signals().iter().cloned()),
                _ => {
                    completed.insert(step.name.clone());
                }
            }
        }
        if !changed {
            break;
        }
    }

    let terminal_reachable = steps
        .iter()
        .zip(&reachable)
        .any(|(step, &ok)| step.terminal && ok);
    if terminal_reachable {
        Ok(())
    } else {
        Err(GraphConfigurationError::UnreachableTerminal(
            steps
                .iter()
                .filter(|s| s.terminal)
                .map(|s| s.name.clone())
                .collect(),
        ))
    }
}
