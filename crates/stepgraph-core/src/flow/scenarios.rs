//! End-to-end runs through the scheduler.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{Map, Value, json};
use stepgraph_types::config::EngineConfig;
use stepgraph_types::error::{MemoryError, TaskExecutionError};
use stepgraph_types::event::FlowEvent;
use stepgraph_types::memory::SessionKey;
use stepgraph_types::task::TaskSpec;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::guardrail::KeywordGuardrail;
use crate::memory::InMemoryMemoryStore;
use crate::task::StaticExecutor;

#[derive(Debug, Clone, Default, PartialEq)]
struct Research {
    topic: String,
    urls: Vec<String>,
    findings: Vec<Value>,
    summary: Option<String>,
    failed_elements: usize,
    trail: Vec<String>,
    verdict: String,
    gaps: u32,
    passes: u32,
    fills: u32,
    history: String,
}

type Ctx = StepContext<Research>;

fn done(update: Update<Research>) -> Result<Update<Research>, FlowError> {
    Ok(update)
}

fn inputs(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn initial(n: usize) -> Research {
    Research {
        topic: "rust async runtimes".to_string(),
        urls: (0..n).map(|i| format!("u{i}")).collect(),
        ..Research::default()
    }
}

fn drain(rx: &mut broadcast::Receiver<FlowEvent>) -> Vec<FlowEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn fixtures() -> StaticExecutor {
    StaticExecutor::new()
        .with_result("research", json!({"text": "finding"}), 10)
        .with_result("summarize", json!({"text": "all done"}), 5)
}

// ---------------------------------------------------------------------------
// Graphs
// ---------------------------------------------------------------------------

fn no_delay(_index: usize, _size: usize) -> Duration {
    Duration::ZERO
}

/// Later elements finish first.
fn reverse_stagger(index: usize, size: usize) -> Duration {
    Duration::from_millis(15 * (size - index) as u64)
}

fn fourth_is_late(index: usize, _size: usize) -> Duration {
    if index == 3 {
        Duration::from_millis(60)
    } else {
        Duration::ZERO
    }
}

fn all_but_first_are_slow(index: usize, _size: usize) -> Duration {
    if index == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis(500)
    }
}

/// One `research` call per URL; each element waits `delay(index, size)`
/// before calling out.
fn research_group(delay: fn(usize, usize) -> Duration) -> ParallelGroup<Research> {
    ParallelGroup::new(
        |s: &Research| s.urls.iter().map(|u| json!(u)).collect(),
        move |ctx: ElementContext<Research>| async move {
            tokio::time::sleep(delay(ctx.index(), ctx.state().urls.len())).await;
            let out = ctx
                .execute(
                    &TaskSpec::named("research"),
                    inputs(&[("url", ctx.element().clone())]),
                )
                .await?;
            Ok::<_, FlowError>(json!({"url": ctx.element(), "text": out.text()}))
        },
    )
    .merge(|s, values| s.findings = values)
}

/// plan -> research (fan-out) -> summarize -> finish
fn research_graph(group: ParallelGroup<Research>) -> FlowGraph<Research> {
    FlowGraph::builder("deep_research")
        .step(Step::task("plan", Trigger::Start, |ctx: Ctx| async move {
            let topic = ctx.state().topic.clone();
            done(Update::with(move |s: &mut Research| {
                s.trail.push(format!("plan:{topic}"))
            }))
        }))
        .step(Step::parallel("research", "plan", group))
        .step(Step::task("summarize", "research", |ctx: Ctx| async move {
            let out = ctx
                .execute(
                    &TaskSpec::named("summarize"),
                    inputs(&[("findings", json!(ctx.state().findings))]),
                )
                .await?;
            let text = out.text().unwrap_or_default().to_string();
            done(Update::with(move |s: &mut Research| {
                s.summary = Some(text);
                s.trail.push("summarize".to_string());
            }))
        }))
        .step(
            Step::task("finish", "summarize", |ctx: Ctx| async move {
                done(Update::output(json!({"summary": ctx.state().summary})))
            })
            .terminal(),
        )
        .build()
        .unwrap()
}

/// draft -> route_review -> publish | rewrite
fn review_graph(verdict: &'static str) -> FlowGraph<Research> {
    FlowGraph::builder("review")
        .step(Step::task("draft", Trigger::Start, move |_ctx: Ctx| async move {
            done(Update::with(move |s: &mut Research| {
                s.verdict = verdict.to_string()
            }))
        }))
        .step(Step::router(
            "route_review",
            "draft",
            ["approved", "revise", "hold"],
            |s: &Research| s.verdict.clone(),
        ))
        .step(
            Step::task("publish", Trigger::on_signal("approved"), |_ctx: Ctx| async {
                done(Update::output("published"))
            })
            .terminal(),
        )
        .step(
            Step::task("rewrite", Trigger::on_signal("revise"), |_ctx: Ctx| async {
                done(Update::output("rewritten"))
            })
            .terminal(),
        )
        .build()
        .unwrap()
}

/// gap_loop(check_gaps, fill_gaps) -> finish
fn gap_graph(max_iterations: u32, check_after: Option<&str>) -> FlowGraph<Research> {
    let mut controller = LoopController::new(max_iterations, |s: &Research| s.gaps == 0)
        .task("check_gaps", |_ctx: Ctx| async {
            done(Update::with(|s: &mut Research| s.passes += 1))
        })
        .task("fill_gaps", |_ctx: Ctx| async {
            done(Update::with(|s: &mut Research| {
                s.fills += 1;
                s.gaps = s.gaps.saturating_sub(1);
            }))
        });
    if let Some(check) = check_after {
        controller = controller.check_after(check);
    }
    FlowGraph::builder("gap_fill")
        .step(Step::looped("gap_loop", Trigger::Start, controller))
        .step(
            Step::task("finish", "gap_loop", |ctx: Ctx| async move {
                done(Update::output(json!({"gaps": ctx.state().gaps})))
            })
            .terminal(),
        )
        .build()
        .unwrap()
}

fn sleeper(name: &str, delay: Duration) -> Step<Research> {
    Step::task(name, Trigger::Start, move |_ctx: Ctx| async move {
        tokio::time::sleep(delay).await;
        done(Update::output("woke"))
    })
    .terminal()
}

fn single(step: Step<Research>) -> FlowGraph<Research> {
    FlowGraph::builder("single").step(step).build().unwrap()
}

/// A guarded single-step graph that asks the executor to answer the topic.
fn guarded_graph() -> FlowGraph<Research> {
    FlowGraph::builder("guarded")
        .step(
            Step::task("answer", Trigger::Start, |ctx: Ctx| async move {
                let out = ctx
                    .execute(
                        &TaskSpec::named("answer"),
                        inputs(&[("topic", json!(ctx.state().topic))]),
                    )
                    .await?;
                let text = out.text().unwrap_or_default().to_string();
                done(Update::with(move |s: &mut Research| s.summary = Some(text)))
            })
            .terminal(),
        )
        .input_guard(|s: &Research| s.topic.clone())
        .build()
        .unwrap()
}

// ---------------------------------------------------------------------------
// Fan-out and join
// ---------------------------------------------------------------------------

#[tokio::test]
async fn three_urls_research_then_summarize_in_order() {
    let executor = Arc::new(fixtures());
    let scheduler = Scheduler::builder().executor(Arc::clone(&executor)).build();
    let graph = research_graph(research_group(reverse_stagger));

    let output = scheduler.run(&graph, initial(3)).await.unwrap();

    let order: Vec<&str> = output.completed_steps().collect();
    assert_eq!(order, vec!["plan", "research", "summarize", "finish"]);

    let urls: Vec<Value> = output.state.findings.iter().map(|f| f["url"].clone()).collect();
    assert_eq!(urls, vec![json!("u0"), json!("u1"), json!("u2")]);

    assert_eq!(output.terminal, "finish");
    assert_eq!(output.output, json!({"summary": "all done"}));
    assert_eq!(output.state.summary.as_deref(), Some("all done"));
    assert_eq!(output.total_tokens, 35);
    assert_eq!(executor.call_count(), 4);
}

#[tokio::test]
async fn empty_fan_out_joins_immediately() {
    let executor = Arc::new(fixtures());
    let scheduler = Scheduler::builder().executor(Arc::clone(&executor)).build();
    let mut rx = scheduler.subscribe();
    let graph = research_graph(research_group(no_delay));

    let output = scheduler.run(&graph, initial(0)).await.unwrap();

    assert!(output.ran("research"));
    assert!(output.ran("summarize"));
    assert!(output.state.findings.is_empty());
    assert!(executor.calls().iter().all(|c| c.task != "research"));

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        FlowEvent::CohortStarted { size: 0, .. }
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        FlowEvent::CohortJoined {
            succeeded: 0,
            failed: 0,
            ..
        }
    )));
}

#[tokio::test]
async fn one_late_failure_among_five_aborts_the_run() {
    let executor = Arc::new(fixtures().with_failure_when(
        "research",
        "url",
        json!("u3"),
        "fetch failed",
    ));
    let scheduler = Scheduler::builder().executor(Arc::clone(&executor)).build();
    let graph = research_graph(research_group(fourth_is_late));

    let err = scheduler.run(&graph, initial(5)).await.unwrap_err();

    let failure = match err {
        FlowError::PartialCohortFailure(failure) => failure,
        other => panic!("unexpected error: {other:?}"),
    };
    assert_eq!(failure.group, "research");
    assert_eq!(failure.succeeded, vec![0, 1, 2, 4]);
    assert_eq!(failure.failed_indices(), vec![3]);
    assert!(failure.cancelled.is_empty());
    assert!(matches!(
        failure.failed[0].error,
        FlowError::TaskExecution(TaskExecutionError::Failed { .. })
    ));
    assert!(executor.calls().iter().all(|c| c.task != "summarize"));
}

#[tokio::test]
async fn fail_fast_cancels_outstanding_siblings() {
    let executor = Arc::new(fixtures().with_failure_when(
        "research",
        "url",
        json!("u0"),
        "fetch failed",
    ));
    let scheduler = Scheduler::builder().executor(Arc::clone(&executor)).build();
    let graph = research_graph(research_group(all_but_first_are_slow));

    let started = std::time::Instant::now();
    let err = scheduler.run(&graph, initial(4)).await.unwrap_err();

    let FlowError::PartialCohortFailure(failure) = &err else {
        panic!("unexpected error: {err:?}");
    };
    assert_eq!(failure.failed_indices(), vec![0]);
    assert_eq!(failure.cancelled, vec![1, 2, 3]);
    assert!(failure.succeeded.is_empty());
    assert!(started.elapsed() < Duration::from_millis(400));
}

#[tokio::test]
async fn collect_all_reports_every_failure() {
    let executor = Arc::new(
        fixtures()
            .with_failure_when("research", "url", json!("u1"), "fetch failed")
            .with_failure_when("research", "url", json!("u3"), "fetch failed"),
    );
    let scheduler = Scheduler::builder().executor(Arc::clone(&executor)).build();
    let group = research_group(reverse_stagger).policy(CohortPolicy::CollectAll);
    let graph = research_graph(group);

    let err = scheduler.run(&graph, initial(5)).await.unwrap_err();

    let FlowError::PartialCohortFailure(failure) = &err else {
        panic!("unexpected error: {err:?}");
    };
    assert_eq!(failure.failed_indices(), vec![1, 3]);
    assert_eq!(failure.succeeded, vec![0, 2, 4]);
    assert!(failure.cancelled.is_empty());
}

#[tokio::test]
async fn failure_handler_completes_group_in_degraded_mode() {
    let executor = Arc::new(fixtures().with_failure_when(
        "research",
        "url",
        json!("u3"),
        "fetch failed",
    ));
    let scheduler = Scheduler::builder().executor(Arc::clone(&executor)).build();
    let group = research_group(fourth_is_late).on_failure(|s, failure, partial| {
        s.failed_elements = failure.failed.len();
        s.findings = partial.into_iter().map(|(_, v)| v).collect();
        Ok(())
    });
    let graph = research_graph(group);

    let output = scheduler.run(&graph, initial(5)).await.unwrap();

    assert_eq!(output.state.failed_elements, 1);
    assert_eq!(output.state.findings.len(), 4);
    assert!(output.ran("summarize"));
}

#[tokio::test]
async fn concurrency_cap_bounds_cohort_elements() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let group = {
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        ParallelGroup::new(
            |s: &Research| s.urls.iter().map(|u| json!(u)).collect(),
            move |ctx: ElementContext<Research>| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, FlowError>(ctx.element().clone())
                }
            },
        )
        .merge(|s, values| s.findings = values)
    };
    let graph = FlowGraph::builder("capped")
        .step(Step::parallel("research", Trigger::Start, group).terminal())
        .build()
        .unwrap();
    let config = EngineConfig {
        max_concurrency: 1,
        ..EngineConfig::default()
    };

    let output = Scheduler::new(config).run(&graph, initial(4)).await.unwrap();

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(output.state.findings.len(), 4);
    assert_eq!(output.output, json!(["u0", "u1", "u2", "u3"]));
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn router_signal_selects_one_branch() {
    let scheduler = Scheduler::new(EngineConfig::default());

    let output = scheduler.run(&review_graph("approved"), Research::default()).await.unwrap();

    assert_eq!(output.terminal, "publish");
    assert_eq!(output.output, json!("published"));
    assert_eq!(output.signals, vec!["approved".to_string()]);
    assert!(!output.ran("rewrite"));
    let route = output.history.iter().find(|r| r.step == "route_review").unwrap();
    assert_eq!(route.signal.as_deref(), Some("approved"));
}

#[tokio::test]
async fn undeclared_signal_is_a_contract_violation() {
    let scheduler = Scheduler::new(EngineConfig::default());
    let mut rx = scheduler.subscribe();

    let err = scheduler.run(&review_graph("C"), Research::default()).await.unwrap_err();

    match err {
        FlowError::RouterContractViolation {
            router,
            signal,
            declared,
        } => {
            assert_eq!(router, "route_review");
            assert_eq!(signal, "C");
            assert_eq!(declared, vec!["approved", "revise", "hold"]);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let events = drain(&mut rx);
    assert!(!events.iter().any(|e| matches!(
        e,
        FlowEvent::StepStarted { step, .. } if step == "publish" || step == "rewrite"
    )));
    assert!(events.iter().any(|e| matches!(e, FlowEvent::RunFailed { .. })));
}

#[tokio::test]
async fn signal_without_listener_is_a_dead_end() {
    let scheduler = Scheduler::new(EngineConfig::default());

    let err = scheduler.run(&review_graph("hold"), Research::default()).await.unwrap_err();

    match err {
        FlowError::DeadEnd { completed, signals } => {
            assert_eq!(completed, vec!["draft".to_string()]);
            assert_eq!(signals, vec!["hold".to_string()]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Loops
// ---------------------------------------------------------------------------

#[tokio::test]
async fn loop_stops_at_cap_without_converging() {
    let scheduler = Scheduler::new(EngineConfig::default());
    let mut rx = scheduler.subscribe();
    let state = Research {
        gaps: 10,
        ..Research::default()
    };

    let output = scheduler.run(&gap_graph(2, None), state).await.unwrap();

    let record = output.loops["gap_loop"];
    assert_eq!(record.iterations, 2);
    assert!(!record.converged);
    assert_eq!(output.state.passes, 2);
    assert_eq!(output.state.fills, 2);
    assert_eq!(output.output, json!({"gaps": 8}));

    let iterations = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, FlowEvent::LoopIteration { .. }))
        .count();
    assert_eq!(iterations, 2);
}

#[tokio::test]
async fn loop_exits_once_predicate_holds() {
    let scheduler = Scheduler::new(EngineConfig::default());
    let state = Research {
        gaps: 1,
        ..Research::default()
    };

    let output = scheduler.run(&gap_graph(5, None), state).await.unwrap();

    let record = output.loops["gap_loop"];
    assert_eq!(record.iterations, 1);
    assert!(record.converged);
    let order: Vec<&str> = output.completed_steps().collect();
    assert_eq!(order, vec!["check_gaps", "fill_gaps", "gap_loop", "finish"]);
}

#[tokio::test]
async fn converged_check_skips_rest_of_pass() {
    let scheduler = Scheduler::new(EngineConfig::default());

    let output = scheduler
        .run(&gap_graph(3, Some("check_gaps")), Research::default())
        .await
        .unwrap();

    assert_eq!(output.state.passes, 1);
    assert_eq!(output.state.fills, 0);
    assert!(output.loops["gap_loop"].converged);
}

// ---------------------------------------------------------------------------
// Trigger semantics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn any_trigger_fires_once_and_first_terminal_wins() {
    let pause = |ms: u64, label: &'static str| {
        move |_ctx: Ctx| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            done(Update::with(move |s: &mut Research| {
                s.trail.push(label.to_string())
            }))
        }
    };
    let graph = FlowGraph::builder("race")
        .step(Step::task("start", Trigger::Start, pause(0, "start")))
        .step(Step::task("quick", "start", pause(10, "quick")))
        .step(Step::task("steady", "start", pause(40, "steady")))
        .step(Step::task("join", Trigger::any_of(["quick", "steady"]), pause(0, "join")))
        .step(
            Step::task("finish", Trigger::all_of(["join", "steady"]), |_ctx: Ctx| async {
                done(Update::output("finished"))
            })
            .terminal(),
        )
        .step(Step::task("straggler", "start", pause(2_000, "straggler")).terminal())
        .build()
        .unwrap();

    let output = Scheduler::new(EngineConfig::default())
        .run(&graph, Research::default())
        .await
        .unwrap();

    assert_eq!(output.terminal, "finish");
    assert_eq!(output.state.trail.iter().filter(|t| *t == "join").count(), 1);
    assert!(!output.ran("straggler"));
    assert!(output.elapsed_ms < 2_000);
}

#[tokio::test]
async fn repeated_runs_are_identical() {
    let scheduler = Scheduler::builder().executor(fixtures()).build();
    let graph = research_graph(research_group(reverse_stagger));

    let first = scheduler.run(&graph, initial(3)).await.unwrap();
    let second = scheduler.run(&graph, initial(3)).await.unwrap();

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(first.state, second.state);
    assert_eq!(first.output, second.output);
    assert_eq!(
        first.completed_steps().collect::<Vec<_>>(),
        second.completed_steps().collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn lifecycle_events_bracket_the_run() {
    let scheduler = Scheduler::builder().executor(fixtures()).build();
    let mut rx = scheduler.subscribe();
    let graph = research_graph(research_group(no_delay));

    let output = scheduler.run(&graph, initial(2)).await.unwrap();

    let events = drain(&mut rx);
    assert!(matches!(events.first(), Some(FlowEvent::RunStarted { depth: 0, .. })));
    assert!(matches!(
        events.last(),
        Some(FlowEvent::RunCompleted { total_tokens: 25, .. })
    ));
    assert!(events.iter().all(|e| e.run_id() == output.run_id));
}

// ---------------------------------------------------------------------------
// Failures, timeouts and cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn executor_error_reaches_caller_typed() {
    let scheduler = Scheduler::builder()
        .executor(fixtures().with_failure("summarize", "model offline"))
        .build();
    let graph = research_graph(research_group(no_delay));

    let err = scheduler.run(&graph, initial(1)).await.unwrap_err();

    assert_eq!(
        err,
        FlowError::TaskExecution(TaskExecutionError::Failed {
            task: "summarize".to_string(),
            message: "model offline".to_string(),
        })
    );
}

#[tokio::test]
async fn missing_executor_is_unavailable() {
    let scheduler = Scheduler::new(EngineConfig::default());
    let graph = research_graph(research_group(no_delay));

    let err = scheduler.run(&graph, initial(0)).await.unwrap_err();

    assert!(matches!(
        err,
        FlowError::TaskExecution(TaskExecutionError::Unavailable(_))
    ));
}

#[tokio::test]
async fn panicking_step_fails_the_run() {
    let graph = single(
        Step::task("explode", Trigger::Start, |_ctx: Ctx| async {
            if true {
                panic!("boom");
            }
            done(Update::none())
        })
        .terminal(),
    );

    let err = Scheduler::new(EngineConfig::default())
        .run(&graph, Research::default())
        .await
        .unwrap_err();

    assert_eq!(err, FlowError::step_failed("explode", "step panicked"));
}

#[tokio::test]
async fn step_timeout_fails_the_run() {
    let graph = single(sleeper("slow", Duration::from_millis(500)).timeout(Duration::from_millis(20)));

    let err = Scheduler::new(EngineConfig::default())
        .run(&graph, Research::default())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        FlowError::StepTimeout {
            step: "slow".to_string(),
            timeout_ms: 20,
        }
    );
}

#[tokio::test]
async fn cancel_by_run_id_stops_in_flight_work() {
    let executor = fixtures().with_delay("research", Duration::from_secs(5));
    let scheduler = Scheduler::builder().executor(executor).build();
    let mut rx = scheduler.subscribe();
    let graph = Arc::new(research_graph(research_group(no_delay)));

    let handle = tokio::spawn({
        let scheduler = scheduler.clone();
        let graph = Arc::clone(&graph);
        async move { scheduler.run(&graph, initial(2)).await }
    });

    let run_id = loop {
        if let FlowEvent::CohortStarted { run_id, .. } = rx.recv().await.unwrap() {
            break run_id;
        }
    };
    assert_eq!(scheduler.active_runs(), vec![run_id]);
    assert!(scheduler.cancel(run_id));

    let result = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.unwrap_err(), FlowError::Cancelled);
    assert!(scheduler.active_runs().is_empty());

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(e, FlowEvent::RunCancelled { .. })));
    assert!(!events.iter().any(|e| matches!(
        e,
        FlowEvent::StepStarted { step, .. } if step == "summarize"
    )));
}

#[tokio::test]
async fn external_token_cancels_the_run() {
    let graph = single(sleeper("slow", Duration::from_secs(5)));
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let err = Scheduler::new(EngineConfig::default())
        .run_with_cancel(&graph, Research::default(), &token)
        .await
        .unwrap_err();

    assert_eq!(err, FlowError::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn concurrent_run_limit_is_enforced() {
    let config = EngineConfig {
        max_concurrent_runs: Some(1),
        ..EngineConfig::default()
    };
    let scheduler = Scheduler::new(config);
    let mut rx = scheduler.subscribe();
    let graph = Arc::new(single(sleeper("slow", Duration::from_millis(200))));

    let first = tokio::spawn({
        let scheduler = scheduler.clone();
        let graph = Arc::clone(&graph);
        async move { scheduler.run(&graph, Research::default()).await }
    });
    while !matches!(rx.recv().await.unwrap(), FlowEvent::RunStarted { .. }) {}

    let err = scheduler.run(&graph, Research::default()).await.unwrap_err();
    assert_eq!(err, FlowError::ConcurrencyLimitReached { limit: 1 });

    assert!(first.await.unwrap().is_ok());
    assert!(scheduler.run(&graph, Research::default()).await.is_ok());
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

#[tokio::test]
async fn blocked_input_never_reaches_the_executor() {
    let executor = Arc::new(StaticExecutor::new().with_default(json!({"text": "ok"}), 1));
    let scheduler = Scheduler::builder()
        .executor(Arc::clone(&executor))
        .guardrail(KeywordGuardrail::new(["forbidden"]).with_replacement("topic not allowed"))
        .build();
    let state = Research {
        topic: "a Forbidden topic".to_string(),
        ..Research::default()
    };

    let err = scheduler.run(&guarded_graph(), state).await.unwrap_err();

    assert_eq!(
        err,
        FlowError::PolicyBlocked {
            reason: "topic not allowed".to_string(),
        }
    );
    assert_eq!(executor.call_count(), 0);
}

#[tokio::test]
async fn blocked_output_is_replaced() {
    let scheduler = Scheduler::builder()
        .executor(
            StaticExecutor::new().with_result("answer", json!({"text": "the secret plan", "score": 3}), 4),
        )
        .guardrail(KeywordGuardrail::new(["secret"]).with_replacement("[withheld]"))
        .build();

    let output = scheduler.run(&guarded_graph(), initial(0)).await.unwrap();

    assert_eq!(output.state.summary.as_deref(), Some("[withheld]"));
    assert_eq!(output.total_tokens, 4);
}

#[tokio::test]
async fn blocked_structured_output_is_replaced() {
    let scheduler = Scheduler::builder()
        .executor(StaticExecutor::new().with_result("gap_check", json!({"gaps": ["the secret plan"]}), 2))
        .guardrail(KeywordGuardrail::new(["secret"]).with_replacement("[withheld]"))
        .build();
    let graph = single(
        Step::task("gap_check", Trigger::Start, |ctx: Ctx| async move {
            let out = ctx.execute(&TaskSpec::named("gap_check"), Map::new()).await?;
            done(Update::output(out.result))
        })
        .terminal(),
    );

    let output = scheduler.run(&graph, initial(0)).await.unwrap();

    assert_eq!(output.output, json!("[withheld]"));
}

#[tokio::test]
async fn clean_structured_output_passes_through() {
    let scheduler = Scheduler::builder()
        .executor(StaticExecutor::new().with_result("gap_check", json!({"gaps": ["benchmarks"]}), 2))
        .guardrail(KeywordGuardrail::new(["secret"]))
        .build();
    let graph = single(
        Step::task("gap_check", Trigger::Start, |ctx: Ctx| async move {
            let out = ctx.execute(&TaskSpec::named("gap_check"), Map::new()).await?;
            done(Update::output(out.result))
        })
        .terminal(),
    );

    let output = scheduler.run(&graph, initial(0)).await.unwrap();

    assert_eq!(output.output, json!({"gaps": ["benchmarks"]}));
}

fn chat_graph() -> FlowGraph<Research> {
    single(
        Step::task("reply", Trigger::Start, |ctx: Ctx| async move {
            let key = SessionKey::new("session-1", "reader");
            let history = ctx.load_memory(&key).await?;
            let out = ctx
                .execute(
                    &TaskSpec::named("reply"),
                    inputs(&[("history", json!(history)), ("message", json!(ctx.state().topic))]),
                )
                .await?;
            let text = out.text().unwrap_or_default().to_string();
            ctx.save_memory(&key, &ctx.state().topic, &text).await?;
            done(Update::with(move |s: &mut Research| {
                s.history = history;
                s.summary = Some(text);
            }))
        })
        .terminal(),
    )
}

#[tokio::test]
async fn memory_carries_history_between_runs() {
    let scheduler = Scheduler::builder()
        .executor(StaticExecutor::new().with_result("reply", json!("hi there"), 2))
        .memory(InMemoryMemoryStore::new())
        .build();
    let state = Research {
        topic: "hello".to_string(),
        ..Research::default()
    };

    let first = scheduler.run(&chat_graph(), state.clone()).await.unwrap();
    let second = scheduler.run(&chat_graph(), state).await.unwrap();

    assert!(first.state.history.is_empty());
    assert!(second.state.history.contains("USER: hello"));
    assert!(second.state.history.contains("ASSISTANT: hi there"));
}

#[tokio::test]
async fn missing_memory_store_is_unavailable() {
    let scheduler = Scheduler::builder()
        .executor(StaticExecutor::new().with_default(json!("hi"), 0))
        .build();

    let err = scheduler.run(&chat_graph(), Research::default()).await.unwrap_err();

    assert!(matches!(err, FlowError::Memory(MemoryError::Unavailable(_))));
}

// ---------------------------------------------------------------------------
// Nested runs
// ---------------------------------------------------------------------------

fn delegating_graph() -> FlowGraph<Research> {
    let inner = Arc::new(single(
        Step::task("answer", Trigger::Start, |ctx: Ctx| async move {
            ctx.execute(&TaskSpec::named("inner_task"), Map::new()).await?;
            done(Update::output("inner done"))
        })
        .terminal(),
    ));

    FlowGraph::builder("outer")
        .step(Step::task("delegate", Trigger::Start, move |ctx: Ctx| {
            let inner = Arc::clone(&inner);
            async move {
                let nested = ctx.subflow(&inner, Research::default()).await?;
                let text = nested.output.as_str().map(str::to_string);
                done(Update::with(move |s: &mut Research| s.summary = text))
            }
        }))
        .step(
            Step::task("finish", "delegate", |_ctx: Ctx| async {
                done(Update::output("outer done"))
            })
            .terminal(),
        )
        .build()
        .unwrap()
}

#[tokio::test]
async fn subflow_runs_nested_and_meters_tokens() {
    let scheduler = Scheduler::builder()
        .executor(StaticExecutor::new().with_result("inner_task", json!("x"), 7))
        .build();
    let mut rx = scheduler.subscribe();

    let output = scheduler.run(&delegating_graph(), Research::default()).await.unwrap();

    assert_eq!(output.state.summary.as_deref(), Some("inner done"));
    assert_eq!(output.total_tokens, 7);
    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(e, FlowEvent::RunStarted { depth: 1, .. })));
}

#[tokio::test]
async fn subflow_depth_is_limited() {
    let config = EngineConfig {
        max_subflow_depth: 0,
        ..EngineConfig::default()
    };
    let scheduler = Scheduler::builder()
        .config(config)
        .executor(StaticExecutor::new().with_default(json!("x"), 1))
        .build();

    let err = scheduler.run(&delegating_graph(), Research::default()).await.unwrap_err();

    assert_eq!(err, FlowError::SubflowDepthExceeded { depth: 1, max: 0 });
}
