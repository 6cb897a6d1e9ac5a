//! `stepgraph run`: execute the research flow against fixtures.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use stepgraph_core::config::{load_engine_config, load_engine_config_from_dir};
use stepgraph_core::flow::{FlowError, RunOutput, Scheduler};
use stepgraph_core::guardrail::KeywordGuardrail;
use stepgraph_observe::flow_attrs::{FLOW_RUN_STATUS, FLOW_RUN_TERMINAL, FLOW_USAGE_TOTAL_TOKENS};
use stepgraph_types::event::FlowEvent;
use stepgraph_types::flow::RunStatus;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::CatalogArgs;
use crate::fixtures::FixtureSet;
use crate::research::{DeepResearch, ResearchTasks, deep_research_graph};

/// How long to let the progress printer drain after the run returns.
const PROGRESS_DRAIN: Duration = Duration::from_millis(250);

#[derive(Args, Debug)]
pub struct RunArgs {
    /// The research question.
    #[arg(short, long)]
    pub question: String,

    #[command(flatten)]
    pub catalog: CatalogArgs,

    /// Fixture file answering each task. Defaults to the bundled fixtures.
    #[arg(long)]
    pub fixtures: Option<PathBuf>,

    /// Engine config (TOML). Defaults to ./stepgraph.toml when present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Block questions and task outputs containing this term (repeatable).
    #[arg(long)]
    pub block: Vec<String>,

    /// Write the published article to this file.
    #[arg(long)]
    pub out: Option<PathBuf>,
}

pub async fn handle_run(args: RunArgs, json: bool, quiet: bool) -> Result<()> {
    let catalog = args.catalog.load().await?;
    let tasks = ResearchTasks::from_catalog(&catalog).context("Catalog is missing a research task")?;
    let graph = deep_research_graph(tasks).context("Research graph failed validation")?;

    let fixtures = match &args.fixtures {
        Some(path) => FixtureSet::load(path).await?,
        None => FixtureSet::bundled()?,
    };
    let config = match &args.config {
        Some(path) => load_engine_config(path).await,
        None => load_engine_config_from_dir(Path::new(".")).await,
    };

    let mut builder = Scheduler::builder()
        .config(config)
        .executor(fixtures.into_executor());
    if !args.block.is_empty() {
        builder = builder.guardrail(KeywordGuardrail::new(args.block.iter().cloned()));
    }
    let scheduler = builder.build();

    let progress = (!json && !quiet).then(|| tokio::spawn(print_progress(scheduler.subscribe())));

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let span = tracing::info_span!(
        "flow.run",
        flow.graph.name = graph.name(),
        flow.run.status = tracing::field::Empty,
        flow.run.terminal = tracing::field::Empty,
        flow.usage.total_tokens = tracing::field::Empty,
    );
    let result = scheduler
        .run_with_cancel(&graph, DeepResearch::new(args.question.clone()), &cancel)
        .instrument(span.clone())
        .await;
    interrupt.abort();

    // Dropping the scheduler closes the event channel once in-flight tasks
    // have released their handles.
    drop(scheduler);
    if let Some(handle) = progress {
        let _ = tokio::time::timeout(PROGRESS_DRAIN, handle).await;
    }

    match result {
        Ok(output) => {
            span.record(FLOW_RUN_STATUS, "completed");
            span.record(FLOW_RUN_TERMINAL, output.terminal.as_str());
            span.record(FLOW_USAGE_TOTAL_TOKENS, output.total_tokens);

            if let (Some(path), Some(document)) = (&args.out, &output.state.published) {
                tokio::fs::write(path, document)
                    .await
                    .with_context(|| format!("Failed to write article to {}", path.display()))?;
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&output.summary(graph.name()))?);
            } else if !quiet {
                print_output(&output, args.out.as_deref());
            }
            Ok(())
        }
        Err(err) => {
            let status = status_of(&err);
            span.record(FLOW_RUN_STATUS, status.to_string().as_str());
            if json {
                let out = serde_json::json!({
                    "graph": graph.name(),
                    "status": status,
                    "error": err.to_string(),
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            }
            Err(anyhow::Error::new(err).context(format!("Run {status}")))
        }
    }
}

fn status_of(err: &FlowError) -> RunStatus {
    match err {
        FlowError::Cancelled => RunStatus::Cancelled,
        _ => RunStatus::Failed,
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

async fn print_progress(mut events: broadcast::Receiver<FlowEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => print_event(&event),
            Err(RecvError::Lagged(skipped)) => {
                println!("  {} {skipped} progress events dropped", style("!").yellow());
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn print_event(event: &FlowEvent) {
    match event {
        FlowEvent::RunStarted { graph, depth, .. } => {
            if *depth == 0 {
                println!();
                println!("  {} Running '{}'", style(">").cyan().bold(), style(graph).cyan());
                println!();
            } else {
                println!("  {} Nested run '{graph}' (depth {depth})", style(">").dim());
            }
        }
        FlowEvent::StepStarted { step, kind, .. } => {
            println!("  {} {step} {}", style("-").dim(), style(kind).dim());
        }
        FlowEvent::StepCompleted {
            step, duration_ms, ..
        } => {
            println!(
                "  {} {step} {}",
                style("*").green(),
                style(format!("({duration_ms}ms)")).dim()
            );
        }
        FlowEvent::StepFailed { step, error, .. } => {
            println!("  {} {step}: {}", style("x").red().bold(), style(error).red());
        }
        FlowEvent::SignalEmitted { router, signal, .. } => {
            println!("  {} {router} -> {}", style("~").magenta(), style(signal).magenta());
        }
        FlowEvent::CohortStarted { group, size, .. } => {
            println!("    {group}: fanning out over {size}");
        }
        FlowEvent::CohortJoined {
            group,
            succeeded,
            failed,
            ..
        } => {
            let failed = if *failed > 0 {
                style(format!("{failed} failed")).red().to_string()
            } else {
                style("0 failed").dim().to_string()
            };
            println!("    {group}: joined {succeeded} ok, {failed}");
        }
        FlowEvent::LoopIteration {
            loop_name,
            iteration,
            max_iterations,
            ..
        } => {
            println!("    {loop_name}: pass {iteration}/{max_iterations}");
        }
        FlowEvent::RunCompleted { .. } | FlowEvent::RunFailed { .. } | FlowEvent::RunCancelled { .. } => {}
    }
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

fn print_output(output: &RunOutput<DeepResearch>, written_to: Option<&Path>) {
    println!();
    println!(
        "  {} Run completed at '{}'",
        style("*").green().bold(),
        style(&output.terminal).cyan()
    );
    println!("  Run ID: {}", style(output.run_id).dim());
    println!("  Tokens: {}", output.total_tokens);
    println!("  Elapsed: {}ms", output.elapsed_ms);
    println!();

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("#"),
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Kind"),
            Cell::new("Signal"),
            Cell::new("Duration"),
        ]);
    for (i, record) in output.history.iter().enumerate() {
        table.add_row(vec![
            Cell::new(i + 1),
            Cell::new(&record.step),
            Cell::new(record.kind),
            Cell::new(record.signal.as_deref().unwrap_or("-")),
            Cell::new(format!("{}ms", record.duration_ms)),
        ]);
    }
    println!("{table}");

    for (name, record) in &output.loops {
        let outcome = if record.converged {
            style("converged").green()
        } else {
            style("hit cap").yellow()
        };
        println!(
            "  Loop {name}: {}/{} passes, {outcome}",
            record.iterations, record.max_iterations
        );
    }

    let state = &output.state;
    println!("  Sub-questions: {}", state.sub_questions.len());
    println!("  Findings: {}", state.findings.len());
    if !state.banner_prompt.is_empty() {
        println!("  Banner: {}", style(&state.banner_prompt).italic());
    }
    match written_to {
        Some(path) => println!("  Article written to {}", style(path.display()).cyan()),
        None => {
            if let Some(title) = state.final_article.lines().find(|l| !l.trim().is_empty()) {
                println!("  Article: {}", style(title.trim_start_matches('#').trim()).bold());
            }
        }
    }
    println!();
}
