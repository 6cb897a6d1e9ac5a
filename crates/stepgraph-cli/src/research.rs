//! The bundled deep-research flow.
//!
//! ```text
//! initialize -> research (fan-out) -> check_gaps (loop: gap_check, fill_gaps)
//!   -> write_article -> critique_article -> route_after_critique
//!        approved ------------------------------+
//!        needs_revision -> revise_article ------+-> generate_banner -> publish_article
//! ```

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value, json};
use stepgraph_core::flow::{
    ElementContext, FlowError, FlowGraph, GraphConfigurationError, LoopController, ParallelGroup,
    Step, StepContext, Trigger, Update,
};
use stepgraph_core::task::TaskCatalog;
use stepgraph_types::error::CatalogError;
use stepgraph_types::task::TaskSpec;

pub const GRAPH_NAME: &str = "deep_research";

/// Gap-check passes before the flow writes with whatever it has.
pub const MAX_GAP_CHECKS: u32 = 2;

pub const SIGNAL_APPROVED: &str = "approved";
pub const SIGNAL_NEEDS_REVISION: &str = "needs_revision";

/// Shared state of one research run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeepResearch {
    pub question: String,
    pub sub_questions: Vec<String>,
    pub findings: Vec<Value>,
    pub gaps: Vec<String>,
    pub gap_checks: u32,
    pub article_draft: String,
    pub critic_feedback: String,
    pub final_article: String,
    pub banner_prompt: String,
    pub published: Option<String>,
}

impl DeepResearch {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Self::default()
        }
    }

    /// Sub-questions as numbered lines, the way the gap checker and writer
    /// expect them.
    fn numbered_sub_questions(&self) -> String {
        self.sub_questions
            .iter()
            .enumerate()
            .map(|(i, q)| format!("Sub-Question {}: {q}", i + 1))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Task specs the flow delegates to, resolved once from the catalog.
#[derive(Debug, Clone)]
pub struct ResearchTasks {
    pub planner: TaskSpec,
    pub researcher: TaskSpec,
    pub gap_checker: TaskSpec,
    pub writer: TaskSpec,
    pub critic: TaskSpec,
    pub banner: TaskSpec,
}

impl ResearchTasks {
    pub fn from_catalog(catalog: &TaskCatalog) -> Result<Self, CatalogError> {
        Ok(Self {
            planner: catalog.spec("planner")?.clone(),
            researcher: catalog.spec("researcher")?.clone(),
            gap_checker: catalog.spec("gap_checker")?.clone(),
            writer: catalog.spec("writer")?.clone(),
            critic: catalog.spec("critic")?.clone(),
            banner: catalog.spec("banner")?.clone(),
        })
    }
}

type Ctx = StepContext<DeepResearch>;

fn inputs<const N: usize>(pairs: [(&str, Value); N]) -> Map<String, Value> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// String items of `value[key]`; anything that is not a string is skipped.
pub fn string_list(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Findings of one researcher call, in the order returned.
fn findings_of(value: &Value) -> Vec<Value> {
    value
        .get("findings")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// One researcher call per element of `elements`.
fn research_group(
    tasks: &Arc<ResearchTasks>,
    elements: fn(&DeepResearch) -> &[String],
) -> ParallelGroup<DeepResearch> {
    let tasks = Arc::clone(tasks);
    ParallelGroup::new(
        move |s: &DeepResearch| elements(s).iter().map(|q| json!(q)).collect(),
        move |ctx: ElementContext<DeepResearch>| {
            let tasks = Arc::clone(&tasks);
            async move {
                let output = ctx
                    .execute(
                        &tasks.researcher,
                        inputs([
                            ("sub_question", ctx.element().clone()),
                            ("question", json!(ctx.state().question)),
                        ]),
                    )
                    .await?;
                Ok::<_, FlowError>(output.result)
            }
        },
    )
    .merge(|s, results| {
        for result in &results {
            s.findings.extend(findings_of(result));
        }
    })
}

/// Build the deep-research graph.
pub fn deep_research_graph(
    tasks: ResearchTasks,
) -> Result<FlowGraph<DeepResearch>, GraphConfigurationError> {
    let tasks = Arc::new(tasks);

    let gap_loop = LoopController::new(MAX_GAP_CHECKS, |s: &DeepResearch| s.gaps.is_empty())
        .task("gap_check", {
            let tasks = Arc::clone(&tasks);
            move |ctx: Ctx| {
                let tasks = Arc::clone(&tasks);
                async move {
                    let output = ctx
                        .execute(
                            &tasks.gap_checker,
                            inputs([(
                                "sub_questions",
                                json!(ctx.state().numbered_sub_questions()),
                            )]),
                        )
                        .await?;
                    let gaps = string_list(&output.result, "gaps");
                    tracing::info!(gaps = gaps.len(), "gap check finished");
                    Ok::<_, FlowError>(Update::with(move |s: &mut DeepResearch| {
                        s.gaps = gaps;
                        s.gap_checks += 1;
                    }))
                }
            }
        })
        .parallel("fill_gaps", research_group(&tasks, |s| s.gaps.as_slice()))
        .check_after("gap_check");

    FlowGraph::builder(GRAPH_NAME)
        .input_guard(|s: &DeepResearch| s.question.clone())
        .step(Step::task("initialize", Trigger::Start, {
            let tasks = Arc::clone(&tasks);
            move |ctx: Ctx| {
                let tasks = Arc::clone(&tasks);
                async move {
                    let output = ctx
                        .execute(
                            &tasks.planner,
                            inputs([("question", json!(ctx.state().question))]),
                        )
                        .await?;
                    let sub_questions = string_list(&output.result, "sub_questions");
                    tracing::info!(sub_questions = sub_questions.len(), "plan ready");
                    Ok::<_, FlowError>(Update::with(move |s: &mut DeepResearch| {
                        s.sub_questions = sub_questions
                    }))
                }
            }
        }))
        .step(Step::parallel(
            "research",
            "initialize",
            research_group(&tasks, |s| s.sub_questions.as_slice()),
        ))
        .step(Step::looped("check_gaps", "research", gap_loop))
        .step(Step::task("write_article", "check_gaps", {
            let tasks = Arc::clone(&tasks);
            move |ctx: Ctx| {
                let tasks = Arc::clone(&tasks);
                async move {
                    let output = ctx.execute(&tasks.writer, writer_inputs(ctx.state())).await?;
                    let draft = output.text().unwrap_or_default().to_string();
                    Ok::<_, FlowError>(Update::with(move |s: &mut DeepResearch| {
                        s.article_draft = draft
                    }))
                }
            }
        }))
        .step(Step::task("critique_article", "write_article", {
            let tasks = Arc::clone(&tasks);
            move |ctx: Ctx| {
                let tasks = Arc::clone(&tasks);
                async move {
                    let output = ctx
                        .execute(
                            &tasks.critic,
                            inputs([("article_draft", json!(ctx.state().article_draft))]),
                        )
                        .await?;
                    let feedback = output.text().unwrap_or_default().trim().to_string();
                    Ok::<_, FlowError>(Update::with(move |s: &mut DeepResearch| {
                        s.critic_feedback = feedback
                    }))
                }
            }
        }))
        .step(Step::router(
            "route_after_critique",
            "critique_article",
            [SIGNAL_APPROVED, SIGNAL_NEEDS_REVISION],
            |s: &DeepResearch| {
                if s.critic_feedback.is_empty() {
                    SIGNAL_APPROVED
                } else {
                    SIGNAL_NEEDS_REVISION
                }
            },
        ))
        .step(Step::task(
            "revise_article",
            Trigger::on_signal(SIGNAL_NEEDS_REVISION),
            {
                let tasks = Arc::clone(&tasks);
                move |ctx: Ctx| {
                    let tasks = Arc::clone(&tasks);
                    async move {
                        let output = ctx.execute(&tasks.writer, writer_inputs(ctx.state())).await?;
                        let revised = output.text().unwrap_or_default().to_string();
                        Ok::<_, FlowError>(Update::with(move |s: &mut DeepResearch| {
                            s.final_article = revised
                        }))
                    }
                }
            },
        ))
        .step(Step::task(
            "generate_banner",
            Trigger::any_of([
                Trigger::on_signal(SIGNAL_APPROVED),
                Trigger::after("revise_article"),
            ]),
            {
                let tasks = Arc::clone(&tasks);
                move |ctx: Ctx| {
                    let tasks = Arc::clone(&tasks);
                    async move {
                        let article = article_of(ctx.state()).to_string();
                        let output = ctx
                            .execute(&tasks.banner, inputs([("final_article", json!(article))]))
                            .await?;
                        let prompt = output.text().unwrap_or_default().trim().to_string();
                        Ok::<_, FlowError>(Update::with(move |s: &mut DeepResearch| {
                            if s.final_article.is_empty() {
                                s.final_article = s.article_draft.clone();
                            }
                            s.banner_prompt = prompt;
                        }))
                    }
                }
            },
        ))
        .step(
            Step::task("publish_article", "generate_banner", |ctx: Ctx| async move {
                let state = ctx.state();
                let document = compose_document(state);
                let summary = json!({
                    "question": state.question,
                    "sub_questions": state.sub_questions.len(),
                    "findings": state.findings.len(),
                    "gap_checks": state.gap_checks,
                    "revised": !state.critic_feedback.is_empty(),
                    "banner_prompt": state.banner_prompt,
                    "tokens": ctx.tokens_used(),
                });
                Ok::<_, FlowError>(Update::with(move |s: &mut DeepResearch| s.published = Some(document))
                    .with_output(summary))
            })
            .terminal(),
        )
        .build()
}

fn writer_inputs(state: &DeepResearch) -> Map<String, Value> {
    inputs([
        ("question", json!(state.question)),
        ("sub_questions", json!(state.numbered_sub_questions())),
        ("critic_feedback", json!(state.critic_feedback)),
        ("findings", Value::Array(state.findings.clone())),
    ])
}

/// The article to publish: the revision when there is one, else the draft.
fn article_of(state: &DeepResearch) -> &str {
    if state.final_article.is_empty() {
        &state.article_draft
    } else {
        &state.final_article
    }
}

/// Markdown document with the banner prompt as a front-matter field and the
/// cited sources appended.
fn compose_document(state: &DeepResearch) -> String {
    let mut doc = String::new();
    doc.push_str("---\n");
    doc.push_str(&format!("question: {}\n", state.question));
    doc.push_str(&format!("banner: {}\n", state.banner_prompt));
    doc.push_str("---\n\n");
    doc.push_str(article_of(state).trim_end());
    doc.push('\n');

    let sources: Vec<&str> = state
        .findings
        .iter()
        .filter_map(|f| f.get("url").and_then(Value::as_str))
        .collect();
    if !sources.is_empty() {
        doc.push_str("\n## Sources\n\n");
        for url in sources {
            doc.push_str(&format!("- {url}\n"));
        }
    }
    doc
}
