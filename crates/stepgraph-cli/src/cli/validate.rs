//! `stepgraph validate`: build the research graph and show its structure.

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use stepgraph_core::flow::{GraphDescription, StepDescription};

use super::CatalogArgs;
use crate::research::{ResearchTasks, deep_research_graph};

#[derive(Args, Debug)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub catalog: CatalogArgs,
}

pub async fn handle_validate(args: ValidateArgs, json: bool) -> Result<()> {
    let catalog = args.catalog.load().await?;
    let description = {
        let _span = tracing::info_span!("flow.validate").entered();
        let tasks =
            ResearchTasks::from_catalog(&catalog).context("Catalog is missing a research task")?;
        let graph = deep_research_graph(tasks).context("Research graph failed validation")?;
        tracing::info!(steps = graph.len(), "graph is valid");
        graph.describe()
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&description)?);
    } else {
        print_description(&description);
    }
    Ok(())
}

fn print_description(description: &GraphDescription) {
    println!();
    println!(
        "  {} Graph '{}' is valid",
        style("*").green().bold(),
        style(&description.name).cyan()
    );
    println!("  Start: {}", description.start);
    println!("  Terminals: {}", description.terminals.join(", "));
    println!();

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Kind"),
            Cell::new("Trigger"),
            Cell::new("Detail"),
        ]);
    for step in &description.steps {
        let name = if step.terminal {
            Cell::new(format!("{} (terminal)", step.name)).fg(Color::Green)
        } else {
            Cell::new(&step.name)
        };
        table.add_row(vec![
            name,
            Cell::new(step.kind),
            Cell::new(&step.trigger),
            Cell::new(detail(step)),
        ]);
    }
    println!("{table}");
    println!();
}

/// Router signals or loop stages, whichever the step has.
fn detail(step: &StepDescription) -> String {
    if !step.signals.is_empty() {
        return format!("signals: {}", step.signals.join(" | "));
    }
    match step.max_iterations {
        Some(max) => format!("stages: {} (max {max})", step.stages.join(" -> ")),
        None => String::new(),
    }
}
