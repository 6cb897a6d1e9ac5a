//! CLI command definitions for the `stepgraph` binary.

pub mod run;
pub mod validate;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use stepgraph_core::task::TaskCatalog;

use crate::fixtures::{BUNDLED_AGENTS, BUNDLED_TASKS};

/// Run and inspect step-graph workflows.
#[derive(Parser)]
#[command(name = "stepgraph", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for engine debug logs, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export spans through the OpenTelemetry stdout exporter.
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Log filter implied by the verbosity flags. `None` defers to
    /// `RUST_LOG`.
    pub fn log_filter(&self) -> Option<&'static str> {
        match self.verbose {
            0 if self.quiet => Some("error"),
            0 => None,
            1 => Some("info,stepgraph_core=debug"),
            _ => Some("trace"),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the bundled deep-research flow against fixtures.
    Run(run::RunArgs),

    /// Build the research graph and print its structure.
    Validate(validate::ValidateArgs),

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

/// Where agent and task definitions come from.
#[derive(Args, Debug, Default)]
pub struct CatalogArgs {
    /// Agents YAML (`<name>_agent` keys). Defaults to the bundled catalog.
    #[arg(long, requires = "tasks")]
    pub agents: Option<PathBuf>,

    /// Tasks YAML (`<name>_task` keys).
    #[arg(long, requires = "agents")]
    pub tasks: Option<PathBuf>,
}

impl CatalogArgs {
    pub async fn load(&self) -> Result<TaskCatalog> {
        match (&self.agents, &self.tasks) {
            (Some(agents), Some(tasks)) => TaskCatalog::load(agents, tasks)
                .await
                .context("Failed to load task catalog"),
            _ => TaskCatalog::from_yaml(BUNDLED_AGENTS, BUNDLED_TASKS)
                .context("bundled task catalog is malformed"),
        }
    }
}
