//! `stepgraph` entry point.
//!
//! Parses CLI arguments, installs tracing, then dispatches to the command
//! handler.

mod cli;
mod fixtures;
mod research;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need tracing
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "stepgraph", &mut std::io::stdout());
        return Ok(());
    }

    stepgraph_observe::tracing_setup::init_tracing_with(cli.log_filter(), cli.otel)
        .map_err(|e| anyhow::anyhow!("Failed to initialise tracing: {e}"))?;

    let result = match cli.command {
        Commands::Run(args) => cli::run::handle_run(args, cli.json, cli.quiet).await,
        Commands::Validate(args) => cli::validate::handle_validate(args, cli.json).await,
        Commands::Completions { .. } => Ok(()),
    };

    stepgraph_observe::tracing_setup::shutdown_tracing();
    result
}
