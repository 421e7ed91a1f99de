//! hooktrace entry point.
//!
//! Binary name: `hooktrace`
//!
//! The OpenCode plugin runs `hooktrace` once per event with the payload on
//! stdin. That path is fail-open: it always exits 0 and writes diagnostics
//! only to the log file. The other subcommands are maintenance tools for a
//! human at a terminal and report errors normally.

mod cli;
mod state;

use clap::Parser;

use hooktrace_observe::{LogTarget, init_tracing};

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let state = AppState::load(cli.state_dir.clone());

    let command = cli.command.unwrap_or_default();
    if let Commands::Ingest { file } = &command {
        cli::ingest::run(&state, file.as_deref()).await;
        return Ok(());
    }

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    // Maintenance output goes to the terminal; a subscriber failure is not
    // worth aborting the command for.
    let _ = init_tracing(filter, &LogTarget::Stderr, false);
    for warning in &state.warnings {
        tracing::warn!("{warning}");
    }

    match command {
        Commands::Flush { session_id } => {
            cli::flush::flush_session(&state, &session_id, cli.json).await?;
        }
        Commands::Prune {
            max_age_hours,
            force,
        } => {
            cli::prune::prune(&state, max_age_hours, force, cli.json).await?;
        }
        Commands::Inspect { session_id } => {
            cli::inspect::inspect(&state, &session_id, cli.json).await?;
        }
        Commands::Ingest { .. } => unreachable!("handled above"),
    }

    Ok(())
}
