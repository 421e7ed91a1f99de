//! CLI command definitions for the `hooktrace` binary.
//!
//! Running `hooktrace` with no subcommand is the same as `hooktrace ingest`:
//! that is how the OpenCode plugin invokes it, once per event.

pub mod flush;
pub mod ingest;
pub mod inspect;
pub mod prune;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Reconstruct OpenCode turns from plugin events and send them to Langfuse.
#[derive(Parser)]
#[command(name = "hooktrace", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// State directory (overrides OPENCODE_LANGFUSE_STATE_DIR).
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Detailed output for maintenance commands (-v for info, -vv for debug).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Process one plugin event payload (the default). Always exits 0.
    Ingest {
        /// Read the payload from a file instead of stdin.
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Finalize a session's open turn and send everything still queued.
    Flush {
        /// Session id as reported by OpenCode.
        session_id: String,
    },

    /// Remove stale session state.
    Prune {
        /// Remove state last written more than this many hours ago.
        #[arg(long, default_value_t = 168)]
        max_age_hours: u32,

        /// Also remove state still holding unsent turns.
        #[arg(long)]
        force: bool,
    },

    /// Print the stored state of a session.
    Inspect {
        /// Session id as reported by OpenCode.
        session_id: String,
    },
}

impl Default for Commands {
    fn default() -> Self {
        Commands::Ingest { file: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_means_ingest() {
        let cli = Cli::try_parse_from(["hooktrace"]).unwrap();
        assert!(matches!(
            cli.command.unwrap_or_default(),
            Commands::Ingest { file: None }
        ));
    }

    #[test]
    fn test_prune_defaults() {
        let cli = Cli::try_parse_from(["hooktrace", "prune"]).unwrap();
        match cli.command {
            Some(Commands::Prune { max_age_hours, force }) => {
                assert_eq!(max_age_hours, 168);
                assert!(!force);
            }
            _ => panic!("expected prune"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "hooktrace",
            "inspect",
            "ses_1",
            "--json",
            "--state-dir",
            "/tmp/state",
            "-vv",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.state_dir, Some(PathBuf::from("/tmp/state")));
        assert!(matches!(cli.command, Some(Commands::Inspect { ref session_id }) if session_id == "ses_1"));
    }

    #[test]
    fn test_ingest_from_file() {
        let cli = Cli::try_parse_from(["hooktrace", "ingest", "--file", "event.json"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Ingest { file: Some(ref f) }) if f == &PathBuf::from("event.json")
        ));
    }
}
