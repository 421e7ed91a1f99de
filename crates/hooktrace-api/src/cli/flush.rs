//! Manual backfill for one session.

use anyhow::{Context, Result};
use console::style;

use hooktrace_core::{IngestOutcome, IngestReport};

use crate::state::AppState;

/// Finalize the open turn of `session_id` and send its queued turns.
pub async fn flush_session(state: &AppState, session_id: &str, json: bool) -> Result<()> {
    let service = state
        .live_service()
        .context("flush needs LANGFUSE_PUBLIC_KEY and LANGFUSE_SECRET_KEY")?;
    let report = service.flush_session(session_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report_json(&report))?);
        return Ok(());
    }

    match report.outcome {
        IngestOutcome::Disabled => {
            println!("  {} TRACE_TO_LANGFUSE is not 'true', nothing sent", style("!").yellow());
        }
        IngestOutcome::NoState => {
            println!("  No stored state for session '{}'", style(session_id).cyan());
        }
        IngestOutcome::LockBusy => {
            println!("  {} Session '{}' is busy, try again", style("!").yellow(), session_id);
        }
        _ => {
            println!(
                "  {} Flushed '{}': {} sent, {} still queued, {} given up",
                style("✓").green(),
                style(session_id).cyan(),
                report.emitted_turns.len(),
                report.failed_turns.len(),
                report.dropped_turns.len()
            );
        }
    }
    Ok(())
}

fn report_json(report: &IngestReport) -> serde_json::Value {
    let outcome = match &report.outcome {
        IngestOutcome::Disabled => "disabled",
        IngestOutcome::NoState => "no-state",
        IngestOutcome::LockBusy => "lock-busy",
        IngestOutcome::Processed(_) => "flushed",
        IngestOutcome::Invalid { .. } | IngestOutcome::Unrecognized { .. } => "ignored",
    };
    serde_json::json!({
        "session_id": report.session_id,
        "outcome": outcome,
        "emitted": report.emitted_turns,
        "failed": report.failed_turns,
        "dropped": report.dropped_turns,
    })
}
