//! Removal of stale session state.

use anyhow::Result;
use chrono::{Duration, Utc};
use console::style;

use crate::state::AppState;

pub async fn prune(state: &AppState, max_age_hours: u32, force: bool, json: bool) -> Result<()> {
    let cutoff = Utc::now() - Duration::hours(i64::from(max_age_hours));
    let report = state.offline_service().prune(cutoff, force).await?;

    if json {
        let out = serde_json::json!({
            "cutoff": cutoff.to_rfc3339(),
            "removed": report.removed,
            "kept_unemitted": report.kept_unemitted,
            "kept_locked": report.kept_locked,
            "kept_recent": report.kept_recent,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Removed {} session state file(s) older than {}h",
        style("✓").green(),
        style(report.removed.len()).bold(),
        max_age_hours
    );
    if !report.kept_unemitted.is_empty() {
        println!(
            "  {} Kept {} with unsent turns (use --force to remove):",
            style("!").yellow(),
            report.kept_unemitted.len()
        );
        for key in &report.kept_unemitted {
            println!("      {}", style(key).dim());
        }
    }
    if !report.kept_locked.is_empty() {
        println!(
            "  {} Kept {} in use by a running hook",
            style("!").yellow(),
            report.kept_locked.len()
        );
    }
    println!("  {} recent session(s) untouched", report.kept_recent);
    println!();
    Ok(())
}
