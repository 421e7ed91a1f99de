//! Show what is stored for a session.

use anyhow::Result;
use console::style;

use hooktrace_types::envelope::StateEnvelope;
use hooktrace_types::session::SessionPhase;

use crate::state::AppState;

pub async fn inspect(state: &AppState, session_id: &str, json: bool) -> Result<()> {
    let store = state.store();
    let Some(envelope) = state.offline_service().inspect(session_id).await? else {
        if json {
            println!("null");
        } else {
            println!(
                "  No readable state for session '{}' at {}",
                style(session_id).cyan(),
                store.envelope_path(session_id).display()
            );
        }
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&envelope)?);
        return Ok(());
    }

    for line in summary_lines(&envelope) {
        println!("  {line}");
    }
    Ok(())
}

fn phase_label(phase: SessionPhase) -> &'static str {
    match phase {
        SessionPhase::NoTurn => "idle",
        SessionPhase::AwaitingAssistant => "awaiting assistant",
        SessionPhase::AssistantStreaming => "assistant streaming",
    }
}

fn summary_lines(envelope: &StateEnvelope) -> Vec<String> {
    let session = &envelope.session;
    let mut lines = vec![
        format!("Session:    {}", session.session_id),
        format!("User:       {}", session.user_id),
        format!("Host:       {}", session.host_id),
        format!("Created:    {}", session.created_at.to_rfc3339()),
        format!("Written:    {}", envelope.written_at.to_rfc3339()),
        format!("Phase:      {}", phase_label(session.phase())),
    ];
    if let Some(turn) = &session.current_turn {
        lines.push(format!(
            "Open turn:  {} ({} user / {} assistant messages)",
            turn.turn_id,
            turn.user_message_ids.len(),
            turn.assistant_message_ids.len()
        ));
    }
    if let Some(mark) = &session.last_lifecycle {
        lines.push(format!(
            "Lifecycle:  {} at {}",
            mark.kind.event_name(),
            mark.at.to_rfc3339()
        ));
    }
    lines.push(format!("Queued:     {}", session.backfill.len()));
    for queued in &session.backfill {
        lines.push(format!(
            "  - {} ({}, {} failed attempt(s))",
            queued.turn.turn_id, queued.reason, queued.attempts
        ));
    }
    lines.push(format!("Finalized:  {}", session.finalized.len()));
    if !session.pending_parts.is_empty() {
        lines.push(format!("Pending:    {} part(s)", session.pending_parts.len()));
    }
    lines
}
