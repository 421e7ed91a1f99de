//! Event builders shared by reconstruction and flush tests.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;

use hooktrace_types::event::{
    HookEvent, InboundEvent, MessageInfo, MessagePart, PartKind, Role,
};
use hooktrace_types::session::Session;

use super::machine::{StepOutcome, TurnReconstructor};

pub const SESSION: &str = "ses_1";

/// Fixed base time plus `secs` seconds.
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap() + Duration::seconds(secs)
}

fn inbound(event: HookEvent, secs: i64) -> InboundEvent {
    InboundEvent {
        event,
        captured_at: at(secs),
        raw: Value::Null,
    }
}

pub fn message(id: &str, role: &str, secs: i64) -> InboundEvent {
    inbound(
        HookEvent::MessageUpdated {
            session_id: SESSION.to_string(),
            info: MessageInfo {
                id: id.to_string(),
                role: Role::parse(role),
                parent_id: None,
                model_id: None,
                provider_id: None,
                agent: None,
                mode: None,
                cost: None,
                tokens: None,
                created_at: Some(at(secs)),
                completed_at: None,
            },
        },
        secs,
    )
}

/// Assistant `message.updated` that names the user message it answers.
pub fn reply(id: &str, parent_id: &str, secs: i64) -> InboundEvent {
    let mut event = message(id, "assistant", secs);
    if let HookEvent::MessageUpdated { info, .. } = &mut event.event {
        info.parent_id = Some(parent_id.to_string());
    }
    event
}

pub fn part(
    message_id: &str,
    part_id: &str,
    kind: PartKind,
    text: Option<&str>,
    secs: i64,
) -> InboundEvent {
    inbound(
        HookEvent::MessagePartUpdated {
            session_id: SESSION.to_string(),
            part: MessagePart {
                id: part_id.to_string(),
                message_id: message_id.to_string(),
                kind,
                text: text.map(str::to_string),
                tool: None,
                state: None,
                metadata: None,
                started_at: None,
                ended_at: None,
            },
        },
        secs,
    )
}

/// `message.updated` announcing a user message, then its text part.
pub fn user_text(message_id: &str, part_id: &str, text: &str, secs: i64) -> Vec<InboundEvent> {
    vec![
        message(message_id, "user", secs),
        part(message_id, part_id, PartKind::Text, Some(text), secs),
    ]
}

/// `message.updated` announcing an assistant message, then a text delta.
pub fn assistant_text(message_id: &str, part_id: &str, text: &str, secs: i64) -> Vec<InboundEvent> {
    vec![
        message(message_id, "assistant", secs),
        part(message_id, part_id, PartKind::Text, Some(text), secs),
    ]
}

pub fn lifecycle(name: &str, secs: i64) -> InboundEvent {
    let session_id = SESSION.to_string();
    let event = match name {
        "session.created" => HookEvent::SessionCreated { session_id },
        "session.idle" => HookEvent::SessionIdle { session_id },
        "session.error" => HookEvent::SessionError {
            session_id,
            error: None,
        },
        "session.compacted" => HookEvent::SessionCompacted { session_id },
        other => panic!("not a lifecycle event: {other}"),
    };
    inbound(event, secs)
}

/// Apply events in order, merging finalized ids; disposition and lifecycle
/// come from the last event.
pub fn feed(r: &TurnReconstructor, session: &mut Session, events: Vec<InboundEvent>) -> StepOutcome {
    let mut finalized = Vec::new();
    let mut last = None;
    for event in &events {
        let outcome = r.apply(session, event);
        finalized.extend(outcome.finalized.iter().cloned());
        last = Some(outcome);
    }
    let mut outcome = last.expect("feed needs at least one event");
    outcome.finalized = finalized;
    outcome
}
