//! Event classifier: decodes one raw host payload into a typed [`HookEvent`].
//!
//! Classification is pure and total. Every payload maps to exactly one
//! variant; anything the reconstructor cannot act on becomes
//! [`HookEvent::Unrecognized`] with a reason string.

use chrono::{DateTime, Utc};
use serde_json::Value;

use hooktrace_types::event::{HookEvent, InboundEvent, MessageInfo, MessagePart, PartKind, Role};

use super::payload::{
    f64_at, first_text, raw_string_at, text_at, timestamp_at, value_at,
};

/// Event name used when the payload carries none.
pub const UNKNOWN_EVENT: &str = "unknown";

const SESSION_ID_PATHS: &[&[&str]] = &[
    &["properties", "sessionID"],
    &["properties", "sessionId"],
    &["properties", "info", "sessionID"],
    &["properties", "info", "sessionId"],
];

const PART_SESSION_ID_PATHS: &[&[&str]] = &[&["properties", "part", "sessionID"]];

const PAYLOAD_SESSION_ID_PATHS: &[&[&str]] = &[&["session_id"], &["sessionId"]];

/// Decode a whole payload as received on stdin.
///
/// `received_at` is used as the capture time when the payload carries no
/// usable timestamp.
pub fn decode(payload: &Value, received_at: DateTime<Utc>) -> InboundEvent {
    let event = event_object(payload);
    let name = event_name(payload, event);
    let captured_at = timestamp_at(payload, &["captured_at"])
        .or_else(|| timestamp_at(event, &["timestamp"]))
        .unwrap_or(received_at);

    InboundEvent {
        event: classify(&name, event, payload),
        captured_at,
        raw: event.clone(),
    }
}

/// `payload.event` when it is an object, otherwise the payload itself.
pub fn event_object(payload: &Value) -> &Value {
    match payload.get("event") {
        Some(event @ Value::Object(_)) => event,
        _ => payload,
    }
}

/// Normalised event name: first of `event.type`, `event.event`,
/// `event.name`, `payload.type`, trimmed and lower-cased.
pub fn event_name(payload: &Value, event: &Value) -> String {
    first_text(event, &[&["type"], &["event"], &["name"]])
        .or_else(|| text_at(payload, &["type"]))
        .map(|name| name.to_ascii_lowercase())
        .unwrap_or_else(|| UNKNOWN_EVENT.to_string())
}

/// Classify an event by name.
pub fn classify(name: &str, event: &Value, payload: &Value) -> HookEvent {
    let lifecycle = name.starts_with("session.");
    let Some(session_id) = session_id(event, payload, lifecycle) else {
        return unrecognized(name, "missing session id");
    };

    match name {
        "session.created" => HookEvent::SessionCreated { session_id },
        "session.idle" => HookEvent::SessionIdle { session_id },
        "session.error" => HookEvent::SessionError {
            session_id,
            error: value_at(event, &["properties", "error"]),
        },
        "session.compacted" => HookEvent::SessionCompacted { session_id },
        "message.updated" => match message_info(event) {
            Ok(info) => HookEvent::MessageUpdated { session_id, info },
            Err(reason) => unrecognized(name, reason),
        },
        "message.part.updated" => match message_part(event) {
            Ok(part) => HookEvent::MessagePartUpdated { session_id, part },
            Err(reason) => unrecognized(name, reason),
        },
        "message.removed" | "message.part.removed" => {
            unrecognized(name, "removal events are not tracked")
        }
        _ => unrecognized(name, "unsupported event"),
    }
}

fn unrecognized(name: &str, reason: &str) -> HookEvent {
    HookEvent::Unrecognized {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

fn session_id(event: &Value, payload: &Value, lifecycle: bool) -> Option<String> {
    first_text(event, SESSION_ID_PATHS)
        .or_else(|| {
            // On session.* events `info` is the session itself.
            lifecycle
                .then(|| text_at(event, &["properties", "info", "id"]))
                .flatten()
        })
        .or_else(|| first_text(event, PART_SESSION_ID_PATHS))
        .or_else(|| first_text(payload, PAYLOAD_SESSION_ID_PATHS))
}

fn message_info(event: &Value) -> Result<MessageInfo, &'static str> {
    let Some(info) = event.get("properties").and_then(|p| p.get("info")) else {
        return Err("message.updated without info");
    };
    let id = text_at(info, &["id"]).ok_or("message.updated without message id")?;

    Ok(MessageInfo {
        id,
        role: text_at(info, &["role"]).and_then(|role| Role::parse(&role)),
        parent_id: text_at(info, &["parentID"]),
        model_id: text_at(info, &["modelID"]),
        provider_id: text_at(info, &["providerID"]),
        agent: text_at(info, &["agent"]),
        mode: text_at(info, &["mode"]),
        cost: f64_at(info, &["cost"]),
        tokens: value_at(info, &["tokens"]).filter(Value::is_object),
        created_at: timestamp_at(info, &["time", "created"]),
        completed_at: timestamp_at(info, &["time", "completed"]),
    })
}

fn message_part(event: &Value) -> Result<MessagePart, &'static str> {
    let Some(part) = event.get("properties").and_then(|p| p.get("part")) else {
        return Err("message.part.updated without part");
    };
    let id = text_at(part, &["id"]).ok_or("message.part.updated without part id")?;
    let message_id =
        text_at(part, &["messageID"]).ok_or("message.part.updated without message id")?;
    let kind = text_at(part, &["type"])
        .map(|kind| PartKind::from(kind.to_ascii_lowercase()))
        .unwrap_or_else(|| PartKind::Other(UNKNOWN_EVENT.to_string()));

    Ok(MessagePart {
        id,
        message_id,
        kind,
        text: raw_string_at(part, &["text"]),
        tool: text_at(part, &["tool"]),
        state: value_at(part, &["state"]),
        metadata: value_at(part, &["metadata"]),
        started_at: timestamp_at(part, &["time", "start"]),
        ended_at: timestamp_at(part, &["time", "end"]),
    })
}
