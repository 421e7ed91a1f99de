//! Text bounding for trace payloads and stored parts.

use serde_json::Value;

use hooktrace_types::event::MessagePart;

/// Truncate to `limit` characters, appending a marker with the number of
/// characters dropped.
pub fn truncate(text: &str, limit: usize) -> String {
    let total = text.chars().count();
    if total <= limit {
        return text.to_string();
    }
    let kept: String = text.chars().take(limit).collect();
    format!("{kept}\n...[truncated {} chars]", total - limit)
}

/// Truncate a JSON value if it is a string; other values pass through.
pub fn truncate_value(value: &Value, limit: usize) -> Value {
    match value {
        Value::String(s) => Value::String(truncate(s, limit)),
        other => other.clone(),
    }
}

/// Bound the large free-text fields of a part (text, tool output, tool
/// error) before it is stored in session state.
pub fn clamp_part(mut part: MessagePart, limit: usize) -> MessagePart {
    if let Some(text) = part.text.as_mut() {
        if text.chars().count() > limit {
            *text = truncate(text, limit);
        }
    }
    if let Some(Value::Object(state)) = part.state.as_mut() {
        for key in ["output", "error"] {
            if let Some(value) = state.get_mut(key) {
                *value = truncate_value(value, limit);
            }
        }
    }
    part
}
