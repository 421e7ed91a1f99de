//! Inbound hook event types.
//!
//! The host forwards loosely-typed JSON; the classifier in `hooktrace-core`
//! decodes it into [`HookEvent`], a closed set of typed variants, before any
//! reconstruction logic runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use std::fmt;

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Parse a host role string. Roles other than user/assistant (system,
    /// tool) are not part of a turn and yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Session lifecycle milestones that produce their own trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleKind {
    Created,
    Idle,
    Error,
    Compacted,
}

impl LifecycleKind {
    /// Host event name for this milestone (e.g. `session.idle`).
    pub fn event_name(&self) -> &'static str {
        match self {
            LifecycleKind::Created => "session.created",
            LifecycleKind::Idle => "session.idle",
            LifecycleKind::Error => "session.error",
            LifecycleKind::Compacted => "session.compacted",
        }
    }
}

impl fmt::Display for LifecycleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

/// Type of a message part as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PartKind {
    Text,
    Reasoning,
    Tool,
    StepStart,
    StepFinish,
    Patch,
    Agent,
    Retry,
    Compaction,
    File,
    Other(String),
}

impl PartKind {
    /// Part types that only an assistant message can carry. Used to infer
    /// the role of a part whose `message.updated` has not arrived yet.
    pub fn is_assistant_only(&self) -> bool {
        matches!(
            self,
            PartKind::Reasoning
                | PartKind::Tool
                | PartKind::StepStart
                | PartKind::StepFinish
                | PartKind::Patch
                | PartKind::Agent
                | PartKind::Retry
                | PartKind::Compaction
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            PartKind::Text => "text",
            PartKind::Reasoning => "reasoning",
            PartKind::Tool => "tool",
            PartKind::StepStart => "step-start",
            PartKind::StepFinish => "step-finish",
            PartKind::Patch => "patch",
            PartKind::Agent => "agent",
            PartKind::Retry => "retry",
            PartKind::Compaction => "compaction",
            PartKind::File => "file",
            PartKind::Other(other) => other,
        }
    }
}

impl From<String> for PartKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "text" => PartKind::Text,
            "reasoning" => PartKind::Reasoning,
            "tool" => PartKind::Tool,
            "step-start" => PartKind::StepStart,
            "step-finish" => PartKind::StepFinish,
            "patch" => PartKind::Patch,
            "agent" => PartKind::Agent,
            "retry" => PartKind::Retry,
            "compaction" => PartKind::Compaction,
            "file" => PartKind::File,
            _ => PartKind::Other(value),
        }
    }
}

impl From<PartKind> for String {
    fn from(value: PartKind) -> Self {
        value.as_str().to_string()
    }
}

/// Metadata of one message, decoded from `message.updated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageInfo {
    pub id: String,
    pub role: Option<Role>,
    pub parent_id: Option<String>,
    pub model_id: Option<String>,
    pub provider_id: Option<String>,
    pub agent: Option<String>,
    pub mode: Option<String>,
    pub cost: Option<f64>,
    /// Token usage object as reported by the host (input/output/reasoning/cache).
    pub tokens: Option<Value>,
    pub created_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One content part of a message, decoded from `message.part.updated`.
///
/// Parts stream: the host re-sends the full part snapshot on every delta, so
/// a later snapshot for the same `id` supersedes the earlier one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePart {
    pub id: String,
    pub message_id: String,
    pub kind: PartKind,
    pub text: Option<String>,
    pub tool: Option<String>,
    /// Tool execution state (`status`, `input`, `output`, `error`, `metadata`).
    pub state: Option<Value>,
    pub metadata: Option<Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl MessagePart {
    /// Tool status (`pending`, `running`, `completed`, `error`) if this is a tool part.
    pub fn tool_status(&self) -> Option<&str> {
        self.state.as_ref()?.get("status")?.as_str()
    }

    /// Non-empty text content, if any.
    pub fn non_empty_text(&self) -> Option<&str> {
        self.text.as_deref().filter(|text| !text.is_empty())
    }
}

/// A classified hook event.
///
/// Produced by the classifier; the reconstructor matches on it exhaustively.
#[derive(Debug, Clone, PartialEq)]
pub enum HookEvent {
    SessionCreated { session_id: String },
    SessionIdle { session_id: String },
    SessionError { session_id: String, error: Option<Value> },
    SessionCompacted { session_id: String },
    MessageUpdated { session_id: String, info: MessageInfo },
    MessagePartUpdated { session_id: String, part: MessagePart },
    /// Anything else: unknown names and recognised names with unusable payloads.
    Unrecognized { name: String, reason: String },
}

impl HookEvent {
    /// Session the event belongs to. `None` for unrecognised events.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            HookEvent::SessionCreated { session_id }
            | HookEvent::SessionIdle { session_id }
            | HookEvent::SessionError { session_id, .. }
            | HookEvent::SessionCompacted { session_id }
            | HookEvent::MessageUpdated { session_id, .. }
            | HookEvent::MessagePartUpdated { session_id, .. } => Some(session_id),
            HookEvent::Unrecognized { .. } => None,
        }
    }

    /// Host event name.
    pub fn name(&self) -> &str {
        match self {
            HookEvent::SessionCreated { .. } => LifecycleKind::Created.event_name(),
            HookEvent::SessionIdle { .. } => LifecycleKind::Idle.event_name(),
            HookEvent::SessionError { .. } => LifecycleKind::Error.event_name(),
            HookEvent::SessionCompacted { .. } => LifecycleKind::Compacted.event_name(),
            HookEvent::MessageUpdated { .. } => "message.updated",
            HookEvent::MessagePartUpdated { .. } => "message.part.updated",
            HookEvent::Unrecognized { name, .. } => name,
        }
    }

    /// Lifecycle milestone carried by this event, if any.
    pub fn lifecycle(&self) -> Option<LifecycleKind> {
        match self {
            HookEvent::SessionCreated { .. } => Some(LifecycleKind::Created),
            HookEvent::SessionIdle { .. } => Some(LifecycleKind::Idle),
            HookEvent::SessionError { .. } => Some(LifecycleKind::Error),
            HookEvent::SessionCompacted { .. } => Some(LifecycleKind::Compacted),
            _ => None,
        }
    }
}

/// A classified event together with its capture time and the raw host
/// event object (kept as the input of lifecycle traces).
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub event: HookEvent,
    pub captured_at: DateTime<Utc>,
    pub raw: Value,
}
