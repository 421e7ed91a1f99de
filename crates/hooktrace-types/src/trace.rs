//! Backend-neutral trace records.
//!
//! `hooktrace-core` builds these from finalized turns and lifecycle
//! milestones; the emitter in `hooktrace-infra` maps them onto the
//! backend's wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fixed reconstruction marker tag carried by every trace.
pub const RECONSTRUCTION_TAG: &str = "hook-only";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    Turn,
    Lifecycle,
}

impl TraceKind {
    pub fn tag(&self) -> &'static str {
        match self {
            TraceKind::Turn => "turn",
            TraceKind::Lifecycle => "lifecycle",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationKind {
    Generation,
    Span,
}

/// Token usage attached to a generation observation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub total: u64,
    pub reasoning: u64,
    pub cache_read: u64,
}

/// A child observation of a trace (the assistant generation, a reasoning
/// block, or a tool call).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Deterministic id so re-emission overwrites instead of duplicating.
    pub id: String,
    pub kind: ObservationKind,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub model: Option<String>,
    pub usage: Option<TokenUsage>,
    pub metadata: Value,
    /// `ERROR` for failed tool calls, otherwise unset.
    pub level: Option<String>,
}

/// A named trace ready for the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Deterministic id: the turn id for turns, a digest of
    /// session/event/time for lifecycle milestones.
    pub trace_id: String,
    pub name: String,
    pub kind: TraceKind,
    pub session_id: String,
    pub user_id: String,
    pub tags: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub input: Value,
    pub output: Option<Value>,
    pub metadata: Value,
    pub observations: Vec<Observation>,
}
