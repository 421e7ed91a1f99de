//! Per-session reconstruction state.
//!
//! A [`Session`] is loaded from the state store at the start of every hook
//! invocation, mutated by exactly one event, and written back. Everything in
//! it is bounded: event history per role, the finalized-turn index, pending
//! parts and the backfill queue all evict oldest-first once full.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use crate::event::{LifecycleKind, MessageInfo, MessagePart, Role};

/// Default number of raw message events kept per role per turn.
pub const DEFAULT_MAX_MESSAGE_EVENTS: usize = 30;

/// Number of finalized turns remembered for dedupe and stale-event checks.
pub const MAX_FINALIZED_TURNS: usize = 64;

/// Number of finalized-but-unsent turns kept for backfill.
pub const MAX_BACKFILL_TURNS: usize = 8;

/// Push onto a bounded deque, evicting from the front once `cap` is reached.
///
/// A `cap` of zero is treated as one so the newest entry is always retained.
pub fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, cap: usize) {
    let cap = cap.max(1);
    while queue.len() >= cap {
        queue.pop_front();
    }
    queue.push_back(item);
}

/// One raw content event as received, kept for the trace's event history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEventRecord {
    pub role: Role,
    /// Host event name (`message.updated` or `message.part.updated`).
    pub event: String,
    /// Snapshot of the message info or part carried by the event.
    pub snapshot: Value,
    pub received_at: DateTime<Utc>,
}

/// Bounded per-role history of raw message events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageEvents {
    pub user: VecDeque<MessageEventRecord>,
    pub assistant: VecDeque<MessageEventRecord>,
}

impl MessageEvents {
    /// Append a record to its role's ring, evicting the oldest past `cap`.
    pub fn push(&mut self, record: MessageEventRecord, cap: usize) {
        let ring = match record.role {
            Role::User => &mut self.user,
            Role::Assistant => &mut self.assistant,
        };
        push_bounded(ring, record, cap);
    }

    pub fn for_role(&self, role: Role) -> &VecDeque<MessageEventRecord> {
        match role {
            Role::User => &self.user,
            Role::Assistant => &self.assistant,
        }
    }
}

/// Phase of an open turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    AwaitingAssistant,
    AssistantStreaming,
}

/// One user prompt plus the assistant response it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub turn_id: String,
    pub started_at: DateTime<Utc>,
    pub phase: TurnPhase,
    pub user_message_ids: Vec<String>,
    pub assistant_message_ids: Vec<String>,
    pub user_info: Option<MessageInfo>,
    pub assistant_info: Option<MessageInfo>,
    pub user_parts: Vec<MessagePart>,
    pub assistant_parts: Vec<MessagePart>,
    pub message_events: MessageEvents,
    /// Set once the turn has been finalized.
    pub completed: bool,
    /// Whether the assistant message reported a completion time before
    /// the turn was finalized. Idle flushes may finalize without it.
    pub assistant_completed: bool,
}

impl Turn {
    pub fn open(turn_id: String, started_at: DateTime<Utc>, phase: TurnPhase) -> Self {
        Self {
            turn_id,
            started_at,
            phase,
            user_message_ids: Vec::new(),
            assistant_message_ids: Vec::new(),
            user_info: None,
            assistant_info: None,
            user_parts: Vec::new(),
            assistant_parts: Vec::new(),
            message_events: MessageEvents::default(),
            completed: false,
            assistant_completed: false,
        }
    }

    /// Record that `message_id` belongs to this turn under `role`.
    pub fn note_message(&mut self, role: Role, message_id: &str) {
        let ids = match role {
            Role::User => &mut self.user_message_ids,
            Role::Assistant => &mut self.assistant_message_ids,
        };
        if !ids.iter().any(|id| id == message_id) {
            ids.push(message_id.to_string());
        }
    }

    /// Whether this turn already covers the given message.
    pub fn covers_message(&self, message_id: &str) -> bool {
        self.user_message_ids.iter().any(|id| id == message_id)
            || self.assistant_message_ids.iter().any(|id| id == message_id)
    }

    /// Insert or replace a part. A snapshot for a known part id replaces the
    /// earlier one in place; a new part id appends, preserving arrival order.
    pub fn upsert_part(&mut self, role: Role, part: MessagePart) {
        let parts = match role {
            Role::User => &mut self.user_parts,
            Role::Assistant => &mut self.assistant_parts,
        };
        match parts.iter_mut().find(|existing| existing.id == part.id) {
            Some(existing) => *existing = part,
            None => parts.push(part),
        }
    }

    pub fn parts(&self, role: Role) -> &[MessagePart] {
        match role {
            Role::User => &self.user_parts,
            Role::Assistant => &self.assistant_parts,
        }
    }

    /// Every message id this turn covers, user messages first.
    pub fn message_ids(&self) -> Vec<String> {
        self.user_message_ids
            .iter()
            .chain(self.assistant_message_ids.iter())
            .cloned()
            .collect()
    }

    /// Whether there is anything worth emitting.
    pub fn has_content(&self) -> bool {
        !self.user_parts.is_empty() || !self.assistant_parts.is_empty()
    }
}

/// Why a turn was finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushReason {
    /// A new user message arrived after the assistant had responded.
    NextUserMessage,
    SessionIdle,
    SessionError,
    SessionCompacted,
    /// Operator-triggered flush from the CLI.
    Manual,
}

impl FlushReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushReason::NextUserMessage => "next-user-message",
            FlushReason::SessionIdle => "session.idle",
            FlushReason::SessionError => "session.error",
            FlushReason::SessionCompacted => "session.compacted",
            FlushReason::Manual => "manual",
        }
    }

    /// Flush reason matching a lifecycle milestone.
    pub fn from_lifecycle(kind: LifecycleKind) -> Option<Self> {
        match kind {
            LifecycleKind::Created => None,
            LifecycleKind::Idle => Some(FlushReason::SessionIdle),
            LifecycleKind::Error => Some(FlushReason::SessionError),
            LifecycleKind::Compacted => Some(FlushReason::SessionCompacted),
        }
    }
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Index entry for a turn that has left the backfill queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizedTurn {
    pub turn_id: String,
    /// Session last-seen marker at the moment the turn was finalized.
    pub marker: DateTime<Utc>,
    pub message_ids: Vec<String>,
}

/// A finalized turn waiting for a successful emission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedTurn {
    pub turn: Turn,
    pub reason: FlushReason,
    pub marker: DateTime<Utc>,
    pub attempts: u32,
}

/// Last lifecycle milestone seen for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleMark {
    pub kind: LifecycleKind,
    pub at: DateTime<Utc>,
}

/// Externally visible state of the turn state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    NoTurn,
    AwaitingAssistant,
    AssistantStreaming,
}

/// Reconstruction state for one host session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub host_id: String,
    pub created_at: DateTime<Utc>,
    pub current_turn: Option<Turn>,
    /// Roles of messages seen in the open turn.
    #[serde(default)]
    pub message_roles: BTreeMap<String, Role>,
    /// Text parts whose message role is not yet known.
    #[serde(default)]
    pub pending_parts: VecDeque<MessagePart>,
    #[serde(default)]
    pub finalized: VecDeque<FinalizedTurn>,
    #[serde(default)]
    pub backfill: VecDeque<QueuedTurn>,
    /// Monotonically non-decreasing max of applied event timestamps.
    pub last_seen: Option<DateTime<Utc>>,
    pub last_lifecycle: Option<LifecycleMark>,
}

impl Session {
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        host_id: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            host_id: host_id.into(),
            created_at,
            current_turn: None,
            message_roles: BTreeMap::new(),
            pending_parts: VecDeque::new(),
            finalized: VecDeque::new(),
            backfill: VecDeque::new(),
            last_seen: None,
            last_lifecycle: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        match self.current_turn.as_ref().map(|turn| turn.phase) {
            None => SessionPhase::NoTurn,
            Some(TurnPhase::AwaitingAssistant) => SessionPhase::AwaitingAssistant,
            Some(TurnPhase::AssistantStreaming) => SessionPhase::AssistantStreaming,
        }
    }

    /// Advance the last-seen marker. Never moves backwards.
    pub fn observe(&mut self, at: DateTime<Utc>) {
        if self.last_seen.is_none_or(|seen| at > seen) {
            self.last_seen = Some(at);
        }
    }

    /// Whether the turn id has been finalized, emitted or still queued.
    pub fn is_finalized(&self, turn_id: &str) -> bool {
        self.finalized.iter().any(|entry| entry.turn_id == turn_id)
            || self.backfill.iter().any(|queued| queued.turn.turn_id == turn_id)
    }

    /// Finalization marker of the finalized or queued turn that covers
    /// `message_id`, if any.
    pub fn finalized_marker_for(&self, message_id: &str) -> Option<DateTime<Utc>> {
        self.finalized
            .iter()
            .find(|entry| entry.message_ids.iter().any(|id| id == message_id))
            .map(|entry| entry.marker)
            .or_else(|| {
                self.backfill
                    .iter()
                    .find(|queued| queued.turn.covers_message(message_id))
                    .map(|queued| queued.marker)
            })
    }

    /// Add a turn to the finalized index: emitted or given up after repeated
    /// failures. Later events for its messages are ignored.
    pub fn record_finalized(&mut self, turn: &Turn, marker: DateTime<Utc>) {
        let entry = FinalizedTurn {
            turn_id: turn.turn_id.clone(),
            marker,
            message_ids: turn.message_ids(),
        };
        push_bounded(&mut self.finalized, entry, MAX_FINALIZED_TURNS);
    }

    /// Whether the session still holds work that has not been emitted.
    pub fn has_unemitted_work(&self) -> bool {
        self.current_turn.as_ref().is_some_and(Turn::has_content) || !self.backfill.is_empty()
    }
}
