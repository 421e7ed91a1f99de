//! Turn reconstruction state machine.
//!
//! Folds one classified event into a [`Session`]. Pure with respect to IO:
//! finalized turns are moved onto the session's backfill queue and the
//! caller drains that queue through an emitter.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};

use hooktrace_types::config::ReconstructionSettings;
use hooktrace_types::event::{
    HookEvent, InboundEvent, LifecycleKind, MessageInfo, MessagePart, Role,
};
use hooktrace_types::session::{
    push_bounded, FlushReason, LifecycleMark, MessageEventRecord, Session, Turn, TurnPhase,
};

use crate::flush::finalize_open_turn;
use crate::trace::text::clamp_part;

use super::ids::turn_id;

/// What happened to one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Folded into session state.
    Applied,
    /// Text part of a message whose role is not yet known; held until it is.
    Parked,
    /// Targets a finalized turn and is older than its finalization marker.
    Stale { message_id: String },
    /// Targets a finalized turn but arrived at or after its marker.
    Late { message_id: String },
    /// Recognised but carries nothing a turn can use.
    Ignored { reason: String },
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Applied => "applied",
            Disposition::Parked => "parked",
            Disposition::Stale { .. } => "stale",
            Disposition::Late { .. } => "late",
            Disposition::Ignored { .. } => "ignored",
        }
    }
}

/// Result of applying one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub disposition: Disposition,
    /// Turn ids queued for emission by this step.
    pub finalized: Vec<String>,
    /// Lifecycle milestone that needs its own trace.
    pub lifecycle: Option<LifecycleKind>,
}

impl StepOutcome {
    fn applied(finalized: Vec<String>) -> Self {
        Self {
            disposition: Disposition::Applied,
            finalized,
            lifecycle: None,
        }
    }

    fn only(disposition: Disposition) -> Self {
        Self {
            disposition,
            finalized: Vec::new(),
            lifecycle: None,
        }
    }
}

/// The turn state machine.
#[derive(Debug, Clone)]
pub struct TurnReconstructor {
    settings: ReconstructionSettings,
}

impl TurnReconstructor {
    pub fn new(settings: ReconstructionSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ReconstructionSettings {
        &self.settings
    }

    /// Apply one event to the session.
    pub fn apply(&self, session: &mut Session, inbound: &InboundEvent) -> StepOutcome {
        let at = inbound.captured_at;
        match &inbound.event {
            HookEvent::SessionCreated { .. } => self.apply_lifecycle(session, LifecycleKind::Created, at),
            HookEvent::SessionIdle { .. } => self.apply_lifecycle(session, LifecycleKind::Idle, at),
            HookEvent::SessionError { .. } => self.apply_lifecycle(session, LifecycleKind::Error, at),
            HookEvent::SessionCompacted { .. } => {
                self.apply_lifecycle(session, LifecycleKind::Compacted, at)
            }
            HookEvent::MessageUpdated { info, .. } => self.apply_message(session, info, at),
            HookEvent::MessagePartUpdated { part, .. } => self.apply_part(session, part, at),
            HookEvent::Unrecognized { reason, .. } => StepOutcome::only(Disposition::Ignored {
                reason: reason.clone(),
            }),
        }
    }

    fn apply_lifecycle(
        &self,
        session: &mut Session,
        kind: LifecycleKind,
        at: DateTime<Utc>,
    ) -> StepOutcome {
        session.observe(at);

        let mut finalized = Vec::new();
        if let Some(reason) = FlushReason::from_lifecycle(kind) {
            finalized.extend(finalize_open_turn(session, reason));
        }

        if session.last_lifecycle.as_ref().is_none_or(|mark| at >= mark.at) {
            session.last_lifecycle = Some(LifecycleMark { kind, at });
        }

        StepOutcome {
            disposition: Disposition::Applied,
            finalized,
            lifecycle: Some(kind),
        }
    }

    fn apply_message(&self, session: &mut Session, info: &MessageInfo, at: DateTime<Utc>) -> StepOutcome {
        if let Some(outcome) = guard_finalized(session, &info.id, at) {
            return outcome;
        }
        let Some(role) = info.role else {
            return StepOutcome::only(Disposition::Ignored {
                reason: "message role is not user or assistant".to_string(),
            });
        };

        session.observe(at);
        let mut finalized = Vec::new();
        self.route(session, role, &info.id, at, &mut finalized);

        let snapshot = serde_json::to_value(info).unwrap_or(Value::Null);
        let cap = self.settings.max_message_events;
        if let Some(turn) = session.current_turn.as_mut() {
            match role {
                Role::User => turn.user_info = Some(info.clone()),
                Role::Assistant => {
                    if info.completed_at.is_some() {
                        turn.assistant_completed = true;
                    }
                    turn.assistant_info = Some(info.clone());
                }
            }
            turn.message_events.push(record(role, "message.updated", snapshot, at), cap);
        }

        self.merge_pending(session, &info.id, role, at);
        StepOutcome::applied(finalized)
    }

    fn apply_part(&self, session: &mut Session, part: &MessagePart, at: DateTime<Utc>) -> StepOutcome {
        if let Some(outcome) = guard_finalized(session, &part.message_id, at) {
            return outcome;
        }
        session.observe(at);

        let part = clamp_part(part.clone(), self.settings.max_chars);
        let role = session
            .message_roles
            .get(&part.message_id)
            .copied()
            .or_else(|| part.kind.is_assistant_only().then_some(Role::Assistant));

        let Some(role) = role else {
            debug!(
                message_id = %part.message_id,
                part_id = %part.id,
                "parking part until its message role is known"
            );
            self.park(session, part);
            return StepOutcome::only(Disposition::Parked);
        };

        let mut finalized = Vec::new();
        self.route(session, role, &part.message_id, at, &mut finalized);
        self.fold_part(session, role, part, at);
        StepOutcome::applied(finalized)
    }

    /// Make sure the open turn is the one `message_id` belongs to, opening or
    /// finalizing turns as the state machine requires.
    fn route(
        &self,
        session: &mut Session,
        role: Role,
        message_id: &str,
        at: DateTime<Utc>,
        finalized: &mut Vec<String>,
    ) {
        match role {
            Role::User => {
                let needs_new_turn = match session.current_turn.as_mut() {
                    None => true,
                    Some(turn) if turn.covers_message(message_id) => false,
                    Some(turn) if answers_user_message(turn, message_id) => {
                        let id = turn_id(&session.session_id, message_id);
                        info!(
                            session_id = %session.session_id,
                            orphan_id = %turn.turn_id,
                            turn_id = %id,
                            "user message arrived after its reply, adopting orphan turn"
                        );
                        turn.turn_id = id;
                        false
                    }
                    Some(turn) => turn.phase == TurnPhase::AssistantStreaming,
                };
                if needs_new_turn {
                    finalized.extend(finalize_open_turn(session, FlushReason::NextUserMessage));
                    let id = turn_id(&session.session_id, message_id);
                    info!(session_id = %session.session_id, turn_id = %id, "opening turn");
                    session.current_turn = Some(Turn::open(id, at, TurnPhase::AwaitingAssistant));
                }
            }
            Role::Assistant => {
                if session.current_turn.is_none() {
                    let id = turn_id(&session.session_id, message_id);
                    info!(
                        session_id = %session.session_id,
                        turn_id = %id,
                        "assistant event without a user turn, opening orphan turn"
                    );
                    session.current_turn = Some(Turn::open(id, at, TurnPhase::AssistantStreaming));
                }
            }
        }

        session.message_roles.insert(message_id.to_string(), role);
        if let Some(turn) = session.current_turn.as_mut() {
            turn.note_message(role, message_id);
            if role == Role::Assistant {
                turn.phase = TurnPhase::AssistantStreaming;
            }
        }
    }

    fn fold_part(&self, session: &mut Session, role: Role, part: MessagePart, at: DateTime<Utc>) {
        let cap = self.settings.max_message_events;
        if let Some(turn) = session.current_turn.as_mut() {
            let snapshot = serde_json::to_value(&part).unwrap_or(Value::Null);
            turn.message_events
                .push(record(role, "message.part.updated", snapshot, at), cap);
            turn.upsert_part(role, part);
        }
    }

    fn park(&self, session: &mut Session, part: MessagePart) {
        match session.pending_parts.iter_mut().find(|pending| pending.id == part.id) {
            Some(existing) => *existing = part,
            None => push_bounded(&mut session.pending_parts, part, self.settings.max_message_events),
        }
    }

    /// Fold parked parts of `message_id` into the open turn now that its role
    /// is known.
    fn merge_pending(&self, session: &mut Session, message_id: &str, role: Role, at: DateTime<Utc>) {
        let (ready, waiting): (Vec<_>, Vec<_>) = session
            .pending_parts
            .drain(..)
            .partition(|part| part.message_id == message_id);
        session.pending_parts = waiting.into();

        for part in ready {
            self.fold_part(session, role, part, at);
        }
    }
}

fn record(role: Role, event: &str, snapshot: Value, at: DateTime<Utc>) -> MessageEventRecord {
    MessageEventRecord {
        role,
        event: event.to_string(),
        snapshot,
        received_at: at,
    }
}

/// Whether an orphan turn is the reply to `message_id`: it has no user
/// message yet, and its assistant names `message_id` as parent or, with no
/// parent known, has produced nothing so far.
fn answers_user_message(turn: &Turn, message_id: &str) -> bool {
    if !turn.user_message_ids.is_empty() || turn.assistant_message_ids.is_empty() {
        return false;
    }
    match turn.assistant_info.as_ref().and_then(|info| info.parent_id.as_deref()) {
        Some(parent) => parent == message_id,
        None => !turn.has_content(),
    }
}

/// Drop events whose message belongs to a turn that has already been
/// finalized.
fn guard_finalized(session: &Session, message_id: &str, at: DateTime<Utc>) -> Option<StepOutcome> {
    let marker = session.finalized_marker_for(message_id)?;
    let disposition = if at < marker {
        debug!(session_id = %session.session_id, message_id, %marker, "ignoring stale event");
        Disposition::Stale {
            message_id: message_id.to_string(),
        }
    } else {
        debug!(session_id = %session.session_id, message_id, "ignoring late event for finalized turn");
        Disposition::Late {
            message_id: message_id.to_string(),
        }
    };
    Some(StepOutcome::only(disposition))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconstruct::testing::{
        assistant_text, at, feed, lifecycle, message, part, reply, user_text,
    };
    use hooktrace_types::event::PartKind;
    use hooktrace_types::session::SessionPhase;

    fn reconstructor() -> TurnReconstructor {
        TurnReconstructor::new(ReconstructionSettings::default())
    }

    fn session() -> Session {
        Session::new("ses_1", "u", "h", at(0))
    }

    fn texts(turn: &Turn, role: Role) -> Vec<String> {
        turn.parts(role)
            .iter()
            .filter_map(|p| p.text.clone())
            .collect()
    }

    #[test]
    fn test_user_event_opens_turn() {
        let r = reconstructor();
        let mut s = session();
        let outcome = feed(&r, &mut s, user_text("m1", "p1", "hello", 1));

        assert_eq!(outcome.disposition, Disposition::Applied);
        assert_eq!(s.phase(), SessionPhase::AwaitingAssistant);
        let turn = s.current_turn.as_ref().unwrap();
        assert_eq!(turn.turn_id, turn_id("ses_1", "m1"));
        assert_eq!(texts(turn, Role::User), vec!["hello"]);
    }

    #[test]
    fn test_assistant_event_moves_to_streaming() {
        let r = reconstructor();
        let mut s = session();
        feed(&r, &mut s, user_text("m1", "p1", "hello", 1));
        feed(&r, &mut s, assistant_text("m2", "p2", "hi", 2));
        assert_eq!(s.phase(), SessionPhase::AssistantStreaming);
    }

    #[test]
    fn test_second_user_message_before_assistant_extends_turn() {
        let r = reconstructor();
        let mut s = session();
        feed(&r, &mut s, user_text("m1", "p1", "first", 1));
        let outcome = feed(&r, &mut s, user_text("m3", "p3", "second", 2));

        assert!(outcome.finalized.is_empty());
        let turn = s.current_turn.as_ref().unwrap();
        assert_eq!(turn.turn_id, turn_id("ses_1", "m1"));
        assert_eq!(texts(turn, Role::User), vec!["first", "second"]);
    }

    #[test]
    fn test_streaming_deltas_replace_by_part_id() {
        let r = reconstructor();
        let mut s = session();
        feed(&r, &mut s, user_text("m1", "p1", "a", 1));
        feed(&r, &mut s, assistant_text("m2", "p2", "1", 2));
        feed(&r, &mut s, assistant_text("m2", "p2", "12", 3));
        let turn = s.current_turn.as_ref().unwrap();
        assert_eq!(texts(turn, Role::Assistant), vec!["12"]);
    }

    #[test]
    fn test_new_user_message_while_streaming_finalizes() {
        let r = reconstructor();
        let mut s = session();
        feed(&r, &mut s, user_text("m1", "p1", "a", 1));
        feed(&r, &mut s, assistant_text("m2", "p2", "1", 2));
        feed(&r, &mut s, assistant_text("m2", "p2", "12", 3));
        let outcome = feed(&r, &mut s, user_text("m3", "p3", "b", 4));

        assert_eq!(outcome.finalized, vec![turn_id("ses_1", "m1")]);
        assert_eq!(s.backfill.len(), 1);
        let queued = &s.backfill[0];
        assert_eq!(queued.reason, FlushReason::NextUserMessage);
        assert_eq!(texts(&queued.turn, Role::Assistant), vec!["12"]);
        assert!(queued.turn.completed);

        let open = s.current_turn.as_ref().unwrap();
        assert_eq!(open.turn_id, turn_id("ses_1", "m3"));
        assert_eq!(texts(open, Role::User), vec!["b"]);
        assert_eq!(s.phase(), SessionPhase::AwaitingAssistant);
    }

    #[test]
    fn test_update_for_covered_user_message_does_not_finalize() {
        let r = reconstructor();
        let mut s = session();
        feed(&r, &mut s, user_text("m1", "p1", "a", 1));
        feed(&r, &mut s, assistant_text("m2", "p2", "1", 2));
        let outcome = r.apply(&mut s, &message("m1", "user", 3));

        assert!(outcome.finalized.is_empty());
        assert_eq!(s.phase(), SessionPhase::AssistantStreaming);
    }

    #[test]
    fn test_idle_finalizes_open_turn() {
        let r = reconstructor();
        let mut s = session();
        feed(&r, &mut s, user_text("m1", "p1", "hello", 1));
        feed(&r, &mut s, assistant_text("m2", "p2", "hi there", 2));
        let outcome = r.apply(&mut s, &lifecycle("session.idle", 3));

        assert_eq!(outcome.lifecycle, Some(LifecycleKind::Idle));
        assert_eq!(outcome.finalized.len(), 1);
        assert_eq!(s.phase(), SessionPhase::NoTurn);
        assert_eq!(s.backfill[0].reason, FlushReason::SessionIdle);
        assert_eq!(s.last_lifecycle.as_ref().unwrap().kind, LifecycleKind::Idle);
    }

    #[test]
    fn test_repeated_idle_finalizes_once() {
        let r = reconstructor();
        let mut s = session();
        feed(&r, &mut s, user_text("m1", "p1", "hello", 1));
        r.apply(&mut s, &lifecycle("session.idle", 2));
        let second = r.apply(&mut s, &lifecycle("session.idle", 3));

        assert!(second.finalized.is_empty());
        assert_eq!(second.lifecycle, Some(LifecycleKind::Idle));
        assert_eq!(s.backfill.len(), 1);
    }

    #[test]
    fn test_created_does_not_touch_turn() {
        let r = reconstructor();
        let mut s = session();
        feed(&r, &mut s, user_text("m1", "p1", "hello", 1));
        let outcome = r.apply(&mut s, &lifecycle("session.created", 2));

        assert_eq!(outcome.lifecycle, Some(LifecycleKind::Created));
        assert!(outcome.finalized.is_empty());
        assert_eq!(s.phase(), SessionPhase::AwaitingAssistant);
    }

    #[test]
    fn test_error_and_compacted_flush_first() {
        for (name, reason) in [
            ("session.error", FlushReason::SessionError),
            ("session.compacted", FlushReason::SessionCompacted),
        ] {
            let r = reconstructor();
            let mut s = session();
            feed(&r, &mut s, user_text("m1", "p1", "hello", 1));
            let outcome = r.apply(&mut s, &lifecycle(name, 2));
            assert_eq!(outcome.finalized.len(), 1);
            assert_eq!(s.backfill[0].reason, reason);
        }
    }

    #[test]
    fn test_orphan_assistant_turn() {
        let r = reconstructor();
        let mut s = session();
        feed(&r, &mut s, assistant_text("m2", "p2", "unprompted", 1));

        let turn = s.current_turn.as_ref().unwrap();
        assert_eq!(turn.turn_id, turn_id("ses_1", "m2"));
        assert!(turn.user_parts.is_empty());
        assert_eq!(s.phase(), SessionPhase::AssistantStreaming);
    }

    #[test]
    fn test_user_message_after_its_reply_adopts_orphan() {
        let r = reconstructor();
        let mut s = session();
        r.apply(&mut s, &message("m2", "assistant", 1));
        let user = r.apply(&mut s, &message("m1", "user", 2));
        assert!(user.finalized.is_empty());

        r.apply(&mut s, &part("m1", "p1", PartKind::Text, Some("hello"), 3));
        let answer = r.apply(&mut s, &part("m2", "p2", PartKind::Text, Some("hi there"), 4));
        assert_eq!(answer.disposition, Disposition::Applied);

        let idle = r.apply(&mut s, &lifecycle("session.idle", 5));
        assert_eq!(idle.finalized, vec![turn_id("ses_1", "m1")]);
        assert_eq!(s.backfill.len(), 1);
        let turn = &s.backfill[0].turn;
        assert_eq!(texts(turn, Role::User), vec!["hello"]);
        assert_eq!(texts(turn, Role::Assistant), vec!["hi there"]);
    }

    #[test]
    fn test_reply_naming_its_parent_is_adopted_with_content() {
        let r = reconstructor();
        let mut s = session();
        r.apply(&mut s, &reply("m2", "m1", 1));
        r.apply(&mut s, &part("m2", "p2", PartKind::Text, Some("hi"), 1));
        let user = feed(&r, &mut s, user_text("m1", "p1", "hello", 2));

        assert!(user.finalized.is_empty());
        let turn = s.current_turn.as_ref().unwrap();
        assert_eq!(turn.turn_id, turn_id("ses_1", "m1"));
        assert_eq!(texts(turn, Role::User), vec!["hello"]);
        assert_eq!(texts(turn, Role::Assistant), vec!["hi"]);
        assert_eq!(s.phase(), SessionPhase::AssistantStreaming);
    }

    #[test]
    fn test_unrelated_user_message_closes_orphan_with_content() {
        let r = reconstructor();
        let mut s = session();
        feed(&r, &mut s, assistant_text("m2", "p2", "unprompted", 1));
        let outcome = feed(&r, &mut s, user_text("m3", "p3", "next", 2));

        assert_eq!(outcome.finalized, vec![turn_id("ses_1", "m2")]);
        assert_eq!(s.current_turn.as_ref().unwrap().turn_id, turn_id("ses_1", "m3"));
    }

    #[test]
    fn test_role_inferred_for_assistant_only_kinds() {
        let r = reconstructor();
        let mut s = session();
        feed(&r, &mut s, user_text("m1", "p1", "hello", 1));
        let reasoning = part("m2", "p2", PartKind::Reasoning, Some("thinking"), 2);
        assert_eq!(r.apply(&mut s, &reasoning).disposition, Disposition::Applied);
        assert_eq!(s.phase(), SessionPhase::AssistantStreaming);
        assert_eq!(s.message_roles.get("m2"), Some(&Role::Assistant));
    }

    #[test]
    fn test_unknown_role_text_is_parked_then_merged() {
        let r = reconstructor();
        let mut s = session();
        let early = part("m1", "p1", PartKind::Text, Some("hello"), 1);
        assert_eq!(r.apply(&mut s, &early).disposition, Disposition::Parked);
        assert_eq!(s.pending_parts.len(), 1);
        assert_eq!(s.phase(), SessionPhase::NoTurn);

        r.apply(&mut s, &message("m1", "user", 2));
        assert!(s.pending_parts.is_empty());
        let turn = s.current_turn.as_ref().unwrap();
        assert_eq!(texts(turn, Role::User), vec!["hello"]);
    }

    #[test]
    fn test_pending_parts_are_bounded() {
        let settings = ReconstructionSettings {
            max_message_events: 3,
            ..ReconstructionSettings::default()
        };
        let r = TurnReconstructor::new(settings);
        let mut s = session();
        for n in 0..5 {
            let p = part(&format!("m{n}"), &format!("p{n}"), PartKind::Text, Some("x"), n);
            r.apply(&mut s, &p);
        }
        assert_eq!(s.pending_parts.len(), 3);
        assert_eq!(s.pending_parts.front().unwrap().id, "p2");
    }

    #[test]
    fn test_event_for_finalized_turn_is_ignored() {
        let r = reconstructor();
        let mut s = session();
        feed(&r, &mut s, user_text("m1", "p1", "a", 10));
        feed(&r, &mut s, assistant_text("m2", "p2", "done", 11));
        r.apply(&mut s, &lifecycle("session.idle", 12));
        let before = s.backfill[0].turn.clone();

        let stale = feed(&r, &mut s, assistant_text("m2", "p2", "rewritten", 5));
        assert_eq!(
            stale.disposition,
            Disposition::Stale {
                message_id: "m2".to_string()
            }
        );
        let late = feed(&r, &mut s, assistant_text("m2", "p2", "rewritten", 20));
        assert_eq!(
            late.disposition,
            Disposition::Late {
                message_id: "m2".to_string()
            }
        );
        assert_eq!(s.backfill[0].turn, before);
        assert_eq!(s.phase(), SessionPhase::NoTurn);
    }

    #[test]
    fn test_message_events_respect_cap() {
        let settings = ReconstructionSettings {
            max_message_events: 4,
            ..ReconstructionSettings::default()
        };
        let r = TurnReconstructor::new(settings);
        let mut s = session();
        feed(&r, &mut s, user_text("m1", "p1", "a", 1));
        for n in 0..10 {
            feed(&r, &mut s, assistant_text("m2", "p2", &"x".repeat(n + 1), 2 + n as i64));
        }
        let turn = s.current_turn.as_ref().unwrap();
        assert_eq!(turn.message_events.assistant.len(), 4);
        assert_eq!(
            turn.message_events.assistant.back().unwrap().snapshot["text"],
            "x".repeat(10)
        );
    }

    #[test]
    fn test_assistant_completion_is_tracked() {
        let r = reconstructor();
        let mut s = session();
        feed(&r, &mut s, user_text("m1", "p1", "a", 1));
        let mut done = message("m2", "assistant", 2);
        if let HookEvent::MessageUpdated { info, .. } = &mut done.event {
            info.completed_at = Some(at(3));
        }
        r.apply(&mut s, &done);
        assert!(s.current_turn.as_ref().unwrap().assistant_completed);
    }

    #[test]
    fn test_last_seen_is_monotonic() {
        let r = reconstructor();
        let mut s = session();
        feed(&r, &mut s, user_text("m1", "p1", "a", 10));
        feed(&r, &mut s, user_text("m1", "p1", "ab", 4));
        assert_eq!(s.last_seen, Some(at(10)));
    }

    #[test]
    fn test_unrecognized_is_ignored() {
        let r = reconstructor();
        let mut s = session();
        let inbound = InboundEvent {
            event: HookEvent::Unrecognized {
                name: "file.edited".to_string(),
                reason: "unsupported event".to_string(),
            },
            captured_at: at(1),
            raw: Value::Null,
        };
        let outcome = r.apply(&mut s, &inbound);
        assert!(matches!(outcome.disposition, Disposition::Ignored { .. }));
        assert_eq!(s.last_seen, None);
    }
}
