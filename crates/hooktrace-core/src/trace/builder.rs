//! Builds backend-neutral [`TraceRecord`]s from finalized turns and
//! lifecycle milestones.

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Map, Value};

use std::collections::BTreeMap;

use hooktrace_types::config::ReconstructionSettings;
use hooktrace_types::event::{
    HookEvent, InboundEvent, LifecycleKind, MessageInfo, MessagePart, PartKind, Role,
};
use hooktrace_types::session::{MessageEventRecord, QueuedTurn, Session, Turn};
use hooktrace_types::trace::{
    Observation, ObservationKind, TokenUsage, TraceKind, TraceRecord, RECONSTRUCTION_TAG,
};

use crate::reconstruct::ids::{lifecycle_trace_id, observation_id};

use super::text::{truncate, truncate_value};

/// Display prefix of every trace name.
pub const TRACE_NAME_PREFIX: &str = "OpenCode";

const TURN_RECONSTRUCTION: &str = "plugin-event-turn-assembly";
const LIFECYCLE_RECONSTRUCTION: &str = "plugin-event-lifecycle";
const GENERATION_NAME: &str = "assistant_turn";

/// Terminal tool states that produce a span.
const TERMINAL_TOOL_STATES: [&str; 2] = ["completed", "error"];

/// Spacing between child observations that share a start time.
fn step() -> Duration {
    Duration::milliseconds(1)
}

/// Builds trace records. Holds only configuration.
#[derive(Debug, Clone)]
pub struct TraceBuilder {
    settings: ReconstructionSettings,
}

impl TraceBuilder {
    pub fn new(settings: ReconstructionSettings) -> Self {
        Self { settings }
    }

    fn tags(&self, kind: TraceKind) -> Vec<String> {
        vec![
            self.settings.integration_name.clone(),
            RECONSTRUCTION_TAG.to_string(),
            kind.tag().to_string(),
        ]
    }

    fn clip(&self, text: &str) -> String {
        truncate(text, self.settings.max_chars)
    }

    /// Trace for a finalized turn.
    pub fn turn_trace(&self, session: &Session, queued: &QueuedTurn) -> TraceRecord {
        let turn = &queued.turn;
        let assistant = turn.assistant_info.as_ref();
        let message_id = turn
            .assistant_message_ids
            .last()
            .cloned()
            .unwrap_or_else(|| turn.turn_id.clone());
        let timestamp = assistant
            .and_then(|info| info.created_at)
            .unwrap_or(turn.started_at);

        let input_text = joined_text(turn.parts(Role::User), PartKind::Text);
        let output_text = joined_text(turn.parts(Role::Assistant), PartKind::Text);
        let input = json!({"role": "user", "content": self.clip(&input_text)});
        let output = json!({"role": "assistant", "content": self.clip(&output_text)});

        let reasoning: Vec<&MessagePart> = turn
            .parts(Role::Assistant)
            .iter()
            .filter(|part| part.kind == PartKind::Reasoning && part.non_empty_text().is_some())
            .collect();
        let tools: Vec<&MessagePart> = turn
            .parts(Role::Assistant)
            .iter()
            .filter(|part| {
                part.kind == PartKind::Tool
                    && part
                        .tool_status()
                        .is_some_and(|status| TERMINAL_TOOL_STATES.contains(&status))
            })
            .collect();

        let mut metadata = Map::new();
        metadata.insert("product".into(), json!(self.settings.integration_name));
        metadata.insert("reconstruction".into(), json!(TURN_RECONSTRUCTION));
        metadata.insert("source".into(), json!(self.settings.integration_name));
        metadata.insert("session_id".into(), json!(session.session_id));
        metadata.insert("user_id".into(), json!(session.user_id));
        metadata.insert("hostname".into(), json!(session.host_id));
        metadata.insert("turn_id".into(), json!(turn.turn_id));
        metadata.insert("message_id".into(), json!(message_id));
        metadata.insert("parent_message_id".into(), json!(assistant.and_then(|i| i.parent_id.clone())));
        metadata.insert("provider_id".into(), json!(assistant.and_then(|i| i.provider_id.clone())));
        metadata.insert("model_id".into(), json!(assistant.and_then(|i| i.model_id.clone())));
        metadata.insert("agent".into(), json!(assistant.and_then(|i| i.agent.clone())));
        metadata.insert("mode".into(), json!(assistant.and_then(|i| i.mode.clone())));
        metadata.insert("cost".into(), json!(assistant.and_then(|i| i.cost)));
        metadata.insert("tokens".into(), json!(assistant.and_then(|i| i.tokens.clone())));
        metadata.insert("flush_reason".into(), json!(queued.reason.as_str()));
        metadata.insert("assistant_completed".into(), json!(turn.assistant_completed));
        metadata.insert("reasoning_count".into(), json!(reasoning.len()));
        metadata.insert("tool_count".into(), json!(tools.len()));
        metadata.insert(
            "messages".into(),
            json!({"user_info": turn.user_info, "assistant_info": turn.assistant_info}),
        );
        metadata.insert(
            "parts".into(),
            json!({
                "user": self.serialize_parts(turn.parts(Role::User)),
                "assistant": self.serialize_parts(turn.parts(Role::Assistant)),
            }),
        );
        metadata.insert(
            "parts_count".into(),
            json!({
                "user_total": turn.user_parts.len(),
                "assistant_total": turn.assistant_parts.len(),
                "user_by_type": count_by_type(turn.parts(Role::User)),
                "assistant_by_type": count_by_type(turn.parts(Role::Assistant)),
            }),
        );
        metadata.insert(
            "message_events".into(),
            json!({
                "user": event_history(turn, Role::User),
                "assistant": event_history(turn, Role::Assistant),
            }),
        );
        metadata.insert(
            "message_events_count".into(),
            json!({
                "user": turn.message_events.user.len(),
                "assistant": turn.message_events.assistant.len(),
            }),
        );

        let observations =
            self.turn_observations(turn, assistant, timestamp, &input, &output, &reasoning, &tools);

        TraceRecord {
            trace_id: turn.turn_id.clone(),
            name: format!("{TRACE_NAME_PREFIX} turn {message_id}"),
            kind: TraceKind::Turn,
            session_id: session.session_id.clone(),
            user_id: session.user_id.clone(),
            tags: self.tags(TraceKind::Turn),
            timestamp,
            input,
            output: Some(output),
            metadata: Value::Object(metadata),
            observations,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn turn_observations(
        &self,
        turn: &Turn,
        assistant: Option<&MessageInfo>,
        timestamp: DateTime<Utc>,
        input: &Value,
        output: &Value,
        reasoning: &[&MessagePart],
        tools: &[&MessagePart],
    ) -> Vec<Observation> {
        let trace_id = &turn.turn_id;
        let mut cursor = timestamp + step();
        let mut observations = Vec::with_capacity(1 + reasoning.len() + tools.len());

        observations.push(Observation {
            id: observation_id(trace_id, GENERATION_NAME),
            kind: ObservationKind::Generation,
            name: GENERATION_NAME.to_string(),
            start_time: cursor,
            end_time: assistant
                .and_then(|info| info.completed_at)
                .filter(|end| *end >= cursor),
            input: Some(input.clone()),
            output: Some(output.clone()),
            model: assistant.and_then(|info| info.model_id.clone()),
            usage: assistant.and_then(|info| info.tokens.as_ref()).map(token_usage),
            metadata: json!({
                "provider_id": assistant.and_then(|i| i.provider_id.clone()),
                "agent": assistant.and_then(|i| i.agent.clone()),
            }),
            level: None,
        });
        cursor += step();

        // Reasoning blocks and tool calls share one timeline ordered by their
        // own start times; spans never start before the previous one.
        let mut timeline: Vec<(DateTime<Utc>, &MessagePart)> = reasoning
            .iter()
            .chain(tools.iter())
            .map(|part| (part.started_at.unwrap_or(cursor), *part))
            .collect();
        timeline.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));

        let mut reasoning_index = 0;
        for (started, part) in timeline {
            let start_time = if started > cursor { started } else { cursor + step() };
            cursor = start_time + step();

            let observation = if part.kind == PartKind::Reasoning {
                reasoning_index += 1;
                let name = format!("reasoning[{reasoning_index}]");
                Observation {
                    id: observation_id(trace_id, &format!("{name}/{}", part.id)),
                    kind: ObservationKind::Span,
                    name,
                    start_time,
                    end_time: part.ended_at.filter(|end| *end >= start_time),
                    input: None,
                    output: part.non_empty_text().map(|text| json!(self.clip(text))),
                    model: None,
                    usage: None,
                    metadata: json!({"kind": "reasoning", "meta": part.metadata}),
                    level: None,
                }
            } else {
                self.tool_observation(trace_id, part, start_time)
            };
            observations.push(observation);
        }

        observations
    }

    fn tool_observation(&self, trace_id: &str, part: &MessagePart, start_time: DateTime<Utc>) -> Observation {
        let state = part.state.as_ref();
        let status = part.tool_status().unwrap_or_default();
        let failed = status == "error";
        let tool_input = match state.and_then(|s| s.get("input")) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        let result_key = if failed { "error" } else { "output" };
        let tool_output = match state.and_then(|s| s.get(result_key)) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        let name = format!("tool:{}", part.tool.as_deref().unwrap_or("tool"));

        Observation {
            id: observation_id(trace_id, &format!("{name}/{}", part.id)),
            kind: ObservationKind::Span,
            name,
            start_time,
            end_time: part.ended_at.filter(|end| *end >= start_time),
            input: Some(json!(self.clip(&tool_input))),
            output: Some(json!(self.clip(&tool_output))),
            model: None,
            usage: None,
            metadata: json!({
                "kind": "tool",
                "status": status,
                "meta": state.and_then(|s| s.get("metadata")).cloned(),
            }),
            level: failed.then(|| "ERROR".to_string()),
        }
    }

    fn serialize_parts(&self, parts: &[MessagePart]) -> Vec<Value> {
        parts
            .iter()
            .map(|part| {
                let mut out = Map::new();
                out.insert("id".into(), json!(part.id));
                out.insert("type".into(), json!(part.kind.as_str()));
                out.insert("message_id".into(), json!(part.message_id));
                if let Some(text) = part.text.as_deref() {
                    out.insert("text".into(), json!(self.clip(text)));
                }
                if let Some(tool) = &part.tool {
                    out.insert("tool".into(), json!(tool));
                }
                if let Some(metadata) = &part.metadata {
                    out.insert("metadata".into(), metadata.clone());
                }
                if let Some(state) = &part.state {
                    let limit = self.settings.max_chars;
                    out.insert(
                        "state".into(),
                        json!({
                            "status": state.get("status"),
                            "input": state.get("input"),
                            "output": state.get("output").map(|v| truncate_value(v, limit)),
                            "error": state.get("error").map(|v| truncate_value(v, limit)),
                            "metadata": state.get("metadata"),
                        }),
                    );
                }
                Value::Object(out)
            })
            .collect()
    }

    /// Trace for a lifecycle milestone. The raw host event is the input.
    pub fn lifecycle_trace(&self, session: &Session, kind: LifecycleKind, inbound: &InboundEvent) -> TraceRecord {
        let event_name = kind.event_name();
        let mut metadata = json!({
            "product": self.settings.integration_name,
            "reconstruction": LIFECYCLE_RECONSTRUCTION,
            "source": self.settings.integration_name,
            "event": event_name,
            "session_id": session.session_id,
            "user_id": session.user_id,
            "hostname": session.host_id,
            "payload": inbound.raw,
        });
        if let HookEvent::SessionError { error: Some(error), .. } = &inbound.event {
            metadata["error"] = error.clone();
        }

        TraceRecord {
            trace_id: lifecycle_trace_id(&session.session_id, event_name, inbound.captured_at),
            name: format!("{TRACE_NAME_PREFIX} {event_name}"),
            kind: TraceKind::Lifecycle,
            session_id: session.session_id.clone(),
            user_id: session.user_id.clone(),
            tags: self.tags(TraceKind::Lifecycle),
            timestamp: inbound.captured_at,
            input: inbound.raw.clone(),
            output: None,
            metadata,
            observations: Vec::new(),
        }
    }
}

/// Non-empty text of parts of one kind, in arrival order, joined by newlines.
fn joined_text(parts: &[MessagePart], kind: PartKind) -> String {
    parts
        .iter()
        .filter(|part| part.kind == kind)
        .filter_map(MessagePart::non_empty_text)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn count_by_type(parts: &[MessagePart]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for part in parts {
        *counts.entry(part.kind.as_str().to_string()).or_insert(0) += 1;
    }
    counts
}

fn event_history(turn: &Turn, role: Role) -> Vec<&MessageEventRecord> {
    turn.message_events.for_role(role).iter().collect()
}

fn token_usage(tokens: &Value) -> TokenUsage {
    let read = |path: &[&str]| -> u64 {
        path.iter()
            .try_fold(tokens, |value, key| value.get(*key))
            .and_then(|value| value.as_f64())
            .map(|n| n.max(0.0) as u64)
            .unwrap_or(0)
    };
    let input = read(&["input"]);
    let output = read(&["output"]);
    let total = match read(&["total"]) {
        0 => input + output,
        total => total,
    };
    TokenUsage {
        input,
        output,
        total,
        reasoning: read(&["reasoning"]),
        cache_read: read(&["cache", "read"]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconstruct::testing::at;
    use hooktrace_types::session::{FlushReason, TurnPhase};

    fn builder() -> TraceBuilder {
        TraceBuilder::new(ReconstructionSettings {
            host_id: "devbox".to_string(),
            ..ReconstructionSettings::default()
        })
    }

    fn text(id: &str, message_id: &str, kind: PartKind, text: &str) -> MessagePart {
        MessagePart {
            id: id.to_string(),
            message_id: message_id.to_string(),
            kind,
            text: Some(text.to_string()),
            tool: None,
            state: None,
            metadata: None,
            started_at: None,
            ended_at: None,
        }
    }

    fn tool(id: &str, status: &str, start: i64) -> MessagePart {
        MessagePart {
            id: id.to_string(),
            message_id: "m2".to_string(),
            kind: PartKind::Tool,
            text: None,
            tool: Some("bash".to_string()),
            state: Some(json!({
                "status": status,
                "input": {"command": "ls"},
                "output": "file.txt",
                "error": "boom",
            })),
            metadata: None,
            started_at: Some(at(start)),
            ended_at: Some(at(start + 1)),
        }
    }

    fn queued_turn() -> (Session, QueuedTurn) {
        let session = Session::new("ses_1", "alice", "devbox", at(0));
        let mut turn = Turn::open("turn_1".to_string(), at(1), TurnPhase::AssistantStreaming);
        turn.note_message(Role::User, "m1");
        turn.note_message(Role::Assistant, "m2");
        turn.upsert_part(Role::User, text("p1", "m1", PartKind::Text, "hello"));
        turn.upsert_part(Role::Assistant, text("p2", "m2", PartKind::Reasoning, "thinking"));
        turn.upsert_part(Role::Assistant, text("p3", "m2", PartKind::Text, "hi there"));
        turn.upsert_part(Role::Assistant, tool("p4", "completed", 5));
        turn.upsert_part(Role::Assistant, tool("p5", "running", 6));
        turn.assistant_info = Some(MessageInfo {
            id: "m2".to_string(),
            role: Some(Role::Assistant),
            parent_id: Some("m1".to_string()),
            model_id: Some("claude-sonnet".to_string()),
            provider_id: Some("anthropic".to_string()),
            agent: Some("build".to_string()),
            mode: None,
            cost: Some(0.01),
            tokens: Some(json!({"input": 100, "output": 20, "reasoning": 5, "cache": {"read": 7}})),
            created_at: Some(at(2)),
            completed_at: Some(at(9)),
        });
        turn.completed = true;
        let queued = QueuedTurn {
            turn,
            reason: FlushReason::SessionIdle,
            marker: at(10),
            attempts: 0,
        };
        (session, queued)
    }

    #[test]
    fn test_turn_trace_shape() {
        let (session, queued) = queued_turn();
        let trace = builder().turn_trace(&session, &queued);

        assert_eq!(trace.trace_id, "turn_1");
        assert_eq!(trace.name, "OpenCode turn m2");
        assert_eq!(trace.tags, vec!["opencode", "hook-only", "turn"]);
        assert_eq!(trace.timestamp, at(2));
        assert_eq!(trace.input["content"], "hello");
        assert_eq!(trace.output.as_ref().unwrap()["content"], "hi there");
        assert_eq!(trace.user_id, "alice");
        assert_eq!(trace.metadata["hostname"], "devbox");
        assert_eq!(trace.metadata["flush_reason"], "session.idle");
        assert_eq!(trace.metadata["reconstruction"], "plugin-event-turn-assembly");
        assert_eq!(trace.metadata["tool_count"], 1);
        assert_eq!(trace.metadata["reasoning_count"], 1);
        assert_eq!(trace.metadata["parts_count"]["assistant_total"], 4);
        assert_eq!(trace.metadata["parts"]["user"][0]["text"], "hello");
    }

    #[test]
    fn test_turn_observations() {
        let (session, queued) = queued_turn();
        let trace = builder().turn_trace(&session, &queued);

        let names: Vec<&str> = trace.observations.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["assistant_turn", "reasoning[1]", "tool:bash"]);

        let generation = &trace.observations[0];
        assert_eq!(generation.kind, ObservationKind::Generation);
        assert_eq!(generation.model.as_deref(), Some("claude-sonnet"));
        let usage = generation.usage.as_ref().unwrap();
        assert_eq!(usage.total, 120);
        assert_eq!(usage.cache_read, 7);

        let tool = &trace.observations[2];
        assert_eq!(tool.input.as_ref().unwrap(), &json!("{\"command\":\"ls\"}"));
        assert_eq!(tool.output.as_ref().unwrap(), &json!("file.txt"));
        assert_eq!(tool.level, None);

        let starts: Vec<_> = trace.observations.iter().map(|o| o.start_time).collect();
        assert!(starts.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_failed_tool_span_is_error_level() {
        let (session, mut queued) = queued_turn();
        queued.turn.upsert_part(Role::Assistant, tool("p4", "error", 5));
        let trace = builder().turn_trace(&session, &queued);
        let tool = trace.observations.iter().find(|o| o.name == "tool:bash").unwrap();
        assert_eq!(tool.level.as_deref(), Some("ERROR"));
        assert_eq!(tool.output.as_ref().unwrap(), &json!("boom"));
    }

    #[test]
    fn test_observation_ids_are_stable() {
        let (session, queued) = queued_turn();
        let a = builder().turn_trace(&session, &queued);
        let b = builder().turn_trace(&session, &queued);
        assert_eq!(a, b);
    }

    #[test]
    fn test_text_is_truncated() {
        let (session, mut queued) = queued_turn();
        queued
            .turn
            .upsert_part(Role::Assistant, text("p3", "m2", PartKind::Text, &"x".repeat(30)));
        let builder = TraceBuilder::new(ReconstructionSettings {
            max_chars: 10,
            ..ReconstructionSettings::default()
        });
        let trace = builder.turn_trace(&session, &queued);
        assert_eq!(
            trace.output.unwrap()["content"],
            format!("{}\n...[truncated 20 chars]", "x".repeat(10))
        );
    }

    #[test]
    fn test_orphan_turn_uses_turn_id_in_name() {
        let session = Session::new("ses_1", "u", "h", at(0));
        let mut turn = Turn::open("turn_x".to_string(), at(1), TurnPhase::AwaitingAssistant);
        turn.upsert_part(Role::User, text("p1", "m1", PartKind::Text, "hello"));
        let queued = QueuedTurn {
            turn,
            reason: FlushReason::Manual,
            marker: at(1),
            attempts: 0,
        };
        let trace = builder().turn_trace(&session, &queued);
        assert_eq!(trace.name, "OpenCode turn turn_x");
        assert_eq!(trace.output.unwrap()["content"], "");
        assert_eq!(trace.observations.len(), 1);
    }

    #[test]
    fn test_lifecycle_trace() {
        let session = Session::new("ses_1", "alice", "devbox", at(0));
        let inbound = InboundEvent {
            event: HookEvent::SessionError {
                session_id: "ses_1".to_string(),
                error: Some(json!({"name": "APIError"})),
            },
            captured_at: at(3),
            raw: json!({"type": "session.error"}),
        };
        let trace = builder().lifecycle_trace(&session, LifecycleKind::Error, &inbound);

        assert_eq!(trace.name, "OpenCode session.error");
        assert_eq!(trace.tags, vec!["opencode", "hook-only", "lifecycle"]);
        assert_eq!(trace.input, json!({"type": "session.error"}));
        assert_eq!(trace.metadata["error"]["name"], "APIError");
        assert_eq!(
            trace.trace_id,
            lifecycle_trace_id("ses_1", "session.error", at(3))
        );
        assert!(trace.observations.is_empty());
    }
}
