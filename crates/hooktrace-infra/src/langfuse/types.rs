//! Langfuse ingestion API types.
//!
//! Wire structures for `POST /api/public/ingestion`. They are built from the
//! backend-neutral records in `hooktrace_types::trace`; nothing outside this
//! module sees them.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use hooktrace_types::trace::{Observation, ObservationKind, TokenUsage, TraceRecord};

/// Request body: a batch of ingestion events.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionBatch {
    pub batch: Vec<IngestionEvent>,
}

/// One event in the batch. `id` identifies the event itself, not the
/// trace or observation it carries.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub timestamp: String,
    pub body: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceBody {
    pub id: String,
    pub timestamp: String,
    pub name: String,
    pub user_id: String,
    pub session_id: String,
    pub input: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    pub metadata: Value,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationBody {
    pub id: String,
    pub trace_id: String,
    pub name: String,
    pub start_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    pub metadata: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_details: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageBody {
    pub input: u64,
    pub output: u64,
    pub total: u64,
    pub unit: &'static str,
}

/// Body of a 200/207 ingestion response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngestionResponse {
    #[serde(default)]
    pub successes: Vec<Value>,
    #[serde(default)]
    pub errors: Vec<IngestionFailure>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestionFailure {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub message: Option<String>,
}

pub const TRACE_CREATE: &str = "trace-create";
pub const GENERATION_CREATE: &str = "generation-create";
pub const SPAN_CREATE: &str = "span-create";

fn stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn usage_details(usage: &TokenUsage) -> Value {
    let mut details = serde_json::Map::new();
    details.insert("input".into(), usage.input.into());
    details.insert("output".into(), usage.output.into());
    details.insert("total".into(), usage.total.into());
    if usage.reasoning > 0 {
        details.insert("reasoning".into(), usage.reasoning.into());
    }
    if usage.cache_read > 0 {
        details.insert("cache_read_input_tokens".into(), usage.cache_read.into());
    }
    Value::Object(details)
}

fn observation_body(trace_id: &str, obs: &Observation) -> ObservationBody {
    let status_message = match obs.level.as_deref() {
        Some("ERROR") => obs
            .output
            .as_ref()
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    };
    ObservationBody {
        id: obs.id.clone(),
        trace_id: trace_id.to_string(),
        name: obs.name.clone(),
        start_time: stamp(obs.start_time),
        end_time: obs.end_time.map(stamp),
        input: obs.input.clone(),
        output: obs.output.clone(),
        metadata: obs.metadata.clone(),
        level: obs.level.clone(),
        status_message,
        model: obs.model.clone(),
        usage: obs.usage.as_ref().map(|u| UsageBody {
            input: u.input,
            output: u.output,
            total: u.total,
            unit: "TOKENS",
        }),
        usage_details: obs.usage.as_ref().map(usage_details),
    }
}

/// Map a trace record onto ingestion events: the trace first, then its
/// observations in order. `event_id` supplies a fresh id per event.
pub fn batch_for(
    trace: &TraceRecord,
    now: DateTime<Utc>,
    mut event_id: impl FnMut() -> String,
) -> Result<IngestionBatch, serde_json::Error> {
    let sent_at = stamp(now);
    let mut batch = Vec::with_capacity(1 + trace.observations.len());

    let body = TraceBody {
        id: trace.trace_id.clone(),
        timestamp: stamp(trace.timestamp),
        name: trace.name.clone(),
        user_id: trace.user_id.clone(),
        session_id: trace.session_id.clone(),
        input: trace.input.clone(),
        output: trace.output.clone(),
        metadata: trace.metadata.clone(),
        tags: trace.tags.clone(),
    };
    batch.push(IngestionEvent {
        id: event_id(),
        kind: TRACE_CREATE,
        timestamp: sent_at.clone(),
        body: serde_json::to_value(body)?,
    });

    for obs in &trace.observations {
        let kind = match obs.kind {
            ObservationKind::Generation => GENERATION_CREATE,
            ObservationKind::Span => SPAN_CREATE,
        };
        batch.push(IngestionEvent {
            id: event_id(),
            kind,
            timestamp: sent_at.clone(),
            body: serde_json::to_value(observation_body(&trace.trace_id, obs))?,
        });
    }

    Ok(IngestionBatch { batch })
}
