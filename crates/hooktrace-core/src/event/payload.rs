//! Lenient accessors over loosely-typed host JSON.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

/// Epoch values above this are read as milliseconds, otherwise seconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 10_000_000_000.0;

/// Follow a key path through nested objects.
pub fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, key| current.get(*key))
}

/// Identifier-like field: non-empty trimmed string, or a number rendered as text.
pub fn text_at(value: &Value, path: &[&str]) -> Option<String> {
    match lookup(value, path)? {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First path that yields an identifier-like value.
pub fn first_text(value: &Value, paths: &[&[&str]]) -> Option<String> {
    paths.iter().find_map(|path| text_at(value, path))
}

/// Raw string field, kept verbatim (whitespace is meaningful in part text).
pub fn raw_string_at(value: &Value, path: &[&str]) -> Option<String> {
    lookup(value, path)?.as_str().map(str::to_string)
}

pub fn f64_at(value: &Value, path: &[&str]) -> Option<f64> {
    lookup(value, path)?.as_f64()
}

/// Non-null field, cloned.
pub fn value_at(value: &Value, path: &[&str]) -> Option<Value> {
    lookup(value, path).filter(|v| !v.is_null()).cloned()
}

pub fn timestamp_at(value: &Value, path: &[&str]) -> Option<DateTime<Utc>> {
    lookup(value, path).and_then(parse_timestamp)
}

/// Parse a host timestamp.
///
/// Accepts RFC 3339 strings, naive ISO-8601 date-times (read as UTC), epoch
/// numbers and numeric strings. Epoch values above 10^10 are milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => from_epoch(n.as_f64()?),
        Value::String(s) => parse_timestamp_str(s.trim()),
        _ => None,
    }
}

fn parse_timestamp_str(raw: &str) -> Option<DateTime<Utc>> {
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    raw.parse::<f64>().ok().and_then(from_epoch)
}

fn from_epoch(raw: f64) -> Option<DateTime<Utc>> {
    if !raw.is_finite() || raw < 0.0 {
        return None;
    }
    let millis = if raw > EPOCH_MILLIS_THRESHOLD {
        raw
    } else {
        raw * 1000.0
    };
    Utc.timestamp_millis_opt(millis.round() as i64).single()
}
