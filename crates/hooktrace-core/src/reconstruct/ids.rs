//! Deterministic identifiers.
//!
//! Ids are digests of stable inputs so a replay after a crash derives the
//! same ids and re-emission overwrites instead of duplicating.

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

const TURN_ID_LEN: usize = 24;
const TRACE_ID_LEN: usize = 32;

fn hex_digest(input: &str) -> String {
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

/// Turn id: first 24 hex chars of `sha256("{session_id}:{message_id}")`.
pub fn turn_id(session_id: &str, first_message_id: &str) -> String {
    let mut digest = hex_digest(&format!("{session_id}:{first_message_id}"));
    digest.truncate(TURN_ID_LEN);
    digest
}

/// Trace id of a lifecycle milestone.
pub fn lifecycle_trace_id(session_id: &str, event_name: &str, captured_at: DateTime<Utc>) -> String {
    let stamp = captured_at.to_rfc3339_opts(SecondsFormat::Millis, true);
    let mut digest = hex_digest(&format!("{session_id}:{event_name}:{stamp}"));
    digest.truncate(TRACE_ID_LEN);
    digest
}

/// Id of a child observation within a trace.
pub fn observation_id(trace_id: &str, name: &str) -> String {
    let mut digest = hex_digest(&format!("{trace_id}/{name}"));
    digest.truncate(TRACE_ID_LEN);
    digest
}
