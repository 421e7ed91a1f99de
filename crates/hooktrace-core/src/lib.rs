//! Reconstruction core for hooktrace.
//!
//! Classifies host events, folds them into per-session turn state, builds
//! trace records and drives the store and emitter ports. This crate defines
//! the ports (`SessionStore`, `TraceEmitter`); the file store and the Langfuse
//! client that implement them live in hooktrace-infra. It depends only on
//! `hooktrace-types`, never on any IO crate.

pub mod event;
pub mod flush;
pub mod pipeline;
pub mod reconstruct;
pub mod storage;
pub mod trace;

pub use pipeline::{IngestOutcome, IngestReport, IngestService, PruneReport};
