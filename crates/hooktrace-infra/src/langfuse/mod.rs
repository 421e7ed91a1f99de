//! Langfuse trace emitter.
//!
//! [`LangfuseEmitter`] implements
//! [`TraceEmitter`](hooktrace_core::trace::TraceEmitter) over the public
//! ingestion API.

pub mod client;
pub mod types;

pub use client::LangfuseEmitter;
