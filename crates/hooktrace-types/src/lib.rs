//! Shared domain types for hooktrace.
//!
//! This crate contains the types used across the workspace: inbound hook
//! events, per-session reconstruction state, the persisted envelope, trace
//! records handed to the backend, configuration, and error types.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror, secrecy.

pub mod config;
pub mod envelope;
pub mod error;
pub mod event;
pub mod session;
pub mod trace;
