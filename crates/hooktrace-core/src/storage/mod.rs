//! Session state persistence.
//!
//! Defines the store port the ingest pipeline runs against. The file-backed
//! implementation lives in hooktrace-infra; [`memory`] is an in-process
//! store for the pipeline tests.

#[cfg(test)]
pub mod memory;
pub mod session_store;

#[cfg(test)]
pub use memory::InMemorySessionStore;
pub use session_store::{SessionStore, StoredEntry};
