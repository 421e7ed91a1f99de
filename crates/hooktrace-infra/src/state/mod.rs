//! Persistent session state.

pub mod file_store;

pub use file_store::{FileLockGuard, FileSessionStore, session_key};
