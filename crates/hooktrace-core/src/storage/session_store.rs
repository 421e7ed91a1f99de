//! Session state store trait.

use chrono::{DateTime, Utc};

use hooktrace_types::envelope::StateEnvelope;
use hooktrace_types::error::StoreError;

/// One envelope found by [`SessionStore::list`].
#[derive(Debug, Clone)]
pub struct StoredEntry {
    /// Store key (the sanitised file stem for file-backed stores).
    pub key: String,
    /// Decoded envelope; `None` when the stored data is unreadable.
    pub envelope: Option<StateEnvelope>,
    /// Last write time as reported by the backing storage.
    pub modified_at: DateTime<Utc>,
}

/// Durable keyed storage for per-session reconstruction state.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
/// Implementations live in hooktrace-infra.
pub trait SessionStore: Send + Sync {
    /// Held for the duration of one lock-load-mutate-emit-save cycle.
    /// Dropping it releases the lock.
    type Guard: Send;

    /// Acquire the per-session writer lock, waiting at most the store's
    /// configured bound. Returns `StoreError::LockTimeout` past the deadline.
    fn lock(
        &self,
        session_id: &str,
    ) -> impl std::future::Future<Output = Result<Self::Guard, StoreError>> + Send;

    /// Load the envelope for a session.
    ///
    /// Unreadable data and foreign schema versions yield `Ok(None)`; only
    /// failures to reach the storage at all are errors.
    fn load(
        &self,
        session_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<StateEnvelope>, StoreError>> + Send;

    /// Atomically replace the envelope for a session.
    fn save(
        &self,
        session_id: &str,
        envelope: &StateEnvelope,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Remove a stored entry by key. Returns whether anything was removed.
    fn remove(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send;

    /// List every stored entry, readable or not.
    fn list(&self) -> impl std::future::Future<Output = Result<Vec<StoredEntry>, StoreError>> + Send;
}
