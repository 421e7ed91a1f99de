//! In-process session store.
//!
//! Behaves like the file-backed store (locking, corruption-as-absent) without
//! touching disk. Used by pipeline tests.

use chrono::{DateTime, Utc};

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use hooktrace_types::envelope::StateEnvelope;
use hooktrace_types::error::StoreError;

use super::session_store::{SessionStore, StoredEntry};

#[derive(Debug, Clone)]
enum Slot {
    Envelope(StateEnvelope),
    /// Stands in for an unreadable file.
    Corrupt(DateTime<Utc>),
}

#[derive(Debug, Default)]
struct Inner {
    slots: HashMap<String, Slot>,
    saves: usize,
}

/// Session store backed by a `HashMap`.
#[derive(Debug, Clone, Default)]
pub struct InMemorySessionStore {
    inner: Arc<Mutex<Inner>>,
    locks: Arc<Mutex<HashSet<String>>>,
}

/// Releases the in-memory lock on drop.
#[derive(Debug)]
pub struct MemoryLockGuard {
    locks: Arc<Mutex<HashSet<String>>>,
    session_id: String,
}

impl Drop for MemoryLockGuard {
    fn drop(&mut self) {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.session_id);
    }
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.with_inner(|inner| inner.saves)
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.with_inner(|inner| inner.slots.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace a session's stored state with unreadable data.
    pub fn corrupt(&self, session_id: &str, modified_at: DateTime<Utc>) {
        self.with_inner(|inner| {
            inner
                .slots
                .insert(session_id.to_string(), Slot::Corrupt(modified_at));
        });
    }

    /// Insert an envelope directly, bypassing the save counter.
    pub fn seed(&self, envelope: StateEnvelope) {
        self.with_inner(|inner| {
            inner.slots.insert(
                envelope.session.session_id.clone(),
                Slot::Envelope(envelope),
            );
        });
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> T {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut inner)
    }
}

impl SessionStore for InMemorySessionStore {
    type Guard = MemoryLockGuard;

    async fn lock(&self, session_id: &str) -> Result<MemoryLockGuard, StoreError> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if !locks.insert(session_id.to_string()) {
            return Err(StoreError::LockTimeout {
                session_id: session_id.to_string(),
                waited_ms: 0,
            });
        }
        Ok(MemoryLockGuard {
            locks: Arc::clone(&self.locks),
            session_id: session_id.to_string(),
        })
    }

    async fn load(&self, session_id: &str) -> Result<Option<StateEnvelope>, StoreError> {
        Ok(self.with_inner(|inner| match inner.slots.get(session_id) {
            Some(Slot::Envelope(envelope)) => Some(envelope.clone()),
            Some(Slot::Corrupt(_)) => {
                tracing::warn!(session_id, "stored state unreadable, starting fresh");
                None
            }
            None => None,
        }))
    }

    async fn save(&self, session_id: &str, envelope: &StateEnvelope) -> Result<(), StoreError> {
        self.with_inner(|inner| {
            inner
                .slots
                .insert(session_id.to_string(), Slot::Envelope(envelope.clone()));
            inner.saves += 1;
        });
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.with_inner(|inner| inner.slots.remove(key).is_some()))
    }

    async fn list(&self) -> Result<Vec<StoredEntry>, StoreError> {
        Ok(self.with_inner(|inner| {
            let mut entries: Vec<StoredEntry> = inner
                .slots
                .iter()
                .map(|(key, slot)| match slot {
                    Slot::Envelope(envelope) => StoredEntry {
                        key: key.clone(),
                        envelope: Some(envelope.clone()),
                        modified_at: envelope.written_at,
                    },
                    Slot::Corrupt(modified_at) => StoredEntry {
                        key: key.clone(),
                        envelope: None,
                        modified_at: *modified_at,
                    },
                })
                .collect();
            entries.sort_by(|a, b| a.key.cmp(&b.key));
            entries
        }))
    }
}

mod tests {
    use super::*;
    use hooktrace_types::session::Session;

    #[tokio::test]
    async fn test_lock_is_exclusive_until_dropped() {
        let store = InMemorySessionStore::new();
        let guard = store.lock("ses_1").await.unwrap();
        assert!(matches!(
            store.lock("ses_1").await,
            Err(StoreError::LockTimeout { .. })
        ));
        assert!(store.lock("ses_2").await.is_ok());
        drop(guard);
        assert!(store.lock("ses_1").await.is_ok());
    }

    #[tokio::test]
    async fn test_corrupt_entry_loads_as_absent_but_lists() {
        let store = InMemorySessionStore::new();
        store.corrupt("ses_1", Utc::now());
        assert!(store.load("ses_1").await.unwrap().is_none());

        let entries = store.list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].envelope.is_none());
    }

    #[tokio::test]
    async fn test_save_load_remove() {
        let store = InMemorySessionStore::new();
        let envelope = StateEnvelope::new(Session::new("ses_1", "u", "h", Utc::now()), Utc::now());
        store.save("ses_1", &envelope).await.unwrap();
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.load("ses_1").await.unwrap(), Some(envelope));
        assert!(store.remove("ses_1").await.unwrap());
        assert!(!store.remove("ses_1").await.unwrap());
        assert!(store.is_empty());
    }
}
