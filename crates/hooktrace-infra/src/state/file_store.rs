//! File-backed session state store.
//!
//! Layout under the sessions directory:
//!
//! - `<key>.json`: the state envelope, replaced atomically on every save
//! - `<key>.lock`: advisory lock file, one per session, kept across removals
//!
//! `<key>` is the session id when it is a safe file name, otherwise a digest
//! of it. Saves write a temp file in the same directory, fsync it and rename
//! it over the envelope, so readers only ever see complete writes.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use sha2::{Digest, Sha256};

use hooktrace_core::storage::{SessionStore, StoredEntry};
use hooktrace_types::envelope::{EnvelopeHeader, SCHEMA_VERSION, StateEnvelope};
use hooktrace_types::error::StoreError;

const ENVELOPE_EXT: &str = "json";
const LOCK_EXT: &str = "lock";
const MAX_PLAIN_KEY_LEN: usize = 128;
const HASHED_KEY_PREFIX: &str = "s-";
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Map a session id onto a safe file stem.
///
/// Ids made only of ASCII alphanumerics, `-`, `_` and `.` (and not starting
/// with `.`) are used as-is. Anything else is replaced by a digest.
pub fn session_key(session_id: &str) -> String {
    let safe = !session_id.is_empty()
        && session_id.len() <= MAX_PLAIN_KEY_LEN
        && !session_id.starts_with('.')
        && !session_id.starts_with(HASHED_KEY_PREFIX)
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if safe {
        return session_id.to_string();
    }
    let digest = format!("{:x}", Sha256::digest(session_id.as_bytes()));
    format!("{HASHED_KEY_PREFIX}{}", &digest[..32])
}

fn io_error(path: &Path, err: impl std::fmt::Display) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

/// Holds the advisory lock on a session until dropped.
#[derive(Debug)]
pub struct FileLockGuard {
    file: File,
    path: PathBuf,
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            tracing::debug!(path = %self.path.display(), error = %err, "failed to release session lock");
        }
    }
}

/// Session store over a directory of JSON envelopes.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    dir: PathBuf,
    lock_timeout: Duration,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            lock_timeout,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str, ext: &str) -> PathBuf {
        self.dir.join(format!("{key}.{ext}"))
    }

    /// Path of the envelope for a session id.
    pub fn envelope_path(&self, session_id: &str) -> PathBuf {
        self.path_for(&session_key(session_id), ENVELOPE_EXT)
    }

    fn ensure_dir(&self) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| io_error(&self.dir, e))
    }

    fn open_lock_file(&self, session_id: &str) -> Result<(File, PathBuf), StoreError> {
        self.ensure_dir()?;
        let path = self.path_for(&session_key(session_id), LOCK_EXT);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| io_error(&path, e))?;
        Ok((file, path))
    }
}

/// Decode an envelope, treating anything unreadable as absent.
fn decode_envelope(path: &Path, bytes: &[u8]) -> Option<StateEnvelope> {
    let header: EnvelopeHeader = match serde_json::from_slice(bytes) {
        Ok(header) => header,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "unreadable session state, starting fresh");
            return None;
        }
    };
    if header.schema_version != SCHEMA_VERSION {
        tracing::warn!(
            path = %path.display(),
            found = header.schema_version,
            expected = SCHEMA_VERSION,
            "session state has a different schema version, starting fresh"
        );
        return None;
    }
    match serde_json::from_slice(bytes) {
        Ok(envelope) => Some(envelope),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "corrupt session state, starting fresh");
            None
        }
    }
}

fn read_envelope(path: &Path) -> Result<Option<StateEnvelope>, StoreError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(decode_envelope(path, &bytes)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_error(path, err)),
    }
}

fn write_atomic(path: &Path, payload: &[u8]) -> Result<(), StoreError> {
    let parent = path
        .parent()
        .ok_or_else(|| io_error(path, "envelope path has no parent"))?;
    std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(|e| io_error(parent, e))?;
    temp.write_all(payload).map_err(|e| io_error(temp.path(), e))?;
    temp.as_file().sync_all().map_err(|e| io_error(temp.path(), e))?;
    temp.persist(path).map_err(|e| io_error(path, e))?;
    Ok(())
}

impl SessionStore for FileSessionStore {
    type Guard = FileLockGuard;

    async fn lock(&self, session_id: &str) -> Result<FileLockGuard, StoreError> {
        let (file, path) = self.open_lock_file(session_id)?;
        let started = Instant::now();
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => {
                    tracing::debug!(session_id, waited_ms = started.elapsed().as_millis() as u64, "session lock acquired");
                    return Ok(FileLockGuard { file, path });
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    if started.elapsed() >= self.lock_timeout {
                        return Err(StoreError::LockTimeout {
                            session_id: session_id.to_string(),
                            waited_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                    tokio::time::sleep(LOCK_POLL_INTERVAL).await;
                }
                Err(err) => return Err(io_error(&path, err)),
            }
        }
    }

    async fn load(&self, session_id: &str) -> Result<Option<StateEnvelope>, StoreError> {
        let path = self.envelope_path(session_id);
        tokio::task::spawn_blocking(move || read_envelope(&path))
            .await
            .map_err(|e| StoreError::Join(e.to_string()))?
    }

    async fn save(&self, session_id: &str, envelope: &StateEnvelope) -> Result<(), StoreError> {
        let path = self.envelope_path(session_id);
        let payload =
            serde_json::to_vec_pretty(envelope).map_err(|e| StoreError::Serialize(e.to_string()))?;
        tokio::task::spawn_blocking(move || write_atomic(&path, &payload))
            .await
            .map_err(|e| StoreError::Join(e.to_string()))?
    }

    /// Deletes the envelope only. The `.lock` file stays: a caller may be
    /// holding or polling its inode, and unlinking it would let the next
    /// invocation lock a fresh file for the same session.
    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let envelope = self.path_for(key, ENVELOPE_EXT);
        match tokio::fs::remove_file(&envelope).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(io_error(&envelope, err)),
        }
    }

    async fn list(&self) -> Result<Vec<StoredEntry>, StoreError> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || list_entries(&dir))
            .await
            .map_err(|e| StoreError::Join(e.to_string()))?
    }
}

fn list_entries(dir: &Path) -> Result<Vec<StoredEntry>, StoreError> {
    let read_dir = match std::fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(io_error(dir, err)),
    };

    let mut entries = Vec::new();
    for item in read_dir {
        let item = item.map_err(|e| io_error(dir, e))?;
        let path = item.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(ENVELOPE_EXT) {
            continue;
        }
        let Some(key) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        let modified_at: DateTime<Utc> = item
            .metadata()
            .and_then(|meta| meta.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        entries.push(StoredEntry {
            key: key.to_string(),
            envelope: read_envelope(&path)?,
            modified_at,
        });
    }
    entries.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(entries)
}
