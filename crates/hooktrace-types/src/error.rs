use thiserror::Error;

/// Errors from the session state store.
///
/// Corrupt or foreign-version envelopes are not errors: the store reports
/// them as absent state. These variants cover the cases where the store could
/// not do its job at all.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("timed out after {waited_ms}ms waiting for lock on session '{session_id}'")]
    LockTimeout { session_id: String, waited_ms: u64 },

    #[error("blocking task failed: {0}")]
    Join(String),
}

/// Errors from sending a trace to the observability backend.
#[derive(Debug, Error)]
pub enum EmitError {
    #[error("backend credentials are not configured")]
    NotConfigured,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("backend rejected {rejected} of {total} batch events: {detail}")]
    Rejected {
        rejected: usize,
        total: usize,
        detail: String,
    },

    #[error("failed to encode trace: {0}")]
    Encode(String),
}

/// Errors from loading configuration sources.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read env file {path}: {reason}")]
    EnvFile { path: String, reason: String },
}

/// Top-level error for one hook invocation.
///
/// Every variant is mapped to "log and exit zero" by the binary; none of
/// them may surface to the host application.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("invalid payload: {0}")]
    Payload(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Emit(#[from] EmitError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invocation exceeded its {0}ms budget")]
    Timeout(u64),
}
