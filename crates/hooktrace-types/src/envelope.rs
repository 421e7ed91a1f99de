//! Versioned on-disk container for one session's reconstruction state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::Session;

/// Current envelope schema version. Envelopes carrying any other version are
/// treated as absent by the store.
pub const SCHEMA_VERSION: u32 = 1;

/// The persisted unit: schema version, session record, write timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEnvelope {
    pub schema_version: u32,
    pub session: Session,
    pub written_at: DateTime<Utc>,
}

impl StateEnvelope {
    /// Wrap a session for writing, stamped with the current schema version.
    pub fn new(session: Session, written_at: DateTime<Utc>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            session,
            written_at,
        }
    }
}

/// Minimal view used to check the schema version before a full decode.
#[derive(Debug, Deserialize)]
pub struct EnvelopeHeader {
    pub schema_version: u32,
}
