//! Ingest pipeline: one event in, one lock-load-apply-emit-save cycle.
//!
//! `IngestService` is generic over its store and emitter so the same code
//! runs against the file store and Langfuse in production and against
//! in-memory doubles in tests.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use hooktrace_types::config::ReconstructionSettings;
use hooktrace_types::envelope::StateEnvelope;
use hooktrace_types::error::{HookError, StoreError};
use hooktrace_types::event::{HookEvent, InboundEvent};
use hooktrace_types::session::{FlushReason, Session};

use crate::event::classifier::{self, UNKNOWN_EVENT};
use crate::flush::{DrainReport, IdleFlusher};
use crate::reconstruct::{Disposition, TurnReconstructor};
use crate::storage::SessionStore;
use crate::trace::{TraceBuilder, TraceEmitter};

/// How an invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Gate off or credentials missing; nothing was touched.
    Disabled,
    /// Payload was not JSON.
    Invalid { reason: String },
    /// Classified as unrecognized; the store was not touched.
    Unrecognized { reason: String },
    /// Another invocation held the session lock past the deadline.
    LockBusy,
    /// Manual flush of a session with no stored state.
    NoState,
    /// Event went through the state machine.
    Processed(Disposition),
}

/// Summary of one invocation, logged by the binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub event: String,
    pub session_id: Option<String>,
    pub outcome: IngestOutcome,
    pub emitted_turns: Vec<String>,
    pub failed_turns: Vec<String>,
    pub dropped_turns: Vec<String>,
    /// `Some(sent)` when the event carried a lifecycle milestone.
    pub lifecycle_emitted: Option<bool>,
}

impl IngestReport {
    fn new(event: impl Into<String>, session_id: Option<String>, outcome: IngestOutcome) -> Self {
        Self {
            event: event.into(),
            session_id,
            outcome,
            emitted_turns: Vec::new(),
            failed_turns: Vec::new(),
            dropped_turns: Vec::new(),
            lifecycle_emitted: None,
        }
    }

    fn absorb(&mut self, drain: DrainReport) {
        self.emitted_turns.extend(drain.emitted);
        self.failed_turns.extend(drain.failed);
        self.dropped_turns.extend(drain.dropped);
    }
}

/// Result of a prune pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub removed: Vec<String>,
    /// Old enough to remove but still holding unemitted work.
    pub kept_unemitted: Vec<String>,
    /// Old enough to remove but locked by a running invocation.
    pub kept_locked: Vec<String>,
    pub kept_recent: usize,
}

/// Runs events through the reconstruction pipeline.
pub struct IngestService<S: SessionStore, E: TraceEmitter> {
    store: S,
    emitter: E,
    reconstructor: TurnReconstructor,
    builder: TraceBuilder,
    enabled: bool,
}

impl<S: SessionStore, E: TraceEmitter> IngestService<S, E> {
    pub fn new(store: S, emitter: E, settings: ReconstructionSettings) -> Self {
        Self {
            store,
            emitter,
            reconstructor: TurnReconstructor::new(settings.clone()),
            builder: TraceBuilder::new(settings),
            enabled: true,
        }
    }

    /// Set the master gate. A disabled service never touches the store or
    /// the emitter.
    pub fn with_gate(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn emitter(&self) -> &E {
        &self.emitter
    }

    /// Ingest one payload as read from stdin.
    pub async fn ingest_json(&self, raw: &str, received_at: DateTime<Utc>) -> Result<IngestReport, HookError> {
        if !self.enabled {
            return Ok(self.disabled());
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(payload) => self.ingest(&payload, received_at).await,
            Err(e) => {
                debug!(error = %e, "payload is not valid JSON, ignoring");
                Ok(IngestReport::new(
                    UNKNOWN_EVENT,
                    None,
                    IngestOutcome::Invalid {
                        reason: e.to_string(),
                    },
                ))
            }
        }
    }

    /// Ingest one decoded payload.
    pub async fn ingest(&self, payload: &Value, received_at: DateTime<Utc>) -> Result<IngestReport, HookError> {
        if !self.enabled {
            return Ok(self.disabled());
        }
        let inbound = classifier::decode(payload, received_at);
        self.ingest_event(inbound).await
    }

    /// Ingest one classified event.
    pub async fn ingest_event(&self, inbound: InboundEvent) -> Result<IngestReport, HookError> {
        if !self.enabled {
            return Ok(self.disabled());
        }
        let name = inbound.event.name().to_string();
        let Some(session_id) = inbound.event.session_id().map(str::to_string) else {
            let reason = match &inbound.event {
                HookEvent::Unrecognized { reason, .. } => reason.clone(),
                _ => "missing session id".to_string(),
            };
            debug!(event = %name, %reason, "ignoring event");
            return Ok(IngestReport::new(name, None, IngestOutcome::Unrecognized { reason }));
        };

        let Some(_guard) = self.try_lock(&session_id).await? else {
            return Ok(IngestReport::new(name, Some(session_id), IngestOutcome::LockBusy));
        };

        let mut session = self.load_or_start(&session_id, inbound.captured_at).await?;
        let step = self.reconstructor.apply(&mut session, &inbound);
        debug!(
            session_id = %session_id,
            event = %name,
            disposition = step.disposition.as_str(),
            phase = ?session.phase(),
            "event applied"
        );

        let mut report = IngestReport::new(
            name,
            Some(session_id.clone()),
            IngestOutcome::Processed(step.disposition.clone()),
        );

        let drain_backfill =
            !session.backfill.is_empty() && (!step.finalized.is_empty() || step.lifecycle.is_some());
        if drain_backfill || step.lifecycle.is_some() {
            // Checkpoint so a crash mid-emission leaves the queued turns on disk.
            self.save(&session).await?;
        }

        if drain_backfill {
            let flusher = IdleFlusher::new(&self.emitter, &self.builder);
            report.absorb(flusher.drain(&mut session).await);
        }

        if let Some(kind) = step.lifecycle {
            let trace = self.builder.lifecycle_trace(&session, kind, &inbound);
            let sent = match self.emitter.emit(&trace).await {
                Ok(()) => {
                    info!(session_id = %session_id, event = kind.event_name(), "lifecycle trace emitted");
                    true
                }
                Err(e) => {
                    warn!(
                        session_id = %session_id,
                        event = kind.event_name(),
                        error = %e,
                        "lifecycle trace emission failed"
                    );
                    false
                }
            };
            report.lifecycle_emitted = Some(sent);
        }

        self.save(&session).await?;
        Ok(report)
    }

    /// Finalize the open turn of a session (reason `manual`) and drain its
    /// backfill queue. Emits no lifecycle trace.
    pub async fn flush_session(&self, session_id: &str) -> Result<IngestReport, HookError> {
        let event = FlushReason::Manual.as_str();
        if !self.enabled {
            return Ok(self.disabled());
        }
        let Some(_guard) = self.try_lock(session_id).await? else {
            return Ok(IngestReport::new(event, Some(session_id.to_string()), IngestOutcome::LockBusy));
        };
        let Some(envelope) = self.store.load(session_id).await? else {
            return Ok(IngestReport::new(event, Some(session_id.to_string()), IngestOutcome::NoState));
        };

        let mut session = envelope.session;
        let flusher = IdleFlusher::new(&self.emitter, &self.builder);
        let drain = flusher.flush(&mut session, FlushReason::Manual).await;

        let mut report = IngestReport::new(
            event,
            Some(session_id.to_string()),
            IngestOutcome::Processed(Disposition::Applied),
        );
        report.absorb(drain);
        self.save(&session).await?;
        Ok(report)
    }

    /// Load the stored envelope for a session, if readable.
    pub async fn inspect(&self, session_id: &str) -> Result<Option<StateEnvelope>, HookError> {
        Ok(self.store.load(session_id).await?)
    }

    /// Remove envelopes last written before `cutoff`.
    ///
    /// Sessions still holding an open or queued turn are kept unless `force`
    /// is set. Unreadable envelopes past the cutoff are always removed.
    pub async fn prune(&self, cutoff: DateTime<Utc>, force: bool) -> Result<PruneReport, HookError> {
        let mut report = PruneReport::default();

        for entry in self.store.list().await? {
            let written_at = entry
                .envelope
                .as_ref()
                .map(|envelope| envelope.written_at)
                .unwrap_or(entry.modified_at);
            if written_at >= cutoff {
                report.kept_recent += 1;
                continue;
            }

            let _guard = match &entry.envelope {
                Some(envelope) => {
                    if envelope.session.has_unemitted_work() && !force {
                        report.kept_unemitted.push(entry.key);
                        continue;
                    }
                    let Some(guard) = self.try_lock(&envelope.session.session_id).await? else {
                        report.kept_locked.push(entry.key);
                        continue;
                    };
                    // Another invocation may have saved between listing and locking.
                    let current = self.store.load(&envelope.session.session_id).await?;
                    if current.is_some_and(|current| current.written_at > envelope.written_at) {
                        report.kept_recent += 1;
                        continue;
                    }
                    Some(guard)
                }
                None => None,
            };

            if self.store.remove(&entry.key).await? {
                info!(key = %entry.key, %written_at, "pruned session state");
                report.removed.push(entry.key);
            }
        }

        Ok(report)
    }

    fn disabled(&self) -> IngestReport {
        debug!("tracing disabled, nothing to do");
        IngestReport::new(UNKNOWN_EVENT, None, IngestOutcome::Disabled)
    }

    /// Acquire the session lock; `None` when the bounded wait expired.
    async fn try_lock(&self, session_id: &str) -> Result<Option<S::Guard>, HookError> {
        match self.store.lock(session_id).await {
            Ok(guard) => Ok(Some(guard)),
            Err(StoreError::LockTimeout { waited_ms, .. }) => {
                warn!(session_id, waited_ms, "session lock busy, skipping");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn load_or_start(&self, session_id: &str, at: DateTime<Utc>) -> Result<Session, HookError> {
        if let Some(envelope) = self.store.load(session_id).await? {
            return Ok(envelope.session);
        }
        let settings = self.reconstructor.settings();
        info!(session_id, "starting new session state");
        Ok(Session::new(
            session_id,
            settings.default_user_id.clone(),
            settings.host_id.clone(),
            at,
        ))
    }

    async fn save(&self, session: &Session) -> Result<(), HookError> {
        let envelope = StateEnvelope::new(session.clone(), Utc::now());
        self.store.save(&session.session_id, &envelope).await?;
        Ok(())
    }
}
