//! Idle flusher: closes turns whose natural end never arrived and drains
//! the backfill queue through the emitter.

use tracing::{debug, info, warn};

use hooktrace_types::session::{FlushReason, MAX_BACKFILL_TURNS, QueuedTurn, Session};

use crate::trace::{TraceBuilder, TraceEmitter};

/// Failed emissions tolerated per turn before it is given up.
pub const MAX_EMIT_ATTEMPTS: u32 = 3;

/// Finalize the open turn, if any, and queue it for emission.
///
/// Returns the queued turn id. Returns `None` when there is no open turn,
/// when its id was already finalized, or when it has no content. Empty turns
/// are dropped without an index entry, so later content for their messages
/// still lands in a fresh turn.
pub fn finalize_open_turn(session: &mut Session, reason: FlushReason) -> Option<String> {
    let mut turn = session.current_turn.take()?;
    session.message_roles.clear();
    let marker = session.last_seen.unwrap_or(turn.started_at);

    if session.is_finalized(&turn.turn_id) {
        debug!(turn_id = %turn.turn_id, "turn already finalized, skipping");
        return None;
    }
    if !turn.has_content() {
        debug!(turn_id = %turn.turn_id, %reason, "discarding turn without content");
        return None;
    }
    if !turn.assistant_completed {
        debug!(turn_id = %turn.turn_id, %reason, "finalizing turn from partial assistant content");
    }

    turn.completed = true;
    let turn_id = turn.turn_id.clone();
    if session.backfill.len() >= MAX_BACKFILL_TURNS {
        if let Some(evicted) = session.backfill.pop_front() {
            warn!(
                session_id = %session.session_id,
                turn_id = %evicted.turn.turn_id,
                "backfill queue full, dropping oldest unsent turn"
            );
            session.record_finalized(&evicted.turn, evicted.marker);
        }
    }
    session.backfill.push_back(QueuedTurn {
        turn,
        reason,
        marker,
        attempts: 0,
    });

    info!(session_id = %session.session_id, %turn_id, %reason, "turn finalized");
    Some(turn_id)
}

/// Outcome of draining the backfill queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub emitted: Vec<String>,
    /// Failed this time, still queued.
    pub failed: Vec<String>,
    /// Failed for the last allowed time and removed from the queue.
    pub dropped: Vec<String>,
}

/// Forces finalization and retries queued emissions.
pub struct IdleFlusher<'a, E> {
    emitter: &'a E,
    builder: &'a TraceBuilder,
}

impl<'a, E: TraceEmitter> IdleFlusher<'a, E> {
    pub fn new(emitter: &'a E, builder: &'a TraceBuilder) -> Self {
        Self { emitter, builder }
    }

    /// Finalize whatever the open turn holds and drain the queue.
    pub async fn flush(&self, session: &mut Session, reason: FlushReason) -> DrainReport {
        finalize_open_turn(session, reason);
        self.drain(session).await
    }

    /// Emit every queued turn, oldest first.
    ///
    /// Emitted turns move to the finalized index. Failed turns go back on the
    /// queue with their attempt count raised, until [`MAX_EMIT_ATTEMPTS`].
    pub async fn drain(&self, session: &mut Session) -> DrainReport {
        let mut report = DrainReport::default();
        let queued: Vec<QueuedTurn> = session.backfill.drain(..).collect();

        for mut item in queued {
            let turn_id = item.turn.turn_id.clone();
            let trace = self.builder.turn_trace(session, &item);
            match self.emitter.emit(&trace).await {
                Ok(()) => {
                    info!(session_id = %session.session_id, %turn_id, "turn trace emitted");
                    session.record_finalized(&item.turn, item.marker);
                    report.emitted.push(turn_id);
                }
                Err(e) => {
                    item.attempts += 1;
                    if item.attempts >= MAX_EMIT_ATTEMPTS {
                        warn!(
                            session_id = %session.session_id,
                            %turn_id,
                            attempts = item.attempts,
                            error = %e,
                            "giving up on turn trace"
                        );
                        session.record_finalized(&item.turn, item.marker);
                        report.dropped.push(turn_id);
                    } else {
                        warn!(
                            session_id = %session.session_id,
                            %turn_id,
                            attempts = item.attempts,
                            error = %e,
                            "turn trace emission failed, keeping for backfill"
                        );
                        session.backfill.push_back(item);
                        report.failed.push(turn_id);
                    }
                }
            }
        }

        report
    }
}
