//! Emitter that records traces in memory, with optional injected failures.

use std::sync::{Arc, Mutex, PoisonError};

use hooktrace_types::error::EmitError;
use hooktrace_types::trace::{TraceKind, TraceRecord};

use super::emitter::TraceEmitter;

#[derive(Debug, Default)]
struct Inner {
    sent: Vec<TraceRecord>,
    failures_left: usize,
    attempts: usize,
}

/// In-memory [`TraceEmitter`]. Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingEmitter {
    inner: Arc<Mutex<Inner>>,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` emissions with a transport error.
    pub fn fail_next(&self, count: usize) {
        self.with_inner(|inner| inner.failures_left = count);
    }

    /// Every trace successfully emitted, in order.
    pub fn sent(&self) -> Vec<TraceRecord> {
        self.with_inner(|inner| inner.sent.clone())
    }

    pub fn sent_of(&self, kind: TraceKind) -> Vec<TraceRecord> {
        self.sent().into_iter().filter(|t| t.kind == kind).collect()
    }

    /// Number of emit calls, failed ones included.
    pub fn attempts(&self) -> usize {
        self.with_inner(|inner| inner.attempts)
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> T {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut inner)
    }
}

impl TraceEmitter for RecordingEmitter {
    async fn emit(&self, trace: &TraceRecord) -> Result<(), EmitError> {
        self.with_inner(|inner| {
            inner.attempts += 1;
            if inner.failures_left > 0 {
                inner.failures_left -= 1;
                return Err(EmitError::Transport("injected failure".to_string()));
            }
            inner.sent.push(trace.clone());
            Ok(())
        })
    }
}
