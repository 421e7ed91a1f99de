//! Trace emitter trait.

use hooktrace_types::error::EmitError;
use hooktrace_types::trace::TraceRecord;

/// Sends finished trace records to an observability backend.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
/// The Langfuse implementation lives in hooktrace-infra. Callers treat
/// every error as non-fatal.
pub trait TraceEmitter: Send + Sync {
    fn emit(
        &self,
        trace: &TraceRecord,
    ) -> impl std::future::Future<Output = Result<(), EmitError>> + Send;
}

/// Emitter for commands that never send anything (inspect, prune). Every
/// call fails with [`EmitError::NotConfigured`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredEmitter;

impl TraceEmitter for UnconfiguredEmitter {
    async fn emit(&self, _trace: &TraceRecord) -> Result<(), EmitError> {
        Err(EmitError::NotConfigured)
    }
}
