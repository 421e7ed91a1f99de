//! The hook path: one payload in, nothing out.
//!
//! Nothing here may fail the host. Every error is logged to the state
//! directory's log file and the process exits 0.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

use hooktrace_core::{IngestOutcome, IngestReport};
use hooktrace_observe::{LogTarget, init_tracing, shutdown_tracing};
use hooktrace_types::error::HookError;

use crate::state::AppState;

/// Budget for one whole invocation: payload read, lock wait and emission.
pub const INGEST_DEADLINE: Duration = Duration::from_secs(10);

type Payload = Box<dyn AsyncRead + Unpin + Send>;

async fn open_payload(file: Option<&Path>) -> Result<Payload, HookError> {
    match file {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .map_err(|e| HookError::Payload(format!("failed to open {}: {e}", path.display())))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(tokio::io::stdin())),
    }
}

async fn read_payload<R: AsyncRead + Unpin>(mut reader: R) -> Result<String, HookError> {
    let mut raw = String::new();
    reader
        .read_to_string(&mut raw)
        .await
        .map_err(|e| HookError::Payload(format!("failed to read payload: {e}")))?;
    Ok(raw)
}

fn log_report(report: &IngestReport) {
    match &report.outcome {
        IngestOutcome::Processed(disposition) => info!(
            event = %report.event,
            session_id = report.session_id.as_deref().unwrap_or(""),
            disposition = disposition.as_str(),
            emitted = report.emitted_turns.len(),
            failed = report.failed_turns.len(),
            dropped = report.dropped_turns.len(),
            lifecycle_emitted = ?report.lifecycle_emitted,
            "event processed"
        ),
        IngestOutcome::LockBusy => warn!(
            event = %report.event,
            session_id = report.session_id.as_deref().unwrap_or(""),
            "event skipped, session busy"
        ),
        other => debug!(event = %report.event, outcome = ?other, "event not processed"),
    }
}

/// Run one hook invocation. Never returns an error.
pub async fn run(state: &AppState, file: Option<&Path>) {
    let config = &state.config;
    if !config.enabled {
        return;
    }

    // The log file is the only diagnostic channel; if it cannot be opened
    // the invocation carries on silently.
    let logging = init_tracing(
        config.log_level.as_filter(),
        &LogTarget::File(config.log_file()),
        config.otel_stdout,
    )
    .is_ok();
    for warning in &state.warnings {
        warn!("{warning}");
    }

    let result = match open_payload(file).await {
        Ok(payload) => process(state, payload, INGEST_DEADLINE).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        warn!(error = %e, "hook invocation failed");
    }

    if logging {
        shutdown_tracing();
    }
}

/// Read the payload and ingest it, all within `deadline`.
async fn process<R: AsyncRead + Unpin>(
    state: &AppState,
    payload: R,
    deadline: Duration,
) -> Result<(), HookError> {
    let report = tokio::time::timeout(deadline, ingest(state, payload))
        .await
        .map_err(|_| HookError::Timeout(deadline.as_millis() as u64))??;
    if let Some(report) = report {
        log_report(&report);
    }
    Ok(())
}

async fn ingest<R: AsyncRead + Unpin>(
    state: &AppState,
    payload: R,
) -> Result<Option<IngestReport>, HookError> {
    let raw = read_payload(payload).await?;
    let service = match state.live_service() {
        Ok(service) => service,
        Err(e) => {
            debug!(error = %e, "Langfuse not configured, nothing to do");
            return Ok(None);
        }
    };
    service.ingest_json(&raw, Utc::now()).await.map(Some)
}
