//! Tracing subscriber initialization with structured logging and optional
//! OpenTelemetry span export.
//!
//! The hook runs inside the host's plugin process, so the ingest path logs
//! to a file and never to stdout/stderr. Maintenance commands log to stderr.
//!
//! # Usage
//!
//! ```no_run
//! use hooktrace_observe::tracing_setup::{init_tracing, LogTarget};
//!
//! let target = LogTarget::File("/tmp/hooktrace/hooktrace.log".into());
//! init_tracing("info", &target, false).unwrap();
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

/// Stores the OTel tracer provider so it can be shut down cleanly on exit.
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// Where diagnostic output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    /// Append to a file, creating it and its parent directory as needed.
    File(PathBuf),
    Stderr,
}

/// Open a log file for appending, creating parent directories.
pub fn open_log_file(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn make_writer(target: &LogTarget) -> std::io::Result<BoxMakeWriter> {
    match target {
        LogTarget::File(path) => Ok(BoxMakeWriter::new(Mutex::new(open_log_file(path)?))),
        LogTarget::Stderr => Ok(BoxMakeWriter::new(std::io::stderr)),
    }
}

/// Build the level filter. `RUST_LOG`, when set and valid, overrides the
/// configured level.
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initialize the global tracing subscriber.
///
/// - Installs a structured `fmt` layer without ANSI colouring, writing to
///   `target`.
/// - When `enable_otel` is true, additionally bridges tracing spans to
///   OpenTelemetry using a stdout exporter.
///
/// # Errors
///
/// Returns an error if the log file cannot be opened or the global
/// subscriber has already been set.
pub fn init_tracing(
    level: &str,
    target: &LogTarget,
    enable_otel: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .with_writer(make_writer(target)?);

    let env_filter = env_filter(level);

    if enable_otel {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let tracer = provider.tracer("hooktrace");
        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

        // Store the provider for shutdown and register it globally.
        let _ = TRACER_PROVIDER.set(provider.clone());
        opentelemetry::global::set_tracer_provider(provider);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

/// Flush pending spans and shut down the OpenTelemetry tracer provider.
///
/// Safe to call even when OTel was not enabled (no-op in that case).
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            tracing::debug!(error = %e, "OTel tracer provider shutdown error");
        }
    }
}
