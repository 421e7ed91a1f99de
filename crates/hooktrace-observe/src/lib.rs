//! Diagnostic logging for hooktrace.

pub mod tracing_setup;

pub use tracing_setup::{LogTarget, init_tracing, shutdown_tracing};
