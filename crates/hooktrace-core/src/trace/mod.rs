//! Trace construction and the emitter port.

pub mod builder;
pub mod emitter;
#[cfg(test)]
pub mod recording;
pub mod text;

pub use builder::TraceBuilder;
pub use emitter::{TraceEmitter, UnconfiguredEmitter};
#[cfg(test)]
pub use recording::RecordingEmitter;
