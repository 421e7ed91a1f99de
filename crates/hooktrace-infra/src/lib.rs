//! Infrastructure layer for hooktrace.
//!
//! Contains the implementations of the ports defined in `hooktrace-core`:
//! the file-backed session store, the Langfuse HTTP emitter, and the
//! environment/`.env` configuration loader.

pub mod config;
pub mod langfuse;
pub mod state;
