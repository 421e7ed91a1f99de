//! Inbound event decoding.

pub mod classifier;
pub mod payload;

pub use classifier::{classify, decode};
