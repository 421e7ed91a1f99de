//! Turn reconstruction: the per-session state machine and id derivation.

pub mod ids;
pub mod machine;

#[cfg(test)]
pub(crate) mod testing;

pub use machine::{Disposition, StepOutcome, TurnReconstructor};
