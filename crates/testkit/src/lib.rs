#![warn(missing_docs)]
//! Deterministic testing surfaces: a tick-stepping harness and canonical JSON
//! snapshots for comparing whole-world runs.

mod micro_worldtest;
mod snapshot;

pub use micro_worldtest::*;
pub use snapshot::*;
