//! Micro-worldtest harness for deterministic, tick-based tests.
//!
//! A micro-worldtest steps a small simulation for a fixed number of ticks and
//! snapshots selected state each tick. Two runs built from the same inputs
//! must produce byte-identical canonical reports.

use crate::snapshot::{assert_json_eq, canonical_json};
use anyhow::{Context, Result};
use ironworks_core::SimTick;
use serde::Serialize;

/// Configuration for a micro-worldtest.
#[derive(Debug, Clone)]
pub struct MicroWorldtestConfig {
    /// Human-readable name (written into the report).
    pub name: String,
    /// Number of ticks to step (report includes the initial snapshot at tick 0).
    pub ticks: u64,
}

impl MicroWorldtestConfig {
    /// Shorthand constructor.
    pub fn new(name: impl Into<String>, ticks: u64) -> Self {
        Self {
            name: name.into(),
            ticks,
        }
    }
}

/// Single snapshot frame captured at a given tick.
#[derive(Debug, Clone, Serialize)]
pub struct MicroWorldtestFrame<S> {
    /// Tick number.
    pub tick: u64,
    /// Snapshot payload.
    pub snapshot: S,
}

/// Every frame of one run.
#[derive(Debug, Clone, Serialize)]
pub struct MicroWorldtestReport<S> {
    /// Name from the config.
    pub name: String,
    /// `ticks + 1` frames, starting at tick 0.
    pub frames: Vec<MicroWorldtestFrame<S>>,
}

impl<S: Serialize> MicroWorldtestReport<S> {
    /// Canonical JSON rendering of the whole report.
    pub fn to_canonical_json(&self) -> Result<String> {
        canonical_json(self)
    }

    /// Snapshot of the final frame.
    pub fn last(&self) -> Option<&S> {
        self.frames.last().map(|frame| &frame.snapshot)
    }
}

/// Run a micro-worldtest and return every captured frame.
///
/// Captures the initial snapshot at tick 0, then steps `config.ticks` times,
/// capturing a snapshot after each step (so the report contains `ticks + 1` frames).
/// `step` receives the tick being entered.
pub fn run_micro_worldtest<State, Snapshot, StepFn, SnapFn>(
    config: &MicroWorldtestConfig,
    mut state: State,
    mut step: StepFn,
    mut snapshot: SnapFn,
) -> MicroWorldtestReport<Snapshot>
where
    Snapshot: Serialize,
    StepFn: FnMut(SimTick, &mut State),
    SnapFn: FnMut(SimTick, &State) -> Snapshot,
{
    let mut frames = Vec::with_capacity(config.ticks as usize + 1);

    let mut tick = SimTick::ZERO;
    frames.push(MicroWorldtestFrame {
        tick: tick.0,
        snapshot: snapshot(tick, &state),
    });

    for _ in 0..config.ticks {
        tick = tick.advance(1);
        step(tick, &mut state);
        frames.push(MicroWorldtestFrame {
            tick: tick.0,
            snapshot: snapshot(tick, &state),
        });
    }

    MicroWorldtestReport {
        name: config.name.clone(),
        frames,
    }
}

/// Build the state twice with `setup`, run both, and fail on the first frame
/// whose canonical snapshots differ. Returns the (shared) report on success.
pub fn assert_deterministic<State, Snapshot, SetupFn, StepFn, SnapFn>(
    config: &MicroWorldtestConfig,
    mut setup: SetupFn,
    mut step: StepFn,
    mut snapshot: SnapFn,
) -> Result<MicroWorldtestReport<Snapshot>>
where
    Snapshot: Serialize,
    SetupFn: FnMut() -> State,
    StepFn: FnMut(SimTick, &mut State),
    SnapFn: FnMut(SimTick, &State) -> Snapshot,
{
    let first = run_micro_worldtest(config, setup(), &mut step, &mut snapshot);
    let second = run_micro_worldtest(config, setup(), &mut step, &mut snapshot);
    assert_json_eq(&first, &second)
        .with_context(|| format!("Micro-worldtest '{}' is not deterministic", config.name))?;
    Ok(first)
}
