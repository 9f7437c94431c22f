//! Fixed-timestep accumulator for the simulation loop.

use std::time::Duration;

use tracing::warn;

/// Converts real elapsed time into a whole number of fixed simulation steps.
///
/// Leftover time carries into the next pass. If the host falls further behind
/// than `max_catch_up` steps, the excess backlog is dropped so the loop can
/// recover instead of spiralling.
#[derive(Debug, Clone)]
pub struct FixedTimestep {
    step: Duration,
    accumulator: Duration,
    max_catch_up: u32,
}

impl FixedTimestep {
    /// Step length for `tick_rate` steps per second.
    pub fn new(tick_rate: u32, max_catch_up: u32) -> Self {
        let step = Duration::from_secs(1) / tick_rate.max(1);
        Self {
            step,
            accumulator: Duration::ZERO,
            max_catch_up: max_catch_up.max(1),
        }
    }

    /// Length of one simulation step.
    pub fn step(&self) -> Duration {
        self.step
    }

    /// Add elapsed real time; returns how many steps to run now.
    pub fn accumulate(&mut self, elapsed: Duration) -> u32 {
        self.accumulator += elapsed;
        let mut steps = 0;
        while self.accumulator >= self.step && steps < self.max_catch_up {
            self.accumulator -= self.step;
            steps += 1;
        }
        if self.accumulator >= self.step {
            let dropped = self.accumulator.as_nanos() / self.step.as_nanos().max(1);
            warn!(dropped_steps = dropped as u64, "simulation fell behind; dropping backlog");
            self.accumulator = Duration::ZERO;
        }
        steps
    }

    /// Time until the next step is due.
    pub fn until_next(&self) -> Duration {
        self.step.saturating_sub(self.accumulator)
    }
}
