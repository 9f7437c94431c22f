#![warn(missing_docs)]
//! Core primitives shared across the workspace.

pub mod crafting;
pub mod item;

use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Re-export commonly used types
pub use crafting::{
    assembler_recipe, smelt_recipe, AssemblerRecipe, SmeltRecipe, ASSEMBLER_RECIPES,
    SMELT_RECIPES,
};
pub use item::ItemKind;

/// Process-wide unique entity identifier. Assigned monotonically, never reused.
pub type EntityId = u64;

/// Simulation steps per second of world time.
pub const TICKS_PER_SECOND: u64 = 60;

/// Fixed tick type (60 TPS => ~16.7 ms per tick).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct SimTick(pub u64);

impl SimTick {
    /// First tick in any deterministic timeline.
    pub const ZERO: Self = Self(0);

    /// Advance by `delta` ticks.
    pub fn advance(self, delta: u64) -> Self {
        Self(self.0 + delta)
    }

    /// Simulated seconds elapsed at this tick.
    pub fn seconds(self) -> f64 {
        self.0 as f64 / TICKS_PER_SECOND as f64
    }
}

/// Raised when a wire or save value does not name a known enumerated value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown {kind} id {value}")]
pub struct UnknownId {
    /// Which enumeration was being decoded.
    pub kind: &'static str,
    /// Offending raw value.
    pub value: u8,
}

/// Cardinal facing of an entity. The numeric ids are part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum Direction {
    /// Towards negative y.
    #[default]
    North = 0,
    /// Towards positive x.
    East = 1,
    /// Towards positive y.
    South = 2,
    /// Towards negative x.
    West = 3,
}

impl Direction {
    /// All directions in id order.
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    /// Unit tile offset for this facing.
    pub const fn delta(self) -> (i64, i64) {
        match self {
            Direction::North => (0, -1),
            Direction::East => (1, 0),
            Direction::South => (0, 1),
            Direction::West => (-1, 0),
        }
    }

    /// The facing pointing the other way.
    pub const fn opposite(self) -> Self {
        match self {
            Direction::North => Direction::South,
            Direction::East => Direction::West,
            Direction::South => Direction::North,
            Direction::West => Direction::East,
        }
    }
}

impl From<Direction> for u8 {
    fn from(direction: Direction) -> Self {
        direction as u8
    }
}

impl TryFrom<u8> for Direction {
    type Error = UnknownId;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Direction::ALL
            .get(value as usize)
            .copied()
            .ok_or(UnknownId {
                kind: "direction",
                value,
            })
    }
}

/// Derive the chunk-local generation seed from the world seed and a chunk coordinate.
///
/// A 64-bit avalanche mix: neighbouring chunks get uncorrelated streams and the
/// result depends on nothing but the three inputs.
pub fn chunk_seed(world_seed: u64, cx: i32, cy: i32) -> u64 {
    let mut h = world_seed ^ 0x9E37_79B9_7F4A_7C15;
    h = mix64(h ^ (cx as u32 as u64));
    h = mix64(h ^ ((cy as u32 as u64) << 32));
    mix64(h)
}

fn mix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Helper to derive a reproducible RNG scoped to one chunk of one world.
pub fn scoped_rng(world_seed: u64, cx: i32, cy: i32) -> StdRng {
    StdRng::seed_from_u64(chunk_seed(world_seed, cx, cy))
}
