//! Entities and their per-kind state.
//!
//! Each machine kind carries its own state struct holding only the fields its
//! update rule touches; [`EntityPayload`] is the tagged union over them.

use std::collections::VecDeque;

use ironworks_core::{assembler_recipe, EntityId, ItemKind, SimTick, UnknownId};
use serde::{Deserialize, Serialize};

use crate::chunk::{cell_of, world_to_chunk, ChunkPos};
use crate::error::MachineError;
use ironworks_core::Direction;

/// Items a conveyor carries at once.
pub const CONVEYOR_CAPACITY: usize = 3;
/// Single-slot miner output.
pub const MINER_OUTPUT_CAPACITY: usize = 1;
/// Furnace input queue bound.
pub const FURNACE_INPUT_CAPACITY: usize = 10;
/// Furnace output queue bound.
pub const FURNACE_OUTPUT_CAPACITY: usize = 10;
/// Assembler input queue bound (all ingredients together).
pub const ASSEMBLER_INPUT_CAPACITY: usize = 10;
/// Assembler output queue bound.
pub const ASSEMBLER_OUTPUT_CAPACITY: usize = 10;
/// Chest slot count.
pub const CHEST_CAPACITY: usize = 50;
/// Inserter hand size.
pub const INSERTER_CAPACITY: usize = 1;

/// Conveyor progress per tick.
pub const CONVEYOR_SPEED: f32 = 0.05;
/// Inserter swing progress per tick.
pub const INSERTER_SPEED: f32 = 0.05;
/// Progress a blocked conveyor item is held at.
pub const BLOCKED_PROGRESS: f32 = 0.99;
/// Ticks between two miner extractions (one second).
pub const MINER_COOLDOWN_TICKS: u32 = 60;

/// Entity type tag. The numeric ids are part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum EntityKind {
    Player = 0,
    Conveyor = 1,
    Miner = 2,
    Furnace = 3,
    Assembler = 4,
    Chest = 5,
    Inserter = 6,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Player,
        EntityKind::Conveyor,
        EntityKind::Miner,
        EntityKind::Furnace,
        EntityKind::Assembler,
        EntityKind::Chest,
        EntityKind::Inserter,
    ];

    pub const fn is_machine(self) -> bool {
        !matches!(self, EntityKind::Player)
    }
}

impl From<EntityKind> for u8 {
    fn from(kind: EntityKind) -> Self {
        kind as u8
    }
}

impl TryFrom<u8> for EntityKind {
    type Error = UnknownId;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        EntityKind::ALL
            .get(value as usize)
            .copied()
            .ok_or(UnknownId {
                kind: "entity kind",
                value,
            })
    }
}

/// An item riding a conveyor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeltItem {
    pub kind: ItemKind,
    /// Transfer progress in `[0, 1]`.
    pub progress: f32,
    /// Tick the item entered this belt; it does not move until the next tick.
    pub entered: SimTick,
}

/// An item in an inserter's hand.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeldItem {
    pub kind: ItemKind,
    pub progress: f32,
}

/// A timed conversion inside a furnace or assembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// What completes the job.
    pub output: ItemKind,
    /// How many of `output` it yields.
    pub count: u32,
    /// Ticks left before the output is produced.
    pub remaining: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerState {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConveyorState {
    /// Oldest first.
    pub items: Vec<BeltItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinerState {
    pub cooldown: u32,
    pub output: Option<ItemKind>,
}

impl Default for MinerState {
    fn default() -> Self {
        Self {
            cooldown: MINER_COOLDOWN_TICKS,
            output: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FurnaceState {
    pub input: VecDeque<ItemKind>,
    pub output: VecDeque<ItemKind>,
    pub smelting: Option<Job>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblerState {
    /// Selected recipe, keyed by its result item.
    pub recipe: Option<ItemKind>,
    pub input: VecDeque<ItemKind>,
    pub output: VecDeque<ItemKind>,
    pub crafting: Option<Job>,
}

impl AssemblerState {
    pub fn count_input(&self, kind: ItemKind) -> u32 {
        self.input.iter().filter(|k| **k == kind).count() as u32
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChestState {
    /// Oldest first.
    pub items: VecDeque<ItemKind>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InserterState {
    pub held: Option<HeldItem>,
}

/// Type-specific mutable state of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntityPayload {
    Player(PlayerState),
    Conveyor(ConveyorState),
    Miner(MinerState),
    Furnace(FurnaceState),
    Assembler(AssemblerState),
    Chest(ChestState),
    Inserter(InserterState),
}

impl EntityPayload {
    /// Fresh state for a newly built machine; `None` for players.
    pub fn new_machine(kind: EntityKind) -> Option<Self> {
        Some(match kind {
            EntityKind::Player => return None,
            EntityKind::Conveyor => EntityPayload::Conveyor(ConveyorState::default()),
            EntityKind::Miner => EntityPayload::Miner(MinerState::default()),
            EntityKind::Furnace => EntityPayload::Furnace(FurnaceState::default()),
            EntityKind::Assembler => EntityPayload::Assembler(AssemblerState::default()),
            EntityKind::Chest => EntityPayload::Chest(ChestState::default()),
            EntityKind::Inserter => EntityPayload::Inserter(InserterState::default()),
        })
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            EntityPayload::Player(_) => EntityKind::Player,
            EntityPayload::Conveyor(_) => EntityKind::Conveyor,
            EntityPayload::Miner(_) => EntityKind::Miner,
            EntityPayload::Furnace(_) => EntityKind::Furnace,
            EntityPayload::Assembler(_) => EntityKind::Assembler,
            EntityPayload::Chest(_) => EntityKind::Chest,
            EntityPayload::Inserter(_) => EntityKind::Inserter,
        }
    }
}

/// A player or machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    x: f64,
    y: f64,
    pub direction: Direction,
    pub payload: EntityPayload,
}

impl Entity {
    pub fn new(id: EntityId, x: f64, y: f64, direction: Direction, payload: EntityPayload) -> Self {
        Self {
            id,
            x,
            y,
            direction,
            payload,
        }
    }

    /// A freshly built machine on tile cell `(x, y)`.
    pub fn machine(
        id: EntityId,
        kind: EntityKind,
        x: i64,
        y: i64,
        direction: Direction,
    ) -> Option<Self> {
        let payload = EntityPayload::new_machine(kind)?;
        Some(Self::new(id, x as f64, y as f64, direction, payload))
    }

    pub fn player(id: EntityId, name: impl Into<String>, x: f64, y: f64) -> Self {
        Self::new(
            id,
            x,
            y,
            Direction::South,
            EntityPayload::Player(PlayerState { name: name.into() }),
        )
    }

    pub fn kind(&self) -> EntityKind {
        self.payload.kind()
    }

    pub fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    /// Position change is only legal through the entity table, which re-buckets.
    pub(crate) fn set_position(&mut self, x: f64, y: f64) {
        self.x = x;
        self.y = y;
    }

    /// Tile cell the entity occupies.
    pub fn cell(&self) -> (i64, i64) {
        (cell_of(self.x), cell_of(self.y))
    }

    /// Cell one step along the facing direction.
    pub fn ahead(&self) -> (i64, i64) {
        let (x, y) = self.cell();
        let (dx, dy) = self.direction.delta();
        (x + dx, y + dy)
    }

    /// Cell one step against the facing direction.
    pub fn behind(&self) -> (i64, i64) {
        let (x, y) = self.cell();
        let (dx, dy) = self.direction.delta();
        (x - dx, y - dy)
    }

    pub fn chunk(&self) -> ChunkPos {
        world_to_chunk(self.x, self.y).0
    }

    pub fn player_name(&self) -> Option<&str> {
        match &self.payload {
            EntityPayload::Player(state) => Some(&state.name),
            _ => None,
        }
    }

    /// Number of item units the entity currently owns (in-flight jobs count as one).
    pub fn item_count(&self) -> usize {
        match &self.payload {
            EntityPayload::Player(_) => 0,
            EntityPayload::Conveyor(s) => s.items.len(),
            EntityPayload::Miner(s) => s.output.iter().count(),
            EntityPayload::Furnace(s) => {
                s.input.len() + s.output.len() + s.smelting.iter().count()
            }
            EntityPayload::Assembler(s) => s.input.len() + s.output.len(),
            EntityPayload::Chest(s) => s.items.len(),
            EntityPayload::Inserter(s) => s.held.iter().count(),
        }
    }

    /// Check the invariants the update rules rely on.
    pub fn validate(&self) -> Result<(), MachineError> {
        fn bound(queue: &'static str, len: usize, capacity: usize) -> Result<(), MachineError> {
            if len > capacity {
                return Err(MachineError::QueueOverCapacity {
                    queue,
                    len,
                    capacity,
                });
            }
            Ok(())
        }
        fn progress(value: f32) -> Result<(), MachineError> {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(MachineError::InvalidProgress(value));
            }
            Ok(())
        }

        match &self.payload {
            EntityPayload::Player(_) | EntityPayload::Miner(_) => Ok(()),
            EntityPayload::Conveyor(s) => {
                bound("conveyor", s.items.len(), CONVEYOR_CAPACITY)?;
                s.items.iter().try_for_each(|item| progress(item.progress))
            }
            EntityPayload::Furnace(s) => {
                bound("furnace input", s.input.len(), FURNACE_INPUT_CAPACITY)?;
                bound("furnace output", s.output.len(), FURNACE_OUTPUT_CAPACITY)
            }
            EntityPayload::Assembler(s) => {
                bound("assembler input", s.input.len(), ASSEMBLER_INPUT_CAPACITY)?;
                bound("assembler output", s.output.len(), ASSEMBLER_OUTPUT_CAPACITY)?;
                match s.recipe {
                    Some(result) if assembler_recipe(result).is_none() => {
                        Err(MachineError::UnknownRecipe(result))
                    }
                    _ => Ok(()),
                }
            }
            EntityPayload::Chest(s) => bound("chest", s.items.len(), CHEST_CAPACITY),
            EntityPayload::Inserter(s) => match s.held {
                Some(held) => progress(held.progress),
                None => Ok(()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_ids_are_stable() {
        for (id, kind) in EntityKind::ALL.iter().enumerate() {
            assert_eq!(u8::from(*kind), id as u8);
            assert_eq!(EntityKind::try_from(id as u8), Ok(*kind));
        }
        assert!(EntityKind::try_from(7).is_err());
    }

    #[test]
    fn new_miner_starts_cooling_down() {
        let miner = Entity::machine(1, EntityKind::Miner, 0, 0, Direction::East).unwrap();
        match miner.payload {
            EntityPayload::Miner(state) => assert_eq!(state.cooldown, MINER_COOLDOWN_TICKS),
            other => panic!("unexpected payload {other:?}"),
        }
        assert!(Entity::machine(2, EntityKind::Player, 0, 0, Direction::East).is_none());
    }

    #[test]
    fn ahead_and_behind_follow_direction() {
        let e = Entity::machine(1, EntityKind::Inserter, 5, -3, Direction::North).unwrap();
        assert_eq!(e.ahead(), (5, -4));
        assert_eq!(e.behind(), (5, -2));
        assert_eq!(e.chunk(), ChunkPos::new(0, -1));
    }

    #[test]
    fn validate_rejects_overfull_conveyor() {
        let mut e = Entity::machine(1, EntityKind::Conveyor, 0, 0, Direction::East).unwrap();
        if let EntityPayload::Conveyor(state) = &mut e.payload {
            for _ in 0..4 {
                state.items.push(BeltItem {
                    kind: ItemKind::Coal,
                    progress: 0.0,
                    entered: SimTick::ZERO,
                });
            }
        }
        assert!(matches!(
            e.validate(),
            Err(MachineError::QueueOverCapacity { .. })
        ));
    }

    #[test]
    fn validate_rejects_nan_progress() {
        let mut e = Entity::machine(1, EntityKind::Inserter, 0, 0, Direction::East).unwrap();
        e.payload = EntityPayload::Inserter(InserterState {
            held: Some(HeldItem {
                kind: ItemKind::Coal,
                progress: f32::NAN,
            }),
        });
        assert!(matches!(e.validate(), Err(MachineError::InvalidProgress(_))));
    }

    #[test]
    fn validate_rejects_unknown_recipe() {
        let mut e = Entity::machine(1, EntityKind::Assembler, 0, 0, Direction::East).unwrap();
        if let EntityPayload::Assembler(state) = &mut e.payload {
            state.recipe = Some(ItemKind::IronOre);
        }
        assert_eq!(
            e.validate(),
            Err(MachineError::UnknownRecipe(ItemKind::IronOre))
        );
    }
}
