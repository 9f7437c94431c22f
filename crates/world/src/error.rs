use ironworks_core::{EntityId, ItemKind};
use thiserror::Error;

use crate::entity::EntityKind;
use crate::tile::TileType;

/// Why a player action was rejected. Rejections never change world state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionError {
    #[error("entity {0} does not exist")]
    UnknownEntity(EntityId),
    #[error("entity id {0} is already registered")]
    DuplicateEntity(EntityId),
    #[error("cell ({x}, {y}) is already occupied by entity {occupant}")]
    CellOccupied { x: i64, y: i64, occupant: EntityId },
    #[error("{kind:?} cannot be placed on {tile:?}")]
    PlacementForbidden { kind: EntityKind, tile: TileType },
    #[error("target ({x}, {y}) is out of reach")]
    OutOfReach { x: i64, y: i64 },
    #[error("not authorised: {0}")]
    NotAuthorised(&'static str),
    #[error("no assembler recipe produces {0}")]
    UnknownRecipe(ItemKind),
    #[error("entity {0} cannot be configured")]
    NotConfigurable(EntityId),
    #[error("invalid position")]
    InvalidPosition,
}

/// Malformed machine state found while stepping an entity.
///
/// The offending entity is skipped for the tick; the rest of the world keeps running.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MachineError {
    #[error("{queue} holds {len} items, capacity is {capacity}")]
    QueueOverCapacity {
        queue: &'static str,
        len: usize,
        capacity: usize,
    },
    #[error("transfer progress {0} is not a finite value in [0, 1]")]
    InvalidProgress(f32),
    #[error("no assembler recipe produces {0}")]
    UnknownRecipe(ItemKind),
}
