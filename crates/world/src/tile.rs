//! Ground tile types.

use ironworks_core::{ItemKind, UnknownId};
use serde::{Deserialize, Serialize};

/// Tile type occupying one cell of a chunk grid.
///
/// The numeric ids are shared by the wire format and save files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum TileType {
    /// Outside the playable world.
    Void = 0,
    /// Default ground.
    #[default]
    Grass = 1,
    /// Bare ground.
    Dirt = 2,
    /// Rocky ground.
    Stone = 3,
    /// Impassable for building.
    Water = 4,
    /// Yields iron ore.
    IronOre = 5,
    /// Yields copper ore.
    CopperOre = 6,
    /// Yields gold ore.
    GoldOre = 7,
    /// Yields diamonds.
    DiamondOre = 8,
    /// Yields bauxite.
    BauxiteOre = 9,
    /// Yields tin ore.
    TinOre = 10,
    /// Yields uranium ore.
    UraniumOre = 11,
    /// Yields coal.
    Coal = 12,
}

impl TileType {
    /// All tile types in id order.
    pub const ALL: [TileType; 13] = [
        TileType::Void,
        TileType::Grass,
        TileType::Dirt,
        TileType::Stone,
        TileType::Water,
        TileType::IronOre,
        TileType::CopperOre,
        TileType::GoldOre,
        TileType::DiamondOre,
        TileType::BauxiteOre,
        TileType::TinOre,
        TileType::UraniumOre,
        TileType::Coal,
    ];

    /// Extractable resource under this tile, if any.
    pub const fn resource(self) -> Option<ItemKind> {
        match self {
            TileType::IronOre => Some(ItemKind::IronOre),
            TileType::CopperOre => Some(ItemKind::CopperOre),
            TileType::GoldOre => Some(ItemKind::GoldOre),
            TileType::DiamondOre => Some(ItemKind::Diamond),
            TileType::BauxiteOre => Some(ItemKind::Bauxite),
            TileType::TinOre => Some(ItemKind::TinOre),
            TileType::UraniumOre => Some(ItemKind::UraniumOre),
            TileType::Coal => Some(ItemKind::Coal),
            TileType::Void
            | TileType::Grass
            | TileType::Dirt
            | TileType::Stone
            | TileType::Water => None,
        }
    }

    /// Plain ground suitable for heavy machines.
    pub const fn is_solid_ground(self) -> bool {
        matches!(self, TileType::Grass | TileType::Dirt | TileType::Stone)
    }

    /// Nothing can be placed on these tiles.
    pub const fn is_unbuildable(self) -> bool {
        matches!(self, TileType::Water | TileType::Void)
    }
}

impl From<TileType> for u8 {
    fn from(tile: TileType) -> Self {
        tile as u8
    }
}

impl TryFrom<u8> for TileType {
    type Error = UnknownId;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        TileType::ALL
            .get(value as usize)
            .copied()
            .ok_or(UnknownId { kind: "tile", value })
    }
}
