//! Item kinds moved around by machines.

use serde::{Deserialize, Serialize};

/// Every item that can sit in a machine queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// Mined from iron ore tiles.
    IronOre,
    /// Mined from copper ore tiles.
    CopperOre,
    /// Mined from coal tiles.
    Coal,
    /// Mined from gold ore tiles.
    GoldOre,
    /// Mined from diamond ore tiles.
    Diamond,
    /// Mined from bauxite tiles.
    Bauxite,
    /// Mined from tin ore tiles.
    TinOre,
    /// Mined from uranium ore tiles.
    UraniumOre,
    /// Smelted iron.
    IronPlate,
    /// Smelted copper.
    CopperPlate,
    /// Smelted coal.
    Carbon,
    /// Assembled from copper plates.
    CopperWire,
    /// Assembled from iron plates.
    IronGear,
    /// Assembled from iron plate and copper wire.
    Circuit,
    /// Assembled from a gear and a circuit.
    AutomationScience,
}

impl ItemKind {
    /// All item kinds in declaration order.
    pub const ALL: [ItemKind; 15] = [
        ItemKind::IronOre,
        ItemKind::CopperOre,
        ItemKind::Coal,
        ItemKind::GoldOre,
        ItemKind::Diamond,
        ItemKind::Bauxite,
        ItemKind::TinOre,
        ItemKind::UraniumOre,
        ItemKind::IronPlate,
        ItemKind::CopperPlate,
        ItemKind::Carbon,
        ItemKind::CopperWire,
        ItemKind::IronGear,
        ItemKind::Circuit,
        ItemKind::AutomationScience,
    ];

    /// Stable snake_case name used in logs and snapshots.
    pub const fn name(self) -> &'static str {
        match self {
            ItemKind::IronOre => "iron_ore",
            ItemKind::CopperOre => "copper_ore",
            ItemKind::Coal => "coal",
            ItemKind::GoldOre => "gold_ore",
            ItemKind::Diamond => "diamond",
            ItemKind::Bauxite => "bauxite",
            ItemKind::TinOre => "tin_ore",
            ItemKind::UraniumOre => "uranium_ore",
            ItemKind::IronPlate => "iron_plate",
            ItemKind::CopperPlate => "copper_plate",
            ItemKind::Carbon => "carbon",
            ItemKind::CopperWire => "copper_wire",
            ItemKind::IronGear => "iron_gear",
            ItemKind::Circuit => "circuit",
            ItemKind::AutomationScience => "automation_science",
        }
    }

    /// Look an item up by its snake_case name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.name() == name)
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
