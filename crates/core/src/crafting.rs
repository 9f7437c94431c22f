//! Static recipe tables for furnaces and assemblers.
//!
//! Both tables are read-only and shared by every machine. Assembler recipes are
//! keyed by their result item.

use crate::ItemKind;

/// A furnace relationship: one input item becomes one output item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmeltRecipe {
    /// Consumed item.
    pub input: ItemKind,
    /// Produced item.
    pub output: ItemKind,
    /// Processing time in ticks.
    pub ticks: u32,
}

/// All available smelting recipes.
pub const SMELT_RECIPES: &[SmeltRecipe] = &[
    SmeltRecipe {
        input: ItemKind::IronOre,
        output: ItemKind::IronPlate,
        ticks: 120,
    },
    SmeltRecipe {
        input: ItemKind::CopperOre,
        output: ItemKind::CopperPlate,
        ticks: 120,
    },
    SmeltRecipe {
        input: ItemKind::Coal,
        output: ItemKind::Carbon,
        ticks: 60,
    },
];

/// Get the smelting recipe consuming `input`.
pub fn smelt_recipe(input: ItemKind) -> Option<&'static SmeltRecipe> {
    SMELT_RECIPES.iter().find(|r| r.input == input)
}

/// An assembler recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblerRecipe {
    /// Item produced; also the key the recipe is selected by.
    pub result: ItemKind,
    /// Ingredient kinds and the quantity of each consumed per craft.
    pub ingredients: &'static [(ItemKind, u32)],
    /// Number of result items produced per craft.
    pub output_count: u32,
    /// Craft duration in ticks.
    pub ticks: u32,
}

impl AssemblerRecipe {
    /// Quantity of `item` one craft consumes (zero if not an ingredient).
    pub fn required(&self, item: ItemKind) -> u32 {
        self.ingredients
            .iter()
            .find(|(kind, _)| *kind == item)
            .map(|(_, count)| *count)
            .unwrap_or(0)
    }

    /// Check if the recipe can be crafted with the given available items
    pub fn can_craft(&self, available: &[(ItemKind, u32)]) -> bool {
        self.ingredients.iter().all(|(required_kind, required_count)| {
            available
                .iter()
                .find(|(avail_kind, _)| avail_kind == required_kind)
                .map(|(_, avail_count)| avail_count >= required_count)
                .unwrap_or(false)
        })
    }
}

/// All assembler recipes.
pub const ASSEMBLER_RECIPES: &[AssemblerRecipe] = &[
    AssemblerRecipe {
        result: ItemKind::IronGear,
        ingredients: &[(ItemKind::IronPlate, 2)],
        output_count: 1,
        ticks: 60,
    },
    AssemblerRecipe {
        result: ItemKind::CopperWire,
        ingredients: &[(ItemKind::CopperPlate, 1)],
        output_count: 2,
        ticks: 30,
    },
    AssemblerRecipe {
        result: ItemKind::Circuit,
        ingredients: &[(ItemKind::IronPlate, 1), (ItemKind::CopperWire, 3)],
        output_count: 1,
        ticks: 90,
    },
    AssemblerRecipe {
        result: ItemKind::AutomationScience,
        ingredients: &[(ItemKind::IronGear, 1), (ItemKind::Circuit, 1)],
        output_count: 1,
        ticks: 120,
    },
];

/// Get the assembler recipe producing `result`.
pub fn assembler_recipe(result: ItemKind) -> Option<&'static AssemblerRecipe> {
    ASSEMBLER_RECIPES.iter().find(|r| r.result == result)
}
