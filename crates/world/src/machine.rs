//! Item transfer primitives shared by every machine kind.
//!
//! Transfers are check-then-act: callers test [`can_insert_into`] before calling
//! [`insert_item_into`], and only extract from a source once the destination is
//! known to accept the item. Nothing is rolled back, so nothing may be lost.

use ironworks_core::{assembler_recipe, smelt_recipe, ItemKind, SimTick};

use crate::entity::{
    BeltItem, Entity, EntityPayload, HeldItem, ASSEMBLER_INPUT_CAPACITY, CHEST_CAPACITY,
    CONVEYOR_CAPACITY, FURNACE_INPUT_CAPACITY,
};

/// How many crafts' worth of each ingredient an assembler will buffer.
const ASSEMBLER_BUFFERED_CRAFTS: u32 = 2;

/// True if `target` has room for `item` and accepts its kind.
pub fn can_insert_into(target: &Entity, item: ItemKind) -> bool {
    match &target.payload {
        EntityPayload::Player(_) | EntityPayload::Miner(_) => false,
        EntityPayload::Conveyor(state) => state.items.len() < CONVEYOR_CAPACITY,
        EntityPayload::Chest(state) => state.items.len() < CHEST_CAPACITY,
        EntityPayload::Inserter(state) => state.held.is_none(),
        EntityPayload::Furnace(state) => {
            smelt_recipe(item).is_some() && state.input.len() < FURNACE_INPUT_CAPACITY
        }
        EntityPayload::Assembler(state) => {
            let Some(recipe) = state.recipe.and_then(assembler_recipe) else {
                return false;
            };
            let required = recipe.required(item);
            required > 0
                && state.count_input(item) < required * ASSEMBLER_BUFFERED_CRAFTS
                && state.input.len() < ASSEMBLER_INPUT_CAPACITY
        }
    }
}

/// Append `item` to the target's input. Returns false, changing nothing, when the
/// target has no room; callers are expected to have checked first.
pub fn insert_item_into(target: &mut Entity, item: ItemKind, now: SimTick) -> bool {
    if !can_insert_into(target, item) {
        return false;
    }
    match &mut target.payload {
        EntityPayload::Conveyor(state) => state.items.push(BeltItem {
            kind: item,
            progress: 0.0,
            entered: now,
        }),
        EntityPayload::Chest(state) => state.items.push_back(item),
        EntityPayload::Inserter(state) => {
            state.held = Some(HeldItem {
                kind: item,
                progress: 0.0,
            })
        }
        EntityPayload::Furnace(state) => state.input.push_back(item),
        EntityPayload::Assembler(state) => state.input.push_back(item),
        EntityPayload::Player(_) | EntityPayload::Miner(_) => return false,
    }
    true
}

/// The item [`extract_item_from`] would return, without removing it.
pub fn peek_extractable(source: &Entity) -> Option<ItemKind> {
    match &source.payload {
        EntityPayload::Miner(state) => state.output,
        EntityPayload::Conveyor(state) => front_belt_index(&state.items).map(|i| state.items[i].kind),
        EntityPayload::Chest(state) => state.items.front().copied(),
        EntityPayload::Furnace(state) => state.output.front().copied(),
        EntityPayload::Assembler(state) => state.output.front().copied(),
        EntityPayload::Player(_) | EntityPayload::Inserter(_) => None,
    }
}

/// Remove one item from the source's output side.
pub fn extract_item_from(source: &mut Entity) -> Option<ItemKind> {
    match &mut source.payload {
        EntityPayload::Miner(state) => state.output.take(),
        EntityPayload::Conveyor(state) => {
            front_belt_index(&state.items).map(|i| state.items.remove(i).kind)
        }
        EntityPayload::Chest(state) => state.items.pop_front(),
        EntityPayload::Furnace(state) => state.output.pop_front(),
        EntityPayload::Assembler(state) => state.output.pop_front(),
        EntityPayload::Player(_) | EntityPayload::Inserter(_) => None,
    }
}

/// Most advanced item on a belt; the oldest wins ties.
fn front_belt_index(items: &[BeltItem]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, item) in items.iter().enumerate() {
        match best {
            Some(b) if items[b].progress >= item.progress => {}
            _ => best = Some(i),
        }
    }
    best
}
