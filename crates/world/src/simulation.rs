//! Per-tick machine state machines.
//!
//! One call to [`step`] advances every non-player entity exactly once, in
//! ascending id order. Each entity is lifted out of the table while it runs,
//! which leaves its neighbours freely borrowable; it goes back before the next
//! entity starts.

use ironworks_core::{assembler_recipe, smelt_recipe, EntityId, ItemKind, SimTick};
use tracing::{trace, warn};

use crate::dirty::DirtyTracker;
use crate::entity::{
    AssemblerState, ConveyorState, Entity, EntityPayload, FurnaceState, HeldItem, InserterState,
    Job, MinerState, ASSEMBLER_OUTPUT_CAPACITY, BLOCKED_PROGRESS, CONVEYOR_SPEED,
    FURNACE_OUTPUT_CAPACITY, INSERTER_SPEED, MINER_COOLDOWN_TICKS,
};
use crate::entity_table::EntityTable;
use crate::machine::{can_insert_into, extract_item_from, insert_item_into, peek_extractable};
use crate::storage::ChunkStorage;

/// Float slack when comparing accumulated progress against the transfer threshold.
const PROGRESS_EPSILON: f32 = 1e-4;

/// Outcome of one simulation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub visited: usize,
    /// Entities skipped because their state failed validation.
    pub skipped: Vec<EntityId>,
}

struct StepContext<'a> {
    entities: &'a mut EntityTable,
    storage: &'a ChunkStorage,
    dirty: &'a mut DirtyTracker,
    tick: SimTick,
}

impl StepContext<'_> {
    /// Hand `item` to the machine in `cell` if it has room.
    fn push_to(&mut self, cell: (i64, i64), item: ItemKind) -> bool {
        let Some(id) = self.entities.machine_at(cell) else {
            return false;
        };
        let Some(target) = self.entities.get_mut(id) else {
            return false;
        };
        if !can_insert_into(target, item) {
            return false;
        }
        let inserted = insert_item_into(target, item, self.tick);
        if inserted {
            self.dirty.mark_dirty(id);
        }
        inserted
    }

    /// Take one item from the machine in `source` if the machine in `dest` would accept it.
    fn pull_for(&mut self, source: (i64, i64), dest: (i64, i64)) -> Option<ItemKind> {
        let source_id = self.entities.machine_at(source)?;
        let dest_id = self.entities.machine_at(dest)?;
        let item = peek_extractable(self.entities.get(source_id)?)?;
        if !can_insert_into(self.entities.get(dest_id)?, item) {
            return None;
        }
        let taken = extract_item_from(self.entities.get_mut(source_id)?)?;
        self.dirty.mark_dirty(source_id);
        Some(taken)
    }
}

/// Advance every machine one tick.
///
/// Clears `dirty` first; on return it holds every entity whose state changed.
/// A machine whose state fails validation is logged and left untouched.
pub fn step(
    entities: &mut EntityTable,
    storage: &ChunkStorage,
    dirty: &mut DirtyTracker,
    tick: SimTick,
) -> StepReport {
    dirty.clear();
    let mut report = StepReport::default();
    let mut ctx = StepContext {
        entities,
        storage,
        dirty,
        tick,
    };

    for id in ctx.entities.machine_ids() {
        let Some(mut entity) = ctx.entities.take(id) else {
            continue;
        };
        report.visited += 1;

        if let Err(err) = entity.validate() {
            warn!(entity = id, tick = tick.0, %err, "skipping malformed machine");
            report.skipped.push(id);
            ctx.entities.restore(entity);
            continue;
        }

        let before = entity.payload.clone();
        update_entity(&mut entity, &mut ctx);
        if entity.payload != before {
            ctx.dirty.mark_dirty(id);
        }
        ctx.entities.restore(entity);
    }

    report
}

fn update_entity(entity: &mut Entity, ctx: &mut StepContext<'_>) {
    let cell = entity.cell();
    let ahead = entity.ahead();
    let behind = entity.behind();
    match &mut entity.payload {
        EntityPayload::Miner(state) => update_miner(state, cell, ahead, ctx),
        EntityPayload::Conveyor(state) => update_conveyor(state, ahead, ctx),
        EntityPayload::Inserter(state) => update_inserter(state, behind, ahead, ctx),
        EntityPayload::Furnace(state) => update_furnace(state, ahead, ctx),
        EntityPayload::Assembler(state) => update_assembler(state, ahead, ctx),
        // Chests are passive storage.
        EntityPayload::Chest(_) | EntityPayload::Player(_) => {}
    }
}

fn update_miner(
    state: &mut MinerState,
    cell: (i64, i64),
    ahead: (i64, i64),
    ctx: &mut StepContext<'_>,
) {
    state.cooldown = state.cooldown.saturating_sub(1);

    if let Some(item) = state.output {
        if ctx.push_to(ahead, item) {
            state.output = None;
        }
    }

    if state.cooldown == 0 && state.output.is_none() {
        let resource = ctx
            .storage
            .tile_at(cell.0, cell.1)
            .and_then(|tile| tile.resource());
        if let Some(resource) = resource {
            trace!(tick = ctx.tick.0, item = %resource, "miner extracted");
            state.output = Some(resource);
            state.cooldown = MINER_COOLDOWN_TICKS;
        }
    }
}

fn update_conveyor(state: &mut ConveyorState, ahead: (i64, i64), ctx: &mut StepContext<'_>) {
    let tick = ctx.tick;
    state.items.retain_mut(|item| {
        // Arrived this tick: first move happens next tick.
        if item.entered >= tick {
            return true;
        }
        item.progress = (item.progress + CONVEYOR_SPEED).min(1.0);
        if item.progress + PROGRESS_EPSILON < 1.0 {
            return true;
        }
        if ctx.push_to(ahead, item.kind) {
            return false;
        }
        item.progress = BLOCKED_PROGRESS;
        true
    });
}

fn update_inserter(
    state: &mut InserterState,
    behind: (i64, i64),
    ahead: (i64, i64),
    ctx: &mut StepContext<'_>,
) {
    match state.held {
        Some(mut held) => {
            if held.progress + PROGRESS_EPSILON < 1.0 {
                held.progress = (held.progress + INSERTER_SPEED).min(1.0);
            }
            if held.progress + PROGRESS_EPSILON >= 1.0 {
                held.progress = 1.0;
                if ctx.push_to(ahead, held.kind) {
                    state.held = None;
                    return;
                }
            }
            state.held = Some(held);
        }
        None => {
            if let Some(kind) = ctx.pull_for(behind, ahead) {
                state.held = Some(HeldItem {
                    kind,
                    progress: 0.0,
                });
            }
        }
    }
}

fn update_furnace(state: &mut FurnaceState, ahead: (i64, i64), ctx: &mut StepContext<'_>) {
    if let Some(job) = state.smelting.as_mut() {
        job.remaining = job.remaining.saturating_sub(1);
        if job.remaining == 0 && state.output.len() < FURNACE_OUTPUT_CAPACITY {
            state.output.push_back(job.output);
            state.smelting = None;
        }
    }

    if state.smelting.is_none() {
        let recipe = state.input.front().copied().and_then(smelt_recipe);
        if let Some(recipe) = recipe {
            state.input.pop_front();
            state.smelting = Some(Job {
                output: recipe.output,
                count: 1,
                remaining: recipe.ticks,
            });
        }
    }

    if let Some(item) = state.output.front().copied() {
        if ctx.push_to(ahead, item) {
            state.output.pop_front();
        }
    }
}

fn update_assembler(state: &mut AssemblerState, ahead: (i64, i64), ctx: &mut StepContext<'_>) {
    if let Some(job) = state.crafting.as_mut() {
        job.remaining = job.remaining.saturating_sub(1);
        if job.remaining == 0
            && state.output.len() + job.count as usize <= ASSEMBLER_OUTPUT_CAPACITY
        {
            for _ in 0..job.count {
                state.output.push_back(job.output);
            }
            state.crafting = None;
        }
    }

    if state.crafting.is_none() {
        if let Some(recipe) = state.recipe.and_then(assembler_recipe) {
            let available: Vec<(ItemKind, u32)> = recipe
                .ingredients
                .iter()
                .map(|(kind, _)| (*kind, state.count_input(*kind)))
                .collect();
            if recipe.can_craft(&available) {
                for &(kind, count) in recipe.ingredients {
                    let mut left = count;
                    state.input.retain(|k| {
                        if *k == kind && left > 0 {
                            left -= 1;
                            false
                        } else {
                            true
                        }
                    });
                }
                state.crafting = Some(Job {
                    output: recipe.result,
                    count: recipe.output_count,
                    remaining: recipe.ticks,
                });
            }
        }
    }

    if let Some(item) = state.output.front().copied() {
        if ctx.push_to(ahead, item) {
            state.output.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityKind, CHEST_CAPACITY};
    use crate::tile::TileType;
    use crate::chunk::ChunkPos;
    use ironworks_core::Direction;

    struct Rig {
        entities: EntityTable,
        storage: ChunkStorage,
        dirty: DirtyTracker,
        tick: SimTick,
        next_id: EntityId,
    }

    impl Rig {
        fn new() -> Self {
            let mut storage = ChunkStorage::new(1, 16);
            let chunk = storage.get_or_generate(ChunkPos::new(0, 0));
            for y in 0..32 {
                for x in 0..32 {
                    chunk.set_tile(x, y, TileType::Grass);
                }
            }
            Self {
                entities: EntityTable::new(),
                storage,
                dirty: DirtyTracker::new(),
                tick: SimTick::ZERO,
                next_id: 1,
            }
        }

        fn place(&mut self, kind: EntityKind, x: i64, y: i64, dir: Direction) -> EntityId {
            let id = self.next_id;
            self.next_id += 1;
            self.entities
                .add(Entity::machine(id, kind, x, y, dir).unwrap())
                .unwrap();
            id
        }

        fn step(&mut self) -> StepReport {
            self.tick = self.tick.advance(1);
            step(&mut self.entities, &self.storage, &mut self.dirty, self.tick)
        }

        fn feed(&mut self, id: EntityId, item: ItemKind) {
            let tick = self.tick;
            assert!(insert_item_into(self.entities.get_mut(id).unwrap(), item, tick));
        }

        fn belt(&self, id: EntityId) -> &ConveyorState {
            match &self.entities.get(id).unwrap().payload {
                EntityPayload::Conveyor(state) => state,
                other => panic!("not a conveyor: {other:?}"),
            }
        }
    }

    #[test]
    fn conveyor_hands_item_to_next_belt_after_twenty_ticks() {
        let mut rig = Rig::new();
        let a = rig.place(EntityKind::Conveyor, 0, 0, Direction::East);
        let b = rig.place(EntityKind::Conveyor, 1, 0, Direction::East);
        rig.feed(a, ItemKind::Coal);

        for _ in 0..19 {
            rig.step();
        }
        assert_eq!(rig.belt(a).items.len(), 1);
        rig.step();
        assert!(rig.belt(a).items.is_empty());
        assert_eq!(rig.belt(b).items.len(), 1);
        assert_eq!(rig.belt(b).items[0].progress, 0.0);
        assert!(rig.dirty.is_dirty(a) && rig.dirty.is_dirty(b));
    }

    #[test]
    fn item_moves_one_hop_per_tick_regardless_of_order() {
        // Downstream belt has the higher id, so it is visited after the hand-off.
        let mut rig = Rig::new();
        let a = rig.place(EntityKind::Conveyor, 0, 0, Direction::East);
        let b = rig.place(EntityKind::Conveyor, 1, 0, Direction::East);
        let c = rig.place(EntityKind::Conveyor, 2, 0, Direction::East);
        rig.feed(a, ItemKind::Coal);
        for _ in 0..20 {
            rig.step();
        }
        assert_eq!(rig.belt(b).items[0].progress, 0.0);
        rig.step();
        assert!((rig.belt(b).items[0].progress - CONVEYOR_SPEED).abs() < 1e-6);
        assert!(rig.belt(c).items.is_empty());
    }

    #[test]
    fn blocked_conveyor_holds_at_threshold() {
        let mut rig = Rig::new();
        let a = rig.place(EntityKind::Conveyor, 0, 0, Direction::East);
        rig.feed(a, ItemKind::IronOre);
        for _ in 0..200 {
            rig.step();
            let items = &rig.belt(a).items;
            assert_eq!(items.len(), 1);
            assert!(items[0].progress <= BLOCKED_PROGRESS);
        }
    }

    #[test]
    fn inserter_moves_chest_to_chest() {
        let mut rig = Rig::new();
        let src = rig.place(EntityKind::Chest, 0, 0, Direction::North);
        let ins = rig.place(EntityKind::Inserter, 1, 0, Direction::East);
        let dst = rig.place(EntityKind::Chest, 2, 0, Direction::North);
        rig.feed(src, ItemKind::Coal);
        rig.feed(src, ItemKind::IronOre);

        rig.step();
        assert_eq!(rig.entities.get(src).unwrap().item_count(), 1);
        assert_eq!(rig.entities.get(ins).unwrap().item_count(), 1);

        for _ in 0..20 {
            rig.step();
        }
        assert_eq!(rig.entities.get(dst).unwrap().item_count(), 1);
        assert_eq!(rig.entities.get(ins).unwrap().item_count(), 0);
        match &rig.entities.get(dst).unwrap().payload {
            EntityPayload::Chest(state) => assert_eq!(state.items[0], ItemKind::Coal),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn inserter_stalls_without_losing_item() {
        let mut rig = Rig::new();
        let ins = rig.place(EntityKind::Inserter, 1, 0, Direction::East);
        let dst = rig.place(EntityKind::Chest, 2, 0, Direction::North);
        for _ in 0..CHEST_CAPACITY {
            rig.feed(dst, ItemKind::Coal);
        }
        if let EntityPayload::Inserter(state) = &mut rig.entities.get_mut(ins).unwrap().payload {
            state.held = Some(HeldItem {
                kind: ItemKind::IronOre,
                progress: 0.5,
            });
        }
        for _ in 0..100 {
            rig.step();
        }
        assert_eq!(rig.entities.get(dst).unwrap().item_count(), CHEST_CAPACITY);
        match &rig.entities.get(ins).unwrap().payload {
            EntityPayload::Inserter(state) => {
                let held = state.held.expect("inserter keeps its item");
                assert_eq!(held.kind, ItemKind::IronOre);
                assert_eq!(held.progress, 1.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn inserter_waits_for_destination_room() {
        let mut rig = Rig::new();
        let src = rig.place(EntityKind::Chest, 0, 0, Direction::North);
        let ins = rig.place(EntityKind::Inserter, 1, 0, Direction::East);
        let furnace = rig.place(EntityKind::Furnace, 2, 0, Direction::East);
        rig.feed(src, ItemKind::IronPlate);
        rig.step();
        // Furnace rejects plates, so the inserter never picks it up.
        assert_eq!(rig.entities.get(ins).unwrap().item_count(), 0);
        assert_eq!(rig.entities.get(src).unwrap().item_count(), 1);
        assert_eq!(rig.entities.get(furnace).unwrap().item_count(), 0);
    }

    #[test]
    fn furnace_smelts_after_recipe_time() {
        let mut rig = Rig::new();
        let furnace = rig.place(EntityKind::Furnace, 0, 0, Direction::East);
        rig.feed(furnace, ItemKind::Coal);
        rig.step();
        for _ in 0..59 {
            rig.step();
        }
        match &rig.entities.get(furnace).unwrap().payload {
            EntityPayload::Furnace(state) => {
                assert!(state.output.is_empty());
                assert_eq!(state.smelting.map(|j| j.remaining), Some(1));
            }
            other => panic!("unexpected {other:?}"),
        }
        rig.step();
        match &rig.entities.get(furnace).unwrap().payload {
            EntityPayload::Furnace(state) => {
                assert_eq!(state.output.iter().copied().collect::<Vec<_>>(), vec![ItemKind::Carbon]);
                assert!(state.smelting.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn miner_without_resource_stays_idle() {
        let mut rig = Rig::new();
        let miner = rig.place(EntityKind::Miner, 0, 0, Direction::East);
        for _ in 0..120 {
            rig.step();
        }
        match &rig.entities.get(miner).unwrap().payload {
            EntityPayload::Miner(state) => {
                assert_eq!(state.output, None);
                assert_eq!(state.cooldown, 0);
            }
            other => panic!("unexpected {other:?}"),
        }
        // Nothing changes once idle.
        rig.step();
        assert!(!rig.dirty.is_dirty(miner));
    }

    #[test]
    fn malformed_machine_is_skipped_not_fatal() {
        let mut rig = Rig::new();
        let bad = rig.place(EntityKind::Inserter, 5, 5, Direction::East);
        let good = rig.place(EntityKind::Conveyor, 0, 0, Direction::East);
        rig.feed(good, ItemKind::Coal);
        if let EntityPayload::Inserter(state) = &mut rig.entities.get_mut(bad).unwrap().payload {
            state.held = Some(HeldItem {
                kind: ItemKind::Coal,
                progress: f32::INFINITY,
            });
        }
        let report = rig.step();
        assert_eq!(report.skipped, vec![bad]);
        assert_eq!(report.visited, 2);
        assert!(rig.entities.contains(bad));
        assert!(rig.belt(good).items[0].progress > 0.0);
        assert!(!rig.dirty.is_dirty(bad));
    }

    #[test]
    fn unchanged_entities_are_not_dirty() {
        let mut rig = Rig::new();
        let chest = rig.place(EntityKind::Chest, 0, 0, Direction::North);
        rig.feed(chest, ItemKind::Coal);
        rig.step();
        assert!(rig.dirty.is_empty());
    }
}
