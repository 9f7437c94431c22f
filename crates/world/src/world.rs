//! The world context: chunk store, entity table, simulation and persistence
//! tied together behind one owner.
//!
//! A `World` is built once per process, mutated only by the simulation thread,
//! and flushed to its persistence gateway on shutdown.

use std::collections::BTreeSet;

use anyhow::Result;
use ironworks_core::{assembler_recipe, Direction, EntityId, ItemKind, SimTick};
use tracing::{debug, info, instrument, warn};

use crate::chunk::{cell_to_chunk, ChunkPos, DirtyFlags};
use crate::dirty::DirtyTracker;
use crate::entity::{Entity, EntityKind, EntityPayload};
use crate::entity_table::EntityTable;
use crate::error::ActionError;
use crate::persist::{ChunkPersistence, ChunkRecord, PlayerRecord, WorldMeta};
use crate::simulation::{self, StepReport};
use crate::storage::ChunkStorage;
use crate::tile::TileType;

/// How far (in tiles) from a player a build, destroy or configure may land.
pub const MAX_BUILD_REACH: f64 = 16.0;

/// Largest absolute coordinate a player may move to.
pub const WORLD_LIMIT: f64 = 1.0e7;

/// A validated request from a player to change the world.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerAction {
    Build {
        kind: EntityKind,
        x: i64,
        y: i64,
        direction: Direction,
    },
    Destroy {
        entity_id: EntityId,
    },
    Configure {
        entity_id: EntityId,
        recipe: Option<ItemKind>,
    },
}

/// Entity-level consequence of an applied action, for broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorldEvent {
    Added(EntityId),
    Removed { id: EntityId, chunk: ChunkPos },
    Updated(EntityId),
}

/// Result of one world tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub tick: SimTick,
    /// Entities mutated this tick that still exist.
    pub updated: BTreeSet<EntityId>,
    pub step: StepReport,
}

/// Outcome of a save pass. Failed chunks stay dirty and are retried next time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub saved: usize,
    pub failed: usize,
}

pub struct World {
    seed: u64,
    tick: SimTick,
    next_entity_id: EntityId,
    storage: ChunkStorage,
    entities: EntityTable,
    dirty: DirtyTracker,
    persistence: Box<dyn ChunkPersistence>,
}

impl World {
    /// Fresh world with nothing saved yet.
    pub fn new(seed: u64, max_resident_chunks: usize, persistence: Box<dyn ChunkPersistence>) -> Self {
        Self {
            seed,
            tick: SimTick::ZERO,
            next_entity_id: 1,
            storage: ChunkStorage::new(seed, max_resident_chunks),
            entities: EntityTable::new(),
            dirty: DirtyTracker::new(),
            persistence,
        }
    }

    /// Resume the saved world if there is one, otherwise start a new one from `default_seed`.
    pub fn open(
        default_seed: u64,
        max_resident_chunks: usize,
        persistence: Box<dyn ChunkPersistence>,
    ) -> Result<Self> {
        match persistence.load_meta()? {
            Some(meta) => {
                info!(seed = meta.seed, tick = meta.tick.0, "resuming saved world");
                let mut world = Self::new(meta.seed, max_resident_chunks, persistence);
                world.tick = meta.tick;
                world.next_entity_id = meta.next_entity_id.max(1);
                Ok(world)
            }
            None => {
                info!(seed = default_seed, "creating new world");
                Ok(Self::new(default_seed, max_resident_chunks, persistence))
            }
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn tick(&self) -> SimTick {
        self.tick
    }

    pub fn meta(&self) -> WorldMeta {
        WorldMeta {
            seed: self.seed,
            tick: self.tick,
            next_entity_id: self.next_entity_id,
        }
    }

    pub fn entities(&self) -> &EntityTable {
        &self.entities
    }

    /// Direct table access for payload edits (tests, tooling). Marks nothing dirty.
    pub fn entities_mut(&mut self) -> &mut EntityTable {
        &mut self.entities
    }

    pub fn storage(&self) -> &ChunkStorage {
        &self.storage
    }

    fn allocate_id(&mut self) -> EntityId {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        id
    }

    /// Make a chunk resident: loaded from persistence if saved, generated otherwise.
    ///
    /// A chunk whose save cannot be read is regenerated without entities and
    /// the failure logged; the save on disk is left alone until overwritten.
    pub fn ensure_chunk(&mut self, pos: ChunkPos) {
        if self.storage.contains(pos) {
            self.storage.get_mut(pos);
            return;
        }

        match self.load_chunk(pos) {
            Ok(true) => {}
            Ok(false) => {
                self.storage.get_or_generate(pos);
            }
            Err(err) => {
                warn!(chunk = %pos, error = %err, "failed to load chunk; regenerating");
                self.storage.get_or_generate(pos);
            }
        }
    }

    fn load_chunk(&mut self, pos: ChunkPos) -> Result<bool> {
        let Some(chunk) = self.persistence.load_chunk(pos)? else {
            return Ok(false);
        };
        let entities = self.persistence.load_entities(pos)?;
        self.storage.insert(chunk);
        for entity in entities {
            self.next_entity_id = self.next_entity_id.max(entity.id + 1);
            let id = entity.id;
            if let Err(err) = self.entities.add(entity) {
                warn!(chunk = %pos, entity = id, error = %err, "dropping conflicting saved entity");
            }
        }
        debug!(chunk = %pos, "chunk activated from save");
        Ok(true)
    }

    /// Tile at a world cell, activating its chunk if needed.
    pub fn tile_at(&mut self, x: i64, y: i64) -> TileType {
        let (pos, lx, ly) = cell_to_chunk(x, y);
        self.ensure_chunk(pos);
        self.storage.get_or_generate(pos).tile(lx, ly)
    }

    pub fn set_tile(&mut self, x: i64, y: i64, tile: TileType) {
        let (pos, lx, ly) = cell_to_chunk(x, y);
        self.ensure_chunk(pos);
        self.storage.get_or_generate(pos).set_tile(lx, ly, tile);
    }

    /// Tiles and entities of a chunk, for a full client snapshot.
    pub fn chunk_snapshot(&mut self, pos: ChunkPos) -> (Vec<u8>, Vec<Entity>) {
        self.ensure_chunk(pos);
        let tiles = self.storage.get_or_generate(pos).tile_ids();
        let entities = self.entities.by_chunk(pos).cloned().collect();
        (tiles, entities)
    }

    /// Place a machine on a tile cell.
    pub fn build(
        &mut self,
        kind: EntityKind,
        x: i64,
        y: i64,
        direction: Direction,
    ) -> Result<EntityId, ActionError> {
        if !kind.is_machine() {
            return Err(ActionError::NotAuthorised("players cannot be built"));
        }
        let tile = self.tile_at(x, y);
        if !placement_allowed(kind, tile) {
            return Err(ActionError::PlacementForbidden { kind, tile });
        }
        if let Some(occupant) = self.entities.machine_at((x, y)) {
            return Err(ActionError::CellOccupied { x, y, occupant });
        }

        let id = self.next_entity_id;
        let entity = Entity::machine(id, kind, x, y, direction)
            .ok_or(ActionError::NotAuthorised("players cannot be built"))?;
        let chunk = entity.chunk();
        self.entities.add(entity)?;
        self.allocate_id();
        self.storage.mark_dirty(chunk, DirtyFlags::ENTITIES);
        debug!(entity = id, ?kind, x, y, "machine built");
        Ok(id)
    }

    /// Remove a machine. Whatever it held is deleted with it.
    pub fn destroy(&mut self, id: EntityId) -> Result<Entity, ActionError> {
        let entity = self.entities.get(id).ok_or(ActionError::UnknownEntity(id))?;
        if !entity.kind().is_machine() {
            return Err(ActionError::NotAuthorised("players cannot be destroyed"));
        }
        let entity = self
            .entities
            .remove(id)
            .ok_or(ActionError::UnknownEntity(id))?;
        self.storage.mark_dirty(entity.chunk(), DirtyFlags::ENTITIES);
        debug!(entity = id, items = entity.item_count(), "machine destroyed");
        Ok(entity)
    }

    /// Select (or clear) an assembler's recipe. Queued ingredients stay queued and
    /// a craft already running finishes with its original recipe.
    pub fn configure(&mut self, id: EntityId, recipe: Option<ItemKind>) -> Result<(), ActionError> {
        if let Some(result) = recipe {
            if assembler_recipe(result).is_none() {
                return Err(ActionError::UnknownRecipe(result));
            }
        }
        let entity = self
            .entities
            .get_mut(id)
            .ok_or(ActionError::UnknownEntity(id))?;
        let EntityPayload::Assembler(state) = &mut entity.payload else {
            return Err(ActionError::NotConfigurable(id));
        };
        state.recipe = recipe;
        let chunk = entity.chunk();
        self.storage.mark_dirty(chunk, DirtyFlags::ENTITIES);
        Ok(())
    }

    /// Validate and apply an action on behalf of `player`.
    #[instrument(skip(self), fields(tick = self.tick.0))]
    pub fn apply_action(
        &mut self,
        player: EntityId,
        action: PlayerAction,
    ) -> Result<WorldEvent, ActionError> {
        let actor = self
            .entities
            .get(player)
            .filter(|e| e.kind() == EntityKind::Player)
            .ok_or(ActionError::NotAuthorised("actor is not an online player"))?;
        let (px, py) = actor.position();

        let target_cell = match action {
            PlayerAction::Build { x, y, .. } => (x, y),
            PlayerAction::Destroy { entity_id } | PlayerAction::Configure { entity_id, .. } => self
                .entities
                .get(entity_id)
                .ok_or(ActionError::UnknownEntity(entity_id))?
                .cell(),
        };
        let dx = target_cell.0 as f64 + 0.5 - px;
        let dy = target_cell.1 as f64 + 0.5 - py;
        if (dx * dx + dy * dy).sqrt() > MAX_BUILD_REACH {
            return Err(ActionError::OutOfReach {
                x: target_cell.0,
                y: target_cell.1,
            });
        }

        match action {
            PlayerAction::Build {
                kind,
                x,
                y,
                direction,
            } => self.build(kind, x, y, direction).map(WorldEvent::Added),
            PlayerAction::Destroy { entity_id } => {
                let removed = self.destroy(entity_id)?;
                Ok(WorldEvent::Removed {
                    id: entity_id,
                    chunk: removed.chunk(),
                })
            }
            PlayerAction::Configure { entity_id, recipe } => {
                self.configure(entity_id, recipe)?;
                Ok(WorldEvent::Updated(entity_id))
            }
        }
    }

    /// Create the player entity for `name` at its saved position (or the origin).
    pub fn spawn_player(&mut self, name: &str) -> EntityId {
        let (x, y) = match self.persistence.load_player(name) {
            Ok(Some(record)) => (record.x, record.y),
            Ok(None) => (0.0, 0.0),
            Err(err) => {
                warn!(player = name, error = %err, "failed to load player record; spawning at origin");
                (0.0, 0.0)
            }
        };
        let id = self.allocate_id();
        let player = Entity::player(id, name, x, y);
        self.ensure_chunk(player.chunk());
        if let Err(err) = self.entities.add(player) {
            // Ids are fresh and players claim no cell, so this cannot collide.
            warn!(player = name, error = %err, "failed to register player");
        }
        info!(player = name, entity = id, x, y, "player spawned");
        id
    }

    /// Move a player entity, re-bucketing it if it crossed into another chunk.
    pub fn move_player(&mut self, id: EntityId, x: f64, y: f64) -> Result<(), ActionError> {
        if !x.is_finite() || !y.is_finite() || x.abs() > WORLD_LIMIT || y.abs() > WORLD_LIMIT {
            return Err(ActionError::InvalidPosition);
        }
        match self.entities.get(id) {
            Some(e) if e.kind() == EntityKind::Player => {}
            Some(_) => return Err(ActionError::NotAuthorised("only players move")),
            None => return Err(ActionError::UnknownEntity(id)),
        }
        self.entities.move_entity(id, x, y)
    }

    /// Remove a player entity, saving where it stood. Returns the removed entity.
    pub fn despawn_player(&mut self, id: EntityId) -> Option<Entity> {
        if self.entities.get(id)?.kind() != EntityKind::Player {
            return None;
        }
        let entity = self.entities.remove(id)?;
        self.save_player_record(&entity);
        Some(entity)
    }

    fn save_player_record(&mut self, entity: &Entity) -> bool {
        let Some(name) = entity.player_name() else {
            return false;
        };
        let (x, y) = entity.position();
        let record = PlayerRecord {
            name: name.to_string(),
            x,
            y,
        };
        match self.persistence.save_player(&record) {
            Ok(()) => true,
            Err(err) => {
                warn!(player = name, error = %err, "failed to save player record");
                false
            }
        }
    }

    /// Advance the world one tick.
    #[instrument(skip(self), fields(tick = self.tick.0 + 1))]
    pub fn step(&mut self) -> TickReport {
        self.tick = self.tick.advance(1);
        let step = simulation::step(&mut self.entities, &self.storage, &mut self.dirty, self.tick);
        let updated = self.dirty.drain(&self.entities);
        for id in &updated {
            if let Some(entity) = self.entities.get(*id) {
                self.storage.mark_dirty(entity.chunk(), DirtyFlags::ENTITIES);
            }
        }
        TickReport {
            tick: self.tick,
            updated,
            step,
        }
    }

    fn save_chunk(&mut self, pos: ChunkPos) -> Result<()> {
        let Some(chunk) = self.storage.get(pos) else {
            return Ok(());
        };
        let machines = self
            .entities
            .by_chunk(pos)
            .filter(|e| e.kind().is_machine());
        let record = ChunkRecord::capture(chunk, machines);
        self.persistence.save_chunk(&record)?;
        if let Some(chunk) = self.storage.get_mut(pos) {
            chunk.clear_dirty();
        }
        Ok(())
    }

    /// Save every chunk touched since its last save, then the world meta.
    #[instrument(skip(self), fields(tick = self.tick.0))]
    pub fn save_dirty(&mut self) -> SaveReport {
        let mut report = SaveReport::default();
        for pos in self.storage.dirty_positions() {
            match self.save_chunk(pos) {
                Ok(()) => report.saved += 1,
                Err(err) => {
                    warn!(chunk = %pos, error = %err, "chunk save failed; will retry");
                    report.failed += 1;
                }
            }
        }
        let meta = self.meta();
        if let Err(err) = self.persistence.save_meta(&meta) {
            warn!(error = %err, "world meta save failed; will retry");
            report.failed += 1;
        }
        if report.saved > 0 || report.failed > 0 {
            debug!(saved = report.saved, failed = report.failed, "save pass complete");
        }
        report
    }

    /// Drop least-recently-used chunks until back under budget.
    ///
    /// A chunk is only evicted if `is_referenced` says no subscription needs it,
    /// no player stands in it, and its entities were saved successfully.
    pub fn evict_unreferenced(&mut self, is_referenced: impl Fn(ChunkPos) -> bool) -> Vec<ChunkPos> {
        let mut evicted = Vec::new();
        let excess = self.storage.excess();
        if excess == 0 {
            return evicted;
        }

        for pos in self.storage.eviction_order() {
            if evicted.len() == excess {
                break;
            }
            if is_referenced(pos) || self.entities.chunk_has_player(pos) {
                continue;
            }
            let has_entities = self.entities.by_chunk(pos).next().is_some();
            let dirty = self.storage.get(pos).is_some_and(|c| c.is_dirty());
            if dirty || has_entities {
                if let Err(err) = self.save_chunk(pos) {
                    warn!(chunk = %pos, error = %err, "keeping chunk resident; save failed");
                    continue;
                }
            }
            for id in self.entities.ids_in_chunk(pos) {
                self.entities.remove(id);
            }
            self.storage.remove(pos);
            evicted.push(pos);
        }

        if !evicted.is_empty() {
            debug!(count = evicted.len(), "evicted chunks");
        }
        evicted
    }

    /// Final flush: online players, dirty chunks, world meta.
    pub fn shutdown(&mut self) -> Result<()> {
        let players: Vec<Entity> = self
            .entities
            .iter()
            .filter(|e| e.kind() == EntityKind::Player)
            .cloned()
            .collect();
        let mut failures = 0;
        for player in &players {
            if !self.save_player_record(player) {
                failures += 1;
            }
        }
        let report = self.save_dirty();
        failures += report.failed;
        info!(saved = report.saved, failures, tick = self.tick.0, "world flushed");
        if failures > 0 {
            anyhow::bail!("{failures} save(s) failed during shutdown");
        }
        Ok(())
    }
}

/// Which tiles each machine kind may stand on.
pub fn placement_allowed(kind: EntityKind, tile: TileType) -> bool {
    match kind {
        EntityKind::Player => false,
        EntityKind::Miner => tile.resource().is_some(),
        EntityKind::Furnace | EntityKind::Assembler => tile.is_solid_ground(),
        EntityKind::Conveyor | EntityKind::Chest | EntityKind::Inserter => !tile.is_unbuildable(),
    }
}
