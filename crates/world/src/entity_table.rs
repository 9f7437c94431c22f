use std::collections::{BTreeMap, BTreeSet};

use ironworks_core::EntityId;

use crate::chunk::{cell_of, ChunkPos};
use crate::entity::{Entity, EntityKind};
use crate::error::ActionError;

/// Every live entity, indexed by id, by chunk bucket and (machines only) by cell.
///
/// All indices are updated inside the same `&mut self` call, so readers never see
/// them disagree. BTree collections keep iteration in ascending id/position order.
#[derive(Debug, Default)]
pub struct EntityTable {
    by_id: BTreeMap<EntityId, Entity>,
    by_chunk: BTreeMap<ChunkPos, BTreeSet<EntityId>>,
    by_cell: BTreeMap<(i64, i64), EntityId>,
}

impl EntityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Register an entity. Machines claim their cell exclusively.
    pub fn add(&mut self, entity: Entity) -> Result<(), ActionError> {
        if self.by_id.contains_key(&entity.id) {
            return Err(ActionError::DuplicateEntity(entity.id));
        }
        if entity.kind().is_machine() {
            let (x, y) = entity.cell();
            if let Some(&occupant) = self.by_cell.get(&(x, y)) {
                return Err(ActionError::CellOccupied { x, y, occupant });
            }
            self.by_cell.insert((x, y), entity.id);
        }
        self.by_chunk
            .entry(entity.chunk())
            .or_default()
            .insert(entity.id);
        self.by_id.insert(entity.id, entity);
        Ok(())
    }

    pub fn remove(&mut self, id: EntityId) -> Option<Entity> {
        let entity = self.by_id.remove(&id)?;
        self.unindex(&entity);
        Some(entity)
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.by_id.get(&id)
    }

    /// Mutable access to payload and facing. Moving goes through [`Self::move_entity`].
    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.by_id.get_mut(&id)
    }

    /// Machine occupying the cell that contains `(x, y)`.
    pub fn get_at(&self, x: f64, y: f64) -> Option<&Entity> {
        self.machine_at((cell_of(x), cell_of(y)))
            .and_then(|id| self.by_id.get(&id))
    }

    /// Id of the machine occupying `cell`.
    pub fn machine_at(&self, cell: (i64, i64)) -> Option<EntityId> {
        self.by_cell.get(&cell).copied()
    }

    /// Entities bucketed in `pos`, ascending id.
    pub fn by_chunk(&self, pos: ChunkPos) -> impl Iterator<Item = &Entity> + '_ {
        self.by_chunk
            .get(&pos)
            .into_iter()
            .flat_map(|ids| ids.iter())
            .filter_map(|id| self.by_id.get(id))
    }

    pub fn ids_in_chunk(&self, pos: ChunkPos) -> Vec<EntityId> {
        self.by_chunk
            .get(&pos)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn chunk_has_player(&self, pos: ChunkPos) -> bool {
        self.by_chunk(pos).any(|e| e.kind() == EntityKind::Player)
    }

    /// Move an entity, re-bucketing it if it crossed a chunk or cell boundary.
    pub fn move_entity(&mut self, id: EntityId, x: f64, y: f64) -> Result<(), ActionError> {
        let entity = self.by_id.get(&id).ok_or(ActionError::UnknownEntity(id))?;
        let new_cell = (cell_of(x), cell_of(y));
        if entity.kind().is_machine() && new_cell != entity.cell() {
            if let Some(&occupant) = self.by_cell.get(&new_cell) {
                return Err(ActionError::CellOccupied {
                    x: new_cell.0,
                    y: new_cell.1,
                    occupant,
                });
            }
        }

        let Some(mut entity) = self.by_id.remove(&id) else {
            return Err(ActionError::UnknownEntity(id));
        };
        self.unindex(&entity);
        entity.set_position(x, y);
        if entity.kind().is_machine() {
            self.by_cell.insert(entity.cell(), id);
        }
        self.by_chunk.entry(entity.chunk()).or_default().insert(id);
        self.by_id.insert(id, entity);
        Ok(())
    }

    /// All entities, ascending id.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> + '_ {
        self.by_id.values()
    }

    /// Stable snapshot of non-player ids in ascending order.
    pub fn machine_ids(&self) -> Vec<EntityId> {
        self.by_id
            .values()
            .filter(|e| e.kind().is_machine())
            .map(|e| e.id)
            .collect()
    }

    /// Chunks that currently hold at least one entity.
    pub fn occupied_chunks(&self) -> impl Iterator<Item = ChunkPos> + '_ {
        self.by_chunk.keys().copied()
    }

    /// Lift an entity out of the id index while its update rule runs.
    ///
    /// Spatial indices keep pointing at it, so its cell stays claimed; the caller
    /// must hand it back with [`Self::restore`] before anything else touches the table.
    pub(crate) fn take(&mut self, id: EntityId) -> Option<Entity> {
        self.by_id.remove(&id)
    }

    pub(crate) fn restore(&mut self, entity: Entity) {
        debug_assert!(self
            .by_chunk
            .get(&entity.chunk())
            .is_some_and(|ids| ids.contains(&entity.id)));
        self.by_id.insert(entity.id, entity);
    }

    fn unindex(&mut self, entity: &Entity) {
        let chunk = entity.chunk();
        if let Some(ids) = self.by_chunk.get_mut(&chunk) {
            ids.remove(&entity.id);
            if ids.is_empty() {
                self.by_chunk.remove(&chunk);
            }
        }
        if entity.kind().is_machine() {
            let cell = entity.cell();
            if self.by_cell.get(&cell) == Some(&entity.id) {
                self.by_cell.remove(&cell);
            }
        }
    }
}
