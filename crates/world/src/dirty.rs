use std::collections::BTreeSet;

use ironworks_core::EntityId;

use crate::entity_table::EntityTable;

/// Ids of entities mutated during the current tick.
#[derive(Debug, Default)]
pub struct DirtyTracker {
    ids: BTreeSet<EntityId>,
}

impl DirtyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent.
    pub fn mark_dirty(&mut self, id: EntityId) {
        self.ids.insert(id);
    }

    pub fn is_dirty(&self, id: EntityId) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    /// Take the marked ids, dropping any no longer present in `entities`.
    pub fn drain(&mut self, entities: &EntityTable) -> BTreeSet<EntityId> {
        let mut ids = std::mem::take(&mut self.ids);
        ids.retain(|id| entities.contains(*id));
        ids
    }
}
