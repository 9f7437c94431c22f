use std::collections::BTreeMap;

use lru::LruCache;

use crate::chunk::{cell_to_chunk, world_to_chunk, Chunk, ChunkPos, DirtyFlags};
use crate::generator::generate;
use crate::tile::TileType;

/// In-memory chunk arena with least-recently-used bookkeeping.
/// Uses BTreeMap for deterministic iteration order (critical for multiplayer sync).
///
/// The store never drops a chunk on its own: chunks may hold unsaved entities, so
/// eviction is driven by the world, which saves first. `budget` is the resident
/// count the world tries to stay under.
pub struct ChunkStorage {
    seed: u64,
    /// Chunks stored with deterministic key ordering.
    chunks: BTreeMap<ChunkPos, Chunk>,
    lru: LruCache<ChunkPos, ()>,
    budget: usize,
}

impl ChunkStorage {
    /// Create a storage generating from `seed` with the desired resident budget.
    pub fn new(seed: u64, budget: usize) -> Self {
        Self {
            seed,
            chunks: BTreeMap::new(),
            lru: LruCache::unbounded(),
            budget: budget.max(1),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Number of resident chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Returns true when no chunks are currently stored.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn contains(&self, pos: ChunkPos) -> bool {
        self.chunks.contains_key(&pos)
    }

    /// Obtain mutable access to a chunk, generating it if necessary.
    pub fn get_or_generate(&mut self, pos: ChunkPos) -> &mut Chunk {
        let seed = self.seed;
        self.lru.put(pos, ());
        self.chunks
            .entry(pos)
            .or_insert_with(|| generate(seed, pos))
    }

    /// Tile at a world position, generating its chunk if needed.
    pub fn get_tile(&mut self, x: f64, y: f64) -> TileType {
        let (pos, lx, ly) = world_to_chunk(x, y);
        self.get_or_generate(pos).tile(lx, ly)
    }

    /// Tile at a world cell if its chunk is resident. Does not touch recency.
    pub fn tile_at(&self, cell_x: i64, cell_y: i64) -> Option<TileType> {
        let (pos, lx, ly) = cell_to_chunk(cell_x, cell_y);
        self.chunks.get(&pos).map(|chunk| chunk.tile(lx, ly))
    }

    /// Install a chunk produced elsewhere (e.g. loaded from disk).
    pub fn insert(&mut self, chunk: Chunk) {
        let pos = chunk.position();
        self.lru.put(pos, ());
        self.chunks.insert(pos, chunk);
    }

    /// Attempt to fetch a chunk immutably.
    pub fn get(&self, pos: ChunkPos) -> Option<&Chunk> {
        self.chunks.get(&pos)
    }

    /// Fetch a chunk mutably (without creating it).
    pub fn get_mut(&mut self, pos: ChunkPos) -> Option<&mut Chunk> {
        if self.chunks.contains_key(&pos) {
            self.lru.put(pos, ());
        }
        self.chunks.get_mut(&pos)
    }

    /// Flag a resident chunk as needing a save.
    pub fn mark_dirty(&mut self, pos: ChunkPos, flags: DirtyFlags) {
        if let Some(chunk) = self.chunks.get_mut(&pos) {
            chunk.mark_dirty(flags);
        }
    }

    pub fn remove(&mut self, pos: ChunkPos) -> Option<Chunk> {
        self.lru.pop(&pos);
        self.chunks.remove(&pos)
    }

    /// Iterate over currently resident chunk positions.
    pub fn iter_positions(&self) -> impl Iterator<Item = ChunkPos> + '_ {
        self.chunks.keys().copied()
    }

    /// Resident chunks with unsaved changes, sorted.
    pub fn dirty_positions(&self) -> Vec<ChunkPos> {
        self.chunks
            .values()
            .filter(|chunk| chunk.is_dirty())
            .map(|chunk| chunk.position())
            .collect()
    }

    /// Resident chunks, least recently used first.
    pub fn eviction_order(&self) -> Vec<ChunkPos> {
        self.lru.iter().rev().map(|(pos, _)| *pos).collect()
    }

    /// How many chunks above budget the store currently is.
    pub fn excess(&self) -> usize {
        self.chunks.len().saturating_sub(self.budget)
    }
}
