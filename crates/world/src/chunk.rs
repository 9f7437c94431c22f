use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tile::TileType;

/// Chunk edge length in tiles.
pub const CHUNK_SIZE: usize = 32;
/// Total tile count per chunk.
pub const CHUNK_AREA: usize = CHUNK_SIZE * CHUNK_SIZE;

/// Chunk coordinate (X,Y) in chunk space.
/// Implements Ord for deterministic iteration in BTreeMap/BTreeSet (sorts by x, then y).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkPos {
    pub x: i32,
    pub y: i32,
}

impl ChunkPos {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Chunks within `radius` (Chebyshev distance) of this one, in sorted order.
    pub fn square_around(self, radius: i32) -> impl Iterator<Item = ChunkPos> {
        let radius = radius.max(0);
        (-radius..=radius).flat_map(move |dx| {
            (-radius..=radius).map(move |dy| ChunkPos::new(self.x + dx, self.y + dy))
        })
    }
}

impl fmt::Display for ChunkPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Integer tile cell containing the continuous coordinate `v`.
#[inline]
pub fn cell_of(v: f64) -> i64 {
    v.floor() as i64
}

/// Resolve a tile cell to its chunk and non-negative local coordinate.
#[inline]
pub fn cell_to_chunk(cell_x: i64, cell_y: i64) -> (ChunkPos, usize, usize) {
    let size = CHUNK_SIZE as i64;
    (
        ChunkPos::new(cell_x.div_euclid(size) as i32, cell_y.div_euclid(size) as i32),
        cell_x.rem_euclid(size) as usize,
        cell_y.rem_euclid(size) as usize,
    )
}

/// Resolve a world position to `(chunk, local_x, local_y)`.
///
/// Uses floor division and true modulo, so local coordinates are never negative.
/// Every subsystem goes through this one transform.
#[inline]
pub fn world_to_chunk(x: f64, y: f64) -> (ChunkPos, usize, usize) {
    cell_to_chunk(cell_of(x), cell_of(y))
}

/// Inverse of [`cell_to_chunk`]: the world cell of a chunk-local coordinate.
#[inline]
pub fn chunk_to_world(pos: ChunkPos, local_x: usize, local_y: usize) -> (i64, i64) {
    let size = CHUNK_SIZE as i64;
    (
        pos.x as i64 * size + local_x as i64,
        pos.y as i64 * size + local_y as i64,
    )
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    /// Dirty-since-save flags.
    pub struct DirtyFlags: u8 {
        const TILES = 0b0000_0001;
        const ENTITIES = 0b0000_0010;
    }
}

impl Default for DirtyFlags {
    fn default() -> Self {
        DirtyFlags::empty()
    }
}

/// Chunk storing a 32×32 tile grid (row-major, y outer) plus save dirty flags.
///
/// Entities located in the chunk live in the entity table's chunk bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    position: ChunkPos,
    tiles: Vec<TileType>,
    dirty: DirtyFlags,
}

impl Chunk {
    /// Allocate a chunk from a full tile grid. Returns `None` on a wrong-sized grid.
    pub fn from_tiles(position: ChunkPos, tiles: Vec<TileType>) -> Option<Self> {
        if tiles.len() != CHUNK_AREA {
            return None;
        }
        Some(Self {
            position,
            tiles,
            dirty: DirtyFlags::empty(),
        })
    }

    /// Allocate a chunk filled with one tile type.
    pub fn filled(position: ChunkPos, tile: TileType) -> Self {
        Self {
            position,
            tiles: vec![tile; CHUNK_AREA],
            dirty: DirtyFlags::empty(),
        }
    }

    #[inline]
    pub fn position(&self) -> ChunkPos {
        self.position
    }

    fn index(x: usize, y: usize) -> usize {
        debug_assert!(x < CHUNK_SIZE);
        debug_assert!(y < CHUNK_SIZE);
        y * CHUNK_SIZE + x
    }

    /// Fetch a tile by local coordinate.
    pub fn tile(&self, x: usize, y: usize) -> TileType {
        self.tiles[Self::index(x, y)]
    }

    /// Set a tile and mark the chunk dirty.
    pub fn set_tile(&mut self, x: usize, y: usize, tile: TileType) {
        let idx = Self::index(x, y);
        if self.tiles[idx] != tile {
            self.tiles[idx] = tile;
            self.dirty.insert(DirtyFlags::TILES);
        }
    }

    /// Borrow the raw tile grid.
    pub fn tiles(&self) -> &[TileType] {
        &self.tiles
    }

    /// Tile ids as sent on the wire.
    pub fn tile_ids(&self) -> Vec<u8> {
        self.tiles.iter().map(|t| u8::from(*t)).collect()
    }

    pub fn mark_dirty(&mut self, flags: DirtyFlags) {
        self.dirty.insert(flags);
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn dirty_flags(&self) -> DirtyFlags {
        self.dirty
    }

    /// Clear the dirty flags after a successful save.
    pub fn clear_dirty(&mut self) {
        self.dirty = DirtyFlags::empty();
    }
}
