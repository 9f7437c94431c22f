//! Deterministic procedural tile generation.
//!
//! `generate` is a pure function of `(seed, chunk)`: it owns no state, so it may be
//! called from any thread in any order and always yields the same grid.

use ironworks_core::scoped_rng;
use rand::Rng;

use crate::chunk::{Chunk, ChunkPos, CHUNK_AREA, CHUNK_SIZE};
use crate::tile::TileType;

/// Cumulative probability bands, checked in order. Anything above the last band is grass.
pub const TILE_BANDS: &[(f64, TileType)] = &[
    (0.02, TileType::IronOre),
    (0.04, TileType::CopperOre),
    (0.06, TileType::Coal),
    (0.10, TileType::Water),
    (0.30, TileType::Dirt),
];

/// Map one roll in `[0, 1)` to a tile type.
pub fn tile_for_roll(roll: f64) -> TileType {
    TILE_BANDS
        .iter()
        .find(|(threshold, _)| roll < *threshold)
        .map(|(_, tile)| *tile)
        .unwrap_or(TileType::Grass)
}

/// Generate the tile grid of one chunk (row-major, y outer, x inner).
pub fn generate_tiles(seed: u64, pos: ChunkPos) -> Vec<TileType> {
    let mut rng = scoped_rng(seed, pos.x, pos.y);
    (0..CHUNK_AREA)
        .map(|_| tile_for_roll(rng.gen::<f64>()))
        .collect()
}

/// Generate a fresh chunk.
pub fn generate(seed: u64, pos: ChunkPos) -> Chunk {
    let mut chunk = Chunk::filled(pos, TileType::Grass);
    for (idx, tile) in generate_tiles(seed, pos).into_iter().enumerate() {
        chunk.set_tile(idx % CHUNK_SIZE, idx / CHUNK_SIZE, tile);
    }
    chunk.clear_dirty();
    chunk
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_follow_thresholds() {
        assert_eq!(tile_for_roll(0.0), TileType::IronOre);
        assert_eq!(tile_for_roll(0.0199), TileType::IronOre);
        assert_eq!(tile_for_roll(0.02), TileType::CopperOre);
        assert_eq!(tile_for_roll(0.05), TileType::Coal);
        assert_eq!(tile_for_roll(0.07), TileType::Water);
        assert_eq!(tile_for_roll(0.2), TileType::Dirt);
        assert_eq!(tile_for_roll(0.30), TileType::Grass);
        assert_eq!(tile_for_roll(0.999), TileType::Grass);
    }

    #[test]
    fn generation_ignores_call_order() {
        let a1 = generate_tiles(42, ChunkPos::new(3, -2));
        let _ = generate_tiles(42, ChunkPos::new(0, 0));
        let _ = generate_tiles(7, ChunkPos::new(3, -2));
        let a2 = generate_tiles(42, ChunkPos::new(3, -2));
        assert_eq!(a1, a2);
    }

    #[test]
    fn distribution_is_plausible() {
        let mut grass = 0usize;
        let mut ore = 0usize;
        for cx in 0..4 {
            let chunk = generate(12345, ChunkPos::new(cx, 0));
            for tile in chunk.tiles() {
                match tile {
                    TileType::Grass => grass += 1,
                    t if t.resource().is_some() => ore += 1,
                    _ => {}
                }
            }
        }
        let total = 4 * CHUNK_AREA;
        // 70% grass and 6% ore expected; generous bounds.
        assert!(grass > total / 2, "grass={grass}");
        assert!(ore > 0 && ore < total / 5, "ore={ore}");
    }

    #[test]
    fn fresh_chunk_is_clean() {
        assert!(!generate(1, ChunkPos::new(0, 0)).is_dirty());
    }
}
