//! Persistence gateway: region files on disk, or an in-memory store for tests.
//!
//! Region files group 32x32 chunks. Every file on disk (regions, world meta and
//! the player table) shares one framing: a 14-byte little-endian header
//! (magic, version, CRC32, payload length) followed by a zstd-compressed
//! bincode payload.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use crc32fast::Hasher;
use ironworks_core::{EntityId, SimTick};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::chunk::{Chunk, ChunkPos};
use crate::entity::Entity;
use crate::tile::TileType;

/// Magic number for save file identification ("IWRG" = ironworks region).
const REGION_MAGIC: u32 = 0x4957_5247;

/// Current save file format version.
const REGION_VERSION: u16 = 1;

/// Region size in chunks (32x32 chunks per region).
const REGION_SIZE: i32 = 32;

const HEADER_LEN: usize = 14;

/// World-level state that is not reproducible from the seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldMeta {
    pub seed: u64,
    pub tick: SimTick,
    pub next_entity_id: EntityId,
}

/// What survives of a player between sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub name: String,
    pub x: f64,
    pub y: f64,
}

/// One chunk as saved: its tiles plus the machines located in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub position: ChunkPos,
    pub tiles: Vec<TileType>,
    pub entities: Vec<Entity>,
}

impl ChunkRecord {
    /// Capture a chunk and the entities bucketed in it.
    pub fn capture<'a>(chunk: &Chunk, entities: impl IntoIterator<Item = &'a Entity>) -> Self {
        Self {
            position: chunk.position(),
            tiles: chunk.tiles().to_vec(),
            entities: entities.into_iter().cloned().collect(),
        }
    }
}

/// Load/save contract used by the world at activation, eviction and checkpoint time.
///
/// Saving unchanged data again must be harmless.
pub trait ChunkPersistence: Send {
    /// Tiles of a previously saved chunk, or `None` if it was never saved.
    fn load_chunk(&self, pos: ChunkPos) -> Result<Option<Chunk>>;
    /// Entities saved with a chunk.
    fn load_entities(&self, pos: ChunkPos) -> Result<Vec<Entity>>;
    fn save_chunk(&mut self, record: &ChunkRecord) -> Result<()>;
    fn load_meta(&self) -> Result<Option<WorldMeta>>;
    fn save_meta(&mut self, meta: &WorldMeta) -> Result<()>;
    fn load_player(&self, name: &str) -> Result<Option<PlayerRecord>>;
    fn save_player(&mut self, record: &PlayerRecord) -> Result<()>;
}

/// Save file header structure.
#[derive(Debug, Clone)]
struct RegionHeader {
    magic: u32,
    version: u16,
    crc32: u32,
    payload_len: u32,
}

impl RegionHeader {
    fn new(crc32: u32, payload_len: u32) -> Self {
        Self {
            magic: REGION_MAGIC,
            version: REGION_VERSION,
            crc32,
            payload_len,
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN);
        bytes.extend_from_slice(&self.magic.to_le_bytes());
        bytes.extend_from_slice(&self.version.to_le_bytes());
        bytes.extend_from_slice(&self.crc32.to_le_bytes());
        bytes.extend_from_slice(&self.payload_len.to_le_bytes());
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            anyhow::bail!("Save header too short");
        }

        let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if magic != REGION_MAGIC {
            anyhow::bail!(
                "Invalid save magic: expected 0x{:08X}, got 0x{:08X}",
                REGION_MAGIC,
                magic
            );
        }

        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != REGION_VERSION {
            anyhow::bail!("Unsupported save version {version}");
        }
        let crc32 = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);
        let payload_len = u32::from_le_bytes([bytes[10], bytes[11], bytes[12], bytes[13]]);

        Ok(Self {
            magic,
            version,
            crc32,
            payload_len,
        })
    }
}

/// Converts chunk position to region coordinates.
fn chunk_to_region(chunk_pos: ChunkPos) -> (i32, i32) {
    (
        chunk_pos.x.div_euclid(REGION_SIZE),
        chunk_pos.y.div_euclid(REGION_SIZE),
    )
}

fn checksum(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// Read a framed file. `Ok(None)` when it does not exist.
fn read_framed<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }

    let mut file = File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut header_bytes = [0u8; HEADER_LEN];
    file.read_exact(&mut header_bytes)
        .context("Failed to read save header")?;
    let header = RegionHeader::from_bytes(&header_bytes)?;

    let mut compressed = vec![0u8; header.payload_len as usize];
    file.read_exact(&mut compressed)
        .context("Failed to read save payload")?;

    let computed_crc = checksum(&compressed);
    if computed_crc != header.crc32 {
        anyhow::bail!(
            "CRC32 mismatch in {}: expected {:08X}, got {:08X}",
            path.display(),
            header.crc32,
            computed_crc
        );
    }

    let decompressed =
        zstd::decode_all(&compressed[..]).context("Failed to decompress save payload")?;
    let value = bincode::deserialize(&decompressed).context("Failed to deserialize save payload")?;
    Ok(Some(value))
}

/// Write a framed file via a temporary sibling and rename.
fn write_framed<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let serialized = bincode::serialize(value).context("Failed to serialize save payload")?;

    // Compress with zstd (level 3 for balanced speed/compression).
    let compressed =
        zstd::encode_all(&serialized[..], 3).context("Failed to compress save payload")?;
    let payload_len =
        u32::try_from(compressed.len()).context("Save payload exceeds 4 GiB")?;
    let header = RegionHeader::new(checksum(&compressed), payload_len);

    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)
            .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
        file.write_all(&header.to_bytes())
            .context("Failed to write header")?;
        file.write_all(&compressed)
            .context("Failed to write payload")?;
        file.sync_all().context("Failed to flush save file")?;
    }
    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to move save into place at {}", path.display()))?;
    Ok(())
}

type RegionData = BTreeMap<ChunkPos, ChunkRecord>;
type PlayerTable = BTreeMap<String, PlayerRecord>;

/// Region file manager for saving/loading chunks.
pub struct RegionStore {
    world_dir: PathBuf,
}

impl RegionStore {
    /// Create a new region store rooted at the given world directory.
    pub fn new<P: AsRef<Path>>(world_dir: P) -> Result<Self> {
        let world_dir = world_dir.as_ref().to_path_buf();
        fs::create_dir_all(&world_dir).context("Failed to create world directory")?;
        Ok(Self { world_dir })
    }

    /// Get the path to a region file for the given region coordinates.
    fn region_path(&self, region_x: i32, region_y: i32) -> PathBuf {
        self.world_dir
            .join(format!("r.{}.{}.rg", region_x, region_y))
    }

    fn meta_path(&self) -> PathBuf {
        self.world_dir.join("world.meta")
    }

    fn players_path(&self) -> PathBuf {
        self.world_dir.join("players.dat")
    }

    fn load_region(&self, pos: ChunkPos) -> Result<RegionData> {
        let (region_x, region_y) = chunk_to_region(pos);
        Ok(read_framed(&self.region_path(region_x, region_y))?.unwrap_or_default())
    }

    fn load_record(&self, pos: ChunkPos) -> Result<Option<ChunkRecord>> {
        Ok(self.load_region(pos)?.remove(&pos))
    }
}

impl ChunkPersistence for RegionStore {
    fn load_chunk(&self, pos: ChunkPos) -> Result<Option<Chunk>> {
        let Some(record) = self.load_record(pos)? else {
            return Ok(None);
        };
        let chunk = Chunk::from_tiles(pos, record.tiles)
            .with_context(|| format!("Chunk {pos} has a malformed tile grid"))?;
        Ok(Some(chunk))
    }

    fn load_entities(&self, pos: ChunkPos) -> Result<Vec<Entity>> {
        Ok(self
            .load_record(pos)?
            .map(|record| record.entities)
            .unwrap_or_default())
    }

    fn save_chunk(&mut self, record: &ChunkRecord) -> Result<()> {
        let (region_x, region_y) = chunk_to_region(record.position);
        // Load existing region or create new one.
        let mut region = self.load_region(record.position)?;
        region.insert(record.position, record.clone());
        write_framed(&self.region_path(region_x, region_y), &region)
    }

    fn load_meta(&self) -> Result<Option<WorldMeta>> {
        read_framed(&self.meta_path())
    }

    fn save_meta(&mut self, meta: &WorldMeta) -> Result<()> {
        write_framed(&self.meta_path(), meta)
    }

    fn load_player(&self, name: &str) -> Result<Option<PlayerRecord>> {
        let players: PlayerTable = read_framed(&self.players_path())?.unwrap_or_default();
        Ok(players.get(name).cloned())
    }

    fn save_player(&mut self, record: &PlayerRecord) -> Result<()> {
        let path = self.players_path();
        let mut players: PlayerTable = read_framed(&path)?.unwrap_or_default();
        players.insert(record.name.clone(), record.clone());
        write_framed(&path, &players)
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    chunks: BTreeMap<ChunkPos, ChunkRecord>,
    meta: Option<WorldMeta>,
    players: PlayerTable,
    fail_saves: bool,
    chunk_saves: usize,
}

/// In-memory persistence. Clones share the same storage, so a test can keep a
/// handle while the world owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryInner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))
    }

    /// Make every subsequent save fail (or succeed again).
    pub fn set_fail_saves(&self, fail: bool) {
        if let Ok(mut inner) = self.lock() {
            inner.fail_saves = fail;
        }
    }

    /// Number of successful chunk saves so far.
    pub fn chunk_saves(&self) -> usize {
        self.lock().map(|inner| inner.chunk_saves).unwrap_or(0)
    }

    /// Saved record for a chunk, if any.
    pub fn record(&self, pos: ChunkPos) -> Option<ChunkRecord> {
        self.lock().ok()?.chunks.get(&pos).cloned()
    }

    fn check_writable(inner: &MemoryInner) -> Result<()> {
        if inner.fail_saves {
            anyhow::bail!("simulated write failure");
        }
        Ok(())
    }
}

impl ChunkPersistence for MemoryStore {
    fn load_chunk(&self, pos: ChunkPos) -> Result<Option<Chunk>> {
        let inner = self.lock()?;
        match inner.chunks.get(&pos) {
            Some(record) => Ok(Some(
                Chunk::from_tiles(pos, record.tiles.clone())
                    .with_context(|| format!("Chunk {pos} has a malformed tile grid"))?,
            )),
            None => Ok(None),
        }
    }

    fn load_entities(&self, pos: ChunkPos) -> Result<Vec<Entity>> {
        let inner = self.lock()?;
        Ok(inner
            .chunks
            .get(&pos)
            .map(|record| record.entities.clone())
            .unwrap_or_default())
    }

    fn save_chunk(&mut self, record: &ChunkRecord) -> Result<()> {
        let mut inner = self.lock()?;
        Self::check_writable(&inner)?;
        inner.chunks.insert(record.position, record.clone());
        inner.chunk_saves += 1;
        Ok(())
    }

    fn load_meta(&self) -> Result<Option<WorldMeta>> {
        Ok(self.lock()?.meta)
    }

    fn save_meta(&mut self, meta: &WorldMeta) -> Result<()> {
        let mut inner = self.lock()?;
        Self::check_writable(&inner)?;
        inner.meta = Some(*meta);
        Ok(())
    }

    fn load_player(&self, name: &str) -> Result<Option<PlayerRecord>> {
        Ok(self.lock()?.players.get(name).cloned())
    }

    fn save_player(&mut self, record: &PlayerRecord) -> Result<()> {
        let mut inner = self.lock()?;
        Self::check_writable(&inner)?;
        inner.players.insert(record.name.clone(), record.clone());
        Ok(())
    }
}
