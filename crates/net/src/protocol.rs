//! Protocol message definitions for client-server communication.
//!
//! Every frame carries a one-byte [`MessageTag`] followed by the postcard
//! encoding of that message's body struct. Tags are fixed for interoperability.

use ironworks_core::{Direction, EntityId, ItemKind};
use ironworks_world::{ChunkPos, Entity, EntityKind, PlayerAction, CHUNK_AREA};
use serde::{Deserialize, Serialize};

/// Protocol version for compatibility checking.
pub const PROTOCOL_VERSION: u16 = 1;

/// Protocol magic bytes, folded into the schema hash.
pub const PROTOCOL_MAGIC: &[u8; 8] = b"IRWK\x00\x01\x00\x00";

/// Maximum player name length (bytes).
pub const MAX_NAME_LEN: usize = 32;

/// Maximum length of a rejection reason (bytes).
pub const MAX_REASON_LEN: usize = 256;

/// Maximum entities carried inline by one chunk snapshot.
pub const MAX_CHUNK_ENTITIES: usize = 1024;

/// Coordinates beyond this magnitude are rejected outright.
pub const MAX_COORDINATE: f64 = 1.0e7;

/// Chunk coordinates beyond this magnitude are rejected outright.
pub const MAX_CHUNK_COORDINATE: i32 = 1 << 20;

/// Numeric type tag of every message on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageTag {
    /// Client -> server: authentication request.
    Auth = 1,
    /// Server -> client: authentication response.
    AuthResponse = 2,
    /// Server -> client: a player joined.
    PlayerJoin = 3,
    /// Server -> client: a player left.
    PlayerLeave = 4,
    /// Both directions: player position.
    PlayerMove = 5,
    /// Client -> server: request one chunk.
    ChunkRequest = 6,
    /// Server -> client: full chunk snapshot.
    ChunkData = 7,
    /// Server -> client: entity state changed.
    EntityUpdate = 8,
    /// Server -> client: entity appeared.
    EntityAdd = 9,
    /// Server -> client: entity disappeared.
    EntityRemove = 10,
    /// Client -> server: build, destroy or configure.
    PlayerAction = 11,
    /// Server -> client: simulation tick heartbeat.
    WorldTick = 12,
    /// Both directions: time synchronization.
    Sync = 13,
}

impl MessageTag {
    /// Every tag in wire order.
    pub const ALL: [MessageTag; 13] = [
        MessageTag::Auth,
        MessageTag::AuthResponse,
        MessageTag::PlayerJoin,
        MessageTag::PlayerLeave,
        MessageTag::PlayerMove,
        MessageTag::ChunkRequest,
        MessageTag::ChunkData,
        MessageTag::EntityUpdate,
        MessageTag::EntityAdd,
        MessageTag::EntityRemove,
        MessageTag::PlayerAction,
        MessageTag::WorldTick,
        MessageTag::Sync,
    ];

    /// Tag from its wire byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|tag| *tag as u8 == value)
    }
}

/// Authentication request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthRequest {
    /// Player name; also the key of the saved player record.
    pub name: String,
    /// Client's [`crate::compute_schema_hash`].
    pub schema_hash: u64,
}

/// Position update (client -> server, or server -> client about a player).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerMove {
    /// Player entity. Ignored when sent by a client, which may only move itself.
    pub id: EntityId,
    /// World x.
    pub x: f64,
    /// World y.
    pub y: f64,
}

/// Request for a full snapshot of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRequest {
    /// Chunk x.
    pub cx: i32,
    /// Chunk y.
    pub cy: i32,
}

impl ChunkRequest {
    /// Requested chunk coordinate.
    pub fn position(&self) -> ChunkPos {
        ChunkPos::new(self.cx, self.cy)
    }
}

/// A player action as sent by a client, validated server-side before it
/// touches the world.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ActionRequest {
    /// Place a machine.
    Build {
        /// Machine kind; players cannot be built.
        kind: EntityKind,
        /// Tile cell x.
        x: i64,
        /// Tile cell y.
        y: i64,
        /// Facing.
        direction: Direction,
    },
    /// Remove a machine and everything it holds.
    Destroy {
        /// Target machine.
        entity_id: EntityId,
    },
    /// Select or clear an assembler recipe.
    Configure {
        /// Target assembler.
        entity_id: EntityId,
        /// Result item of the recipe, or `None` to clear.
        recipe: Option<ItemKind>,
    },
}

impl ActionRequest {
    /// Wire id of the action (build 1, destroy 2, configure 3).
    pub fn action_id(&self) -> u8 {
        match self {
            ActionRequest::Build { .. } => 1,
            ActionRequest::Destroy { .. } => 2,
            ActionRequest::Configure { .. } => 3,
        }
    }

    /// Check limits that do not need world state.
    pub fn verify(&self) -> Result<(), &'static str> {
        if let ActionRequest::Build { kind, x, y, .. } = self {
            if !kind.is_machine() {
                return Err("Players cannot be built");
            }
            let limit = MAX_COORDINATE as u64;
            if x.unsigned_abs() > limit || y.unsigned_abs() > limit {
                return Err("Build target out of range");
            }
        }
        Ok(())
    }
}

impl From<ActionRequest> for PlayerAction {
    fn from(request: ActionRequest) -> Self {
        match request {
            ActionRequest::Build {
                kind,
                x,
                y,
                direction,
            } => PlayerAction::Build {
                kind,
                x,
                y,
                direction,
            },
            ActionRequest::Destroy { entity_id } => PlayerAction::Destroy { entity_id },
            ActionRequest::Configure { entity_id, recipe } => {
                PlayerAction::Configure { entity_id, recipe }
            }
        }
    }
}

/// Client clock sample for time synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Client clock in milliseconds.
    pub client_time: u64,
}

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Authentication request.
    Auth(AuthRequest),
    /// Move own player.
    PlayerMove(PlayerMove),
    /// Request one chunk snapshot.
    ChunkRequest(ChunkRequest),
    /// Build, destroy or configure.
    PlayerAction(ActionRequest),
    /// Time synchronization.
    Sync(SyncRequest),
}

impl ClientMessage {
    /// Wire tag of this message.
    pub fn tag(&self) -> MessageTag {
        match self {
            ClientMessage::Auth(_) => MessageTag::Auth,
            ClientMessage::PlayerMove(_) => MessageTag::PlayerMove,
            ClientMessage::ChunkRequest(_) => MessageTag::ChunkRequest,
            ClientMessage::PlayerAction(_) => MessageTag::PlayerAction,
            ClientMessage::Sync(_) => MessageTag::Sync,
        }
    }

    /// Verify message limits and validity.
    ///
    /// Called on every received message; a failure drops the connection.
    pub fn verify(&self) -> Result<(), &'static str> {
        match self {
            ClientMessage::Auth(auth) => {
                if auth.name.is_empty() {
                    return Err("Player name empty");
                }
                if auth.name.len() > MAX_NAME_LEN {
                    return Err("Player name too long");
                }
                if auth.name.chars().any(char::is_control) {
                    return Err("Player name contains control characters");
                }
            }
            ClientMessage::PlayerMove(mv) => verify_position(mv.x, mv.y)?,
            ClientMessage::ChunkRequest(req) => {
                let limit = MAX_CHUNK_COORDINATE.unsigned_abs();
                if req.cx.unsigned_abs() > limit || req.cy.unsigned_abs() > limit {
                    return Err("Chunk request out of range");
                }
            }
            ClientMessage::PlayerAction(action) => action.verify()?,
            ClientMessage::Sync(_) => {}
        }
        Ok(())
    }
}

/// Authentication outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthResponse {
    /// Whether the client may proceed.
    pub accepted: bool,
    /// Rejection reason.
    pub reason: Option<String>,
    /// Player entity assigned on success.
    pub player_id: Option<EntityId>,
    /// Spawn position on success.
    pub x: f64,
    /// Spawn position on success.
    pub y: f64,
    /// Server tick at acceptance.
    pub tick: u64,
}

impl AuthResponse {
    /// Successful response for `player_id` spawned at `(x, y)`.
    pub fn accepted(player_id: EntityId, x: f64, y: f64, tick: u64) -> Self {
        Self {
            accepted: true,
            reason: None,
            player_id: Some(player_id),
            x,
            y,
            tick,
        }
    }

    /// Rejection with a reason.
    pub fn rejected(reason: impl Into<String>, tick: u64) -> Self {
        Self {
            accepted: false,
            reason: Some(reason.into()),
            player_id: None,
            x: 0.0,
            y: 0.0,
            tick,
        }
    }
}

/// Another player came online.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerJoin {
    /// Player entity.
    pub id: EntityId,
    /// Player name.
    pub name: String,
    /// World x.
    pub x: f64,
    /// World y.
    pub y: f64,
}

/// A player went offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerLeave {
    /// Player entity that was removed.
    pub id: EntityId,
}

/// Full snapshot of one chunk: tiles plus every entity bucketed in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkData {
    /// Chunk x.
    pub cx: i32,
    /// Chunk y.
    pub cy: i32,
    /// Tile ids, row-major.
    pub tiles: Vec<u8>,
    /// Entities in the chunk, ascending id.
    pub entities: Vec<Entity>,
}

impl ChunkData {
    /// Chunk coordinate of the snapshot.
    pub fn position(&self) -> ChunkPos {
        ChunkPos::new(self.cx, self.cy)
    }

    /// Verify limits.
    pub fn verify(&self) -> Result<(), &'static str> {
        if self.tiles.len() != CHUNK_AREA {
            return Err("Chunk tile grid has wrong size");
        }
        if self.entities.len() > MAX_CHUNK_ENTITIES {
            return Err("Too many entities in chunk snapshot");
        }
        Ok(())
    }
}

/// An entity was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRemove {
    /// Removed entity.
    pub id: EntityId,
}

/// Simulation heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldTick {
    /// Current tick.
    pub tick: u64,
}

/// Reply to a [`SyncRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse {
    /// Echo of the client's clock sample.
    pub client_time: u64,
    /// Server clock in milliseconds.
    pub server_time: u64,
    /// Current tick.
    pub tick: u64,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Authentication outcome.
    AuthResponse(AuthResponse),
    /// A player came online.
    PlayerJoin(PlayerJoin),
    /// A player went offline.
    PlayerLeave(PlayerLeave),
    /// A player moved.
    PlayerMove(PlayerMove),
    /// Full chunk snapshot.
    ChunkData(ChunkData),
    /// Entity state changed in place.
    EntityUpdate(Entity),
    /// Entity appeared.
    EntityAdd(Entity),
    /// Entity disappeared.
    EntityRemove(EntityRemove),
    /// Tick heartbeat.
    WorldTick(WorldTick),
    /// Time synchronization reply.
    Sync(SyncResponse),
}

impl ServerMessage {
    /// Wire tag of this message.
    pub fn tag(&self) -> MessageTag {
        match self {
            ServerMessage::AuthResponse(_) => MessageTag::AuthResponse,
            ServerMessage::PlayerJoin(_) => MessageTag::PlayerJoin,
            ServerMessage::PlayerLeave(_) => MessageTag::PlayerLeave,
            ServerMessage::PlayerMove(_) => MessageTag::PlayerMove,
            ServerMessage::ChunkData(_) => MessageTag::ChunkData,
            ServerMessage::EntityUpdate(_) => MessageTag::EntityUpdate,
            ServerMessage::EntityAdd(_) => MessageTag::EntityAdd,
            ServerMessage::EntityRemove(_) => MessageTag::EntityRemove,
            ServerMessage::WorldTick(_) => MessageTag::WorldTick,
            ServerMessage::Sync(_) => MessageTag::Sync,
        }
    }

    /// Verify message limits and validity.
    pub fn verify(&self) -> Result<(), &'static str> {
        match self {
            ServerMessage::AuthResponse(resp) => {
                if resp.reason.as_ref().is_some_and(|r| r.len() > MAX_REASON_LEN) {
                    return Err("Auth rejection reason too long");
                }
                if resp.accepted && resp.player_id.is_none() {
                    return Err("Accepted auth without a player id");
                }
            }
            ServerMessage::PlayerJoin(join) => {
                if join.name.len() > MAX_NAME_LEN {
                    return Err("Player name too long");
                }
                verify_position(join.x, join.y)?;
            }
            ServerMessage::PlayerMove(mv) => verify_position(mv.x, mv.y)?,
            ServerMessage::ChunkData(data) => data.verify()?,
            ServerMessage::EntityUpdate(entity) | ServerMessage::EntityAdd(entity) => {
                let (x, y) = entity.position();
                verify_position(x, y)?;
                if entity.validate().is_err() {
                    return Err("Entity state malformed");
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn verify_position(x: f64, y: f64) -> Result<(), &'static str> {
    if !x.is_finite() || !y.is_finite() {
        return Err("Position not finite");
    }
    if x.abs() > MAX_COORDINATE || y.abs() > MAX_COORDINATE {
        return Err("Position out of range");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_stable() {
        let bytes: Vec<u8> = MessageTag::ALL.iter().map(|t| *t as u8).collect();
        assert_eq!(bytes, (1..=13).collect::<Vec<u8>>());
        assert_eq!(MessageTag::from_u8(11), Some(MessageTag::PlayerAction));
        assert_eq!(MessageTag::from_u8(0), None);
        assert_eq!(MessageTag::from_u8(20), None);
    }

    #[test]
    fn auth_name_limits() {
        let ok = ClientMessage::Auth(AuthRequest {
            name: "ada".into(),
            schema_hash: 1,
        });
        assert!(ok.verify().is_ok());
        let long = ClientMessage::Auth(AuthRequest {
            name: "x".repeat(MAX_NAME_LEN + 1),
            schema_hash: 1,
        });
        assert_eq!(long.verify(), Err("Player name too long"));
        let empty = ClientMessage::Auth(AuthRequest {
            name: String::new(),
            schema_hash: 1,
        });
        assert!(empty.verify().is_err());
    }

    #[test]
    fn non_finite_moves_are_rejected() {
        let mv = ClientMessage::PlayerMove(PlayerMove {
            id: 0,
            x: f64::INFINITY,
            y: 0.0,
        });
        assert_eq!(mv.verify(), Err("Position not finite"));
    }

    #[test]
    fn building_players_is_rejected_early() {
        let action = ActionRequest::Build {
            kind: EntityKind::Player,
            x: 0,
            y: 0,
            direction: Direction::North,
        };
        assert!(action.verify().is_err());
        assert_eq!(action.action_id(), 1);
        assert_eq!(
            ActionRequest::Destroy { entity_id: 4 }.action_id(),
            2
        );
    }

    #[test]
    fn action_converts_to_world_action() {
        let request = ActionRequest::Configure {
            entity_id: 9,
            recipe: Some(ItemKind::Circuit),
        };
        assert_eq!(
            PlayerAction::from(request),
            PlayerAction::Configure {
                entity_id: 9,
                recipe: Some(ItemKind::Circuit)
            }
        );
    }

    #[test]
    fn chunk_data_requires_full_grid() {
        let data = ChunkData {
            cx: 0,
            cy: 0,
            tiles: vec![1; 10],
            entities: Vec::new(),
        };
        assert!(data.verify().is_err());
    }
}
