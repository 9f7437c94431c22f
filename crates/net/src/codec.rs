//! Message encoding and decoding with streaming framing.
//!
//! Frame format: `[length: u16 BE][tag: u8][body: postcard]`, where `length`
//! counts the tag and body. A read buffer may end mid-frame; the remainder is
//! kept until the next read completes it.

use crate::protocol::{
    AuthRequest, AuthResponse, ChunkData, ChunkRequest, ClientMessage, EntityRemove, MessageTag,
    PlayerJoin, PlayerLeave, PlayerMove, ServerMessage, SyncRequest, SyncResponse, WorldTick,
    ActionRequest, PROTOCOL_MAGIC, PROTOCOL_VERSION,
};
use blake3::Hash;
use ironworks_core::ItemKind;
use ironworks_world::{Entity, EntityKind, TileType};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Largest `length` a frame may declare.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

const LENGTH_PREFIX: usize = 2;

/// Everything that can go wrong turning bytes into messages. Any of these
/// drops the offending connection.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A frame declared zero length, so it cannot even carry a tag.
    #[error("frame too short: {0} bytes")]
    FrameTooShort(usize),
    /// Encoded message does not fit the u16 length prefix.
    #[error("frame too large: {0} bytes (max {MAX_FRAME_LEN})")]
    FrameTooLarge(usize),
    /// Tag byte is not in the catalogue.
    #[error("unknown message tag {0}")]
    UnknownTag(u8),
    /// Tag exists but is not valid in this direction.
    #[error("message tag {0:?} not accepted in this direction")]
    UnexpectedTag(MessageTag),
    /// Body failed to decode.
    #[error("payload decode failed: {0}")]
    Decode(postcard::Error),
    /// Body failed to encode.
    #[error("payload encode failed: {0}")]
    Encode(postcard::Error),
    /// Body decoded but left bytes over.
    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),
    /// Message decoded but violates a limit.
    #[error("limit violation: {0}")]
    Limit(&'static str),
}

/// Compute schema hash from protocol definitions.
///
/// Covers the protocol version, the tag catalogue and every id table a
/// payload can carry, so any change to them changes the hash.
pub fn compute_schema_hash() -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&PROTOCOL_VERSION.to_le_bytes());
    hasher.update(PROTOCOL_MAGIC);

    for tag in MessageTag::ALL {
        hasher.update(&[tag as u8]);
        hasher.update(format!("{tag:?}").as_bytes());
    }
    for tile in TileType::ALL {
        hasher.update(&[u8::from(tile)]);
        hasher.update(format!("{tile:?}").as_bytes());
    }
    for kind in EntityKind::ALL {
        hasher.update(&[u8::from(kind)]);
        hasher.update(format!("{kind:?}").as_bytes());
    }
    for item in ItemKind::ALL {
        hasher.update(item.name().as_bytes());
    }

    let hash: Hash = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[0..8]);
    u64::from_le_bytes(prefix)
}

fn frame(tag: MessageTag, body: &impl Serialize) -> Result<Vec<u8>, ProtocolError> {
    let payload = postcard::to_allocvec(body).map_err(ProtocolError::Encode)?;
    let length = 1 + payload.len();
    if length > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(length));
    }
    let mut out = Vec::with_capacity(LENGTH_PREFIX + length);
    out.extend_from_slice(&(length as u16).to_be_bytes());
    out.push(tag as u8);
    out.extend_from_slice(&payload);
    Ok(out)
}

fn body<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let (value, rest) = postcard::take_from_bytes(bytes).map_err(ProtocolError::Decode)?;
    if !rest.is_empty() {
        return Err(ProtocolError::TrailingBytes(rest.len()));
    }
    Ok(value)
}

/// Encode a client message as one frame.
pub fn encode_client_message(msg: &ClientMessage) -> Result<Vec<u8>, ProtocolError> {
    match msg {
        ClientMessage::Auth(m) => frame(msg.tag(), m),
        ClientMessage::PlayerMove(m) => frame(msg.tag(), m),
        ClientMessage::ChunkRequest(m) => frame(msg.tag(), m),
        ClientMessage::PlayerAction(m) => frame(msg.tag(), m),
        ClientMessage::Sync(m) => frame(msg.tag(), m),
    }
}

/// Encode a server message as one frame.
pub fn encode_server_message(msg: &ServerMessage) -> Result<Vec<u8>, ProtocolError> {
    match msg {
        ServerMessage::AuthResponse(m) => frame(msg.tag(), m),
        ServerMessage::PlayerJoin(m) => frame(msg.tag(), m),
        ServerMessage::PlayerLeave(m) => frame(msg.tag(), m),
        ServerMessage::PlayerMove(m) => frame(msg.tag(), m),
        ServerMessage::ChunkData(m) => frame(msg.tag(), m),
        ServerMessage::EntityUpdate(m) | ServerMessage::EntityAdd(m) => frame(msg.tag(), m),
        ServerMessage::EntityRemove(m) => frame(msg.tag(), m),
        ServerMessage::WorldTick(m) => frame(msg.tag(), m),
        ServerMessage::Sync(m) => frame(msg.tag(), m),
    }
}

fn split_tag(frame: &[u8]) -> Result<(MessageTag, &[u8]), ProtocolError> {
    let (&tag, rest) = frame
        .split_first()
        .ok_or(ProtocolError::FrameTooShort(frame.len()))?;
    let tag = MessageTag::from_u8(tag).ok_or(ProtocolError::UnknownTag(tag))?;
    Ok((tag, rest))
}

/// Decode and verify a client message from a frame body (tag + payload,
/// length prefix already stripped).
pub fn decode_client_frame(frame: &[u8]) -> Result<ClientMessage, ProtocolError> {
    let (tag, rest) = split_tag(frame)?;
    let msg = match tag {
        MessageTag::Auth => ClientMessage::Auth(body::<AuthRequest>(rest)?),
        MessageTag::PlayerMove => ClientMessage::PlayerMove(body::<PlayerMove>(rest)?),
        MessageTag::ChunkRequest => ClientMessage::ChunkRequest(body::<ChunkRequest>(rest)?),
        MessageTag::PlayerAction => ClientMessage::PlayerAction(body::<ActionRequest>(rest)?),
        MessageTag::Sync => ClientMessage::Sync(body::<SyncRequest>(rest)?),
        other => return Err(ProtocolError::UnexpectedTag(other)),
    };
    msg.verify().map_err(ProtocolError::Limit)?;
    Ok(msg)
}

/// Decode and verify a server message from a frame body.
pub fn decode_server_frame(frame: &[u8]) -> Result<ServerMessage, ProtocolError> {
    let (tag, rest) = split_tag(frame)?;
    let msg = match tag {
        MessageTag::AuthResponse => ServerMessage::AuthResponse(body::<AuthResponse>(rest)?),
        MessageTag::PlayerJoin => ServerMessage::PlayerJoin(body::<PlayerJoin>(rest)?),
        MessageTag::PlayerLeave => ServerMessage::PlayerLeave(body::<PlayerLeave>(rest)?),
        MessageTag::PlayerMove => ServerMessage::PlayerMove(body::<PlayerMove>(rest)?),
        MessageTag::ChunkData => ServerMessage::ChunkData(body::<ChunkData>(rest)?),
        MessageTag::EntityUpdate => ServerMessage::EntityUpdate(body::<Entity>(rest)?),
        MessageTag::EntityAdd => ServerMessage::EntityAdd(body::<Entity>(rest)?),
        MessageTag::EntityRemove => ServerMessage::EntityRemove(body::<EntityRemove>(rest)?),
        MessageTag::WorldTick => ServerMessage::WorldTick(body::<WorldTick>(rest)?),
        MessageTag::Sync => ServerMessage::Sync(body::<SyncResponse>(rest)?),
        other => return Err(ProtocolError::UnexpectedTag(other)),
    };
    msg.verify().map_err(ProtocolError::Limit)?;
    Ok(msg)
}

/// Reassembles frames from a byte stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes as they arrive from the socket.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes received but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Next complete frame body (tag + payload), or `None` if more bytes are needed.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        if self.buffer.len() < LENGTH_PREFIX {
            return Ok(None);
        }
        let length = u16::from_be_bytes([self.buffer[0], self.buffer[1]]) as usize;
        if length == 0 {
            return Err(ProtocolError::FrameTooShort(0));
        }
        if self.buffer.len() < LENGTH_PREFIX + length {
            return Ok(None);
        }
        let frame = self.buffer[LENGTH_PREFIX..LENGTH_PREFIX + length].to_vec();
        self.buffer.drain(..LENGTH_PREFIX + length);
        Ok(Some(frame))
    }

    /// Next complete, verified client message.
    pub fn next_client_message(&mut self) -> Result<Option<ClientMessage>, ProtocolError> {
        match self.next_frame()? {
            Some(frame) => decode_client_frame(&frame).map(Some),
            None => Ok(None),
        }
    }

    /// Next complete, verified server message.
    pub fn next_server_message(&mut self) -> Result<Option<ServerMessage>, ProtocolError> {
        match self.next_frame()? {
            Some(frame) => decode_server_frame(&frame).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MAX_CHUNK_COORDINATE;
    use ironworks_core::Direction;

    #[test]
    fn schema_hash_is_stable_and_non_zero() {
        assert_eq!(compute_schema_hash(), compute_schema_hash());
        assert_ne!(compute_schema_hash(), 0);
    }

    #[test]
    fn frame_layout() {
        let msg = ClientMessage::ChunkRequest(ChunkRequest { cx: 1, cy: 2 });
        let bytes = encode_client_message(&msg).unwrap();
        let length = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
        assert_eq!(length, bytes.len() - 2);
        assert_eq!(bytes[2], 6);
    }

    #[test]
    fn partial_frames_are_buffered() {
        let msg = ClientMessage::Auth(AuthRequest {
            name: "ada".into(),
            schema_hash: compute_schema_hash(),
        });
        let mut bytes = encode_client_message(&msg).unwrap();
        bytes.extend(encode_client_message(&ClientMessage::Sync(SyncRequest { client_time: 7 })).unwrap());

        let mut decoder = FrameDecoder::new();
        decoder.extend(&bytes[..1]);
        assert!(decoder.next_client_message().unwrap().is_none());
        decoder.extend(&bytes[1..5]);
        assert!(decoder.next_client_message().unwrap().is_none());
        decoder.extend(&bytes[5..]);
        assert_eq!(decoder.next_client_message().unwrap(), Some(msg));
        assert_eq!(
            decoder.next_client_message().unwrap(),
            Some(ClientMessage::Sync(SyncRequest { client_time: 7 }))
        );
        assert!(decoder.next_client_message().unwrap().is_none());
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn unknown_and_misdirected_tags_fail() {
        assert!(matches!(
            decode_client_frame(&[99, 0]),
            Err(ProtocolError::UnknownTag(99))
        ));
        assert!(matches!(
            decode_client_frame(&[MessageTag::WorldTick as u8, 0]),
            Err(ProtocolError::UnexpectedTag(MessageTag::WorldTick))
        ));
        assert!(matches!(
            decode_client_frame(&[]),
            Err(ProtocolError::FrameTooShort(0))
        ));
    }

    #[test]
    fn zero_length_frame_is_an_error() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&[0, 0, 1]);
        assert!(matches!(
            decoder.next_frame(),
            Err(ProtocolError::FrameTooShort(0))
        ));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let msg = ClientMessage::Sync(SyncRequest { client_time: 1 });
        let mut frame = encode_client_message(&msg).unwrap()[2..].to_vec();
        frame.push(0);
        assert!(matches!(
            decode_client_frame(&frame),
            Err(ProtocolError::TrailingBytes(1))
        ));
    }

    #[test]
    fn limits_apply_on_decode() {
        let msg = ClientMessage::PlayerAction(ActionRequest::Build {
            kind: EntityKind::Player,
            x: 0,
            y: 0,
            direction: Direction::East,
        });
        let bytes = encode_client_message(&msg).unwrap();
        assert!(matches!(
            decode_client_frame(&bytes[2..]),
            Err(ProtocolError::Limit(_))
        ));
    }

    #[test]
    fn extreme_coordinates_are_limit_errors() {
        let extremes = [
            ClientMessage::ChunkRequest(ChunkRequest { cx: i32::MIN, cy: 0 }),
            ClientMessage::ChunkRequest(ChunkRequest { cx: 0, cy: i32::MAX }),
            ClientMessage::PlayerAction(ActionRequest::Build {
                kind: EntityKind::Chest,
                x: i64::MIN,
                y: 0,
                direction: Direction::North,
            }),
            ClientMessage::PlayerAction(ActionRequest::Build {
                kind: EntityKind::Chest,
                x: 0,
                y: i64::MIN,
                direction: Direction::North,
            }),
        ];
        for msg in extremes {
            let bytes = encode_client_message(&msg).unwrap();
            assert!(
                matches!(decode_client_frame(&bytes[2..]), Err(ProtocolError::Limit(_))),
                "{msg:?} should be refused"
            );
        }

        let edge = ClientMessage::ChunkRequest(ChunkRequest {
            cx: -MAX_CHUNK_COORDINATE,
            cy: MAX_CHUNK_COORDINATE,
        });
        let bytes = encode_client_message(&edge).unwrap();
        assert_eq!(decode_client_frame(&bytes[2..]).unwrap(), edge);
    }

    #[test]
    fn oversized_payload_is_refused() {
        let entities = (0..4000)
            .map(|i| Entity::player(i, "x".repeat(20), 0.0, 0.0))
            .collect();
        let msg = ServerMessage::ChunkData(ChunkData {
            cx: 0,
            cy: 0,
            tiles: vec![1; ironworks_world::CHUNK_AREA],
            entities,
        });
        assert!(matches!(
            encode_server_message(&msg),
            Err(ProtocolError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn entity_messages_round_trip() {
        let mut chest = Entity::machine(5, EntityKind::Chest, -3, 7, Direction::West).unwrap();
        if let ironworks_world::EntityPayload::Chest(state) = &mut chest.payload {
            state.items.push_back(ItemKind::Circuit);
        }
        let msg = ServerMessage::EntityAdd(chest);
        let bytes = encode_server_message(&msg).unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.extend(&bytes);
        assert_eq!(decoder.next_server_message().unwrap(), Some(msg));
    }
}
