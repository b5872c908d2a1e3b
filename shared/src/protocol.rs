//! Command framing for the lobby relay.
//!
//! Every datagram carries exactly one command: a fixed 4-byte header
//! (`command_id`, `body_size`, both big-endian `u16`) followed by
//! `body_size` bytes whose layout is selected by the command id.
//!
//! Command ids are split into a client-originated block and a
//! server-originated block. The blocks never overlap, so an id alone tells
//! the receiver both the direction and the meaning of a command.

use crate::codec::{decode_i32, decode_u16, decode_u64, encode_i32, encode_u16, encode_u64};
use thiserror::Error;

/// Size of the fixed command header in bytes.
pub const HEADER_SIZE: usize = 4;

/// Largest datagram either side will send or accept.
pub const MAX_COMMAND_SIZE: usize = 4 << 10;

/// Encoded size of a [`PlayerTransform`] body.
pub const TRANSFORM_BODY_SIZE: usize = 16;

pub const VECTOR_BODY_SIZE: usize = 8;

// Client block
pub const C_CMD_PING: u16 = 1;
pub const C_CMD_JOIN: u16 = 2;
pub const C_CMD_TRANSFORM_PLAYER: u16 = 3;
pub const C_CMD_KEEP_ALIVE: u16 = 4;
pub const C_CMD_MAX: u16 = 5;

// Server block, starts after the client block's terminator
pub const S_CMD_PONG: u16 = C_CMD_MAX + 1;
pub const S_CMD_SET_SEED: u16 = C_CMD_MAX + 2;
pub const S_CMD_TRANSFORM_PLAYER: u16 = C_CMD_MAX + 3;
pub const S_CMD_PING: u16 = C_CMD_MAX + 4;
pub const S_CMD_PLAYER_DISCONNECTED: u16 = C_CMD_MAX + 5;
pub const S_CMD_MAX: u16 = C_CMD_MAX + 6;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed header: got {len} bytes, need 4")]
    MalformedHeader { len: usize },

    #[error("malformed body for command {command_id}: expected {expected} bytes, got {actual}")]
    MalformedBody {
        command_id: u16,
        expected: usize,
        actual: usize,
    },
}

/// Which side of the connection is allowed to originate a command id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

/// Every command id this protocol revision knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandId {
    /// Client asks for a `Pong`.
    ClientPing,
    /// Client joins the lobby, answered with `SetSeed`.
    Join,
    /// Client reports its own position. No response.
    ClientTransformPlayer,
    /// Client has nothing to say but wants its session kept alive.
    KeepAlive,
    Pong,
    SetSeed,
    /// Another player's position, relayed by the server.
    ServerTransformPlayer,
    /// Server probes a session that went quiet.
    ServerPing,
    PlayerDisconnected,
}

impl CommandId {
    pub fn from_u16(id: u16) -> Option<Self> {
        match id {
            C_CMD_PING => Some(Self::ClientPing),
            C_CMD_JOIN => Some(Self::Join),
            C_CMD_TRANSFORM_PLAYER => Some(Self::ClientTransformPlayer),
            C_CMD_KEEP_ALIVE => Some(Self::KeepAlive),
            S_CMD_PONG => Some(Self::Pong),
            S_CMD_SET_SEED => Some(Self::SetSeed),
            S_CMD_TRANSFORM_PLAYER => Some(Self::ServerTransformPlayer),
            S_CMD_PING => Some(Self::ServerPing),
            S_CMD_PLAYER_DISCONNECTED => Some(Self::PlayerDisconnected),
            _ => None,
        }
    }

    pub fn as_u16(self) -> u16 {
        match self {
            Self::ClientPing => C_CMD_PING,
            Self::Join => C_CMD_JOIN,
            Self::ClientTransformPlayer => C_CMD_TRANSFORM_PLAYER,
            Self::KeepAlive => C_CMD_KEEP_ALIVE,
            Self::Pong => S_CMD_PONG,
            Self::SetSeed => S_CMD_SET_SEED,
            Self::ServerTransformPlayer => S_CMD_TRANSFORM_PLAYER,
            Self::ServerPing => S_CMD_PING,
            Self::PlayerDisconnected => S_CMD_PLAYER_DISCONNECTED,
        }
    }

    pub fn direction(self) -> Direction {
        if self.as_u16() < C_CMD_MAX {
            Direction::ClientToServer
        } else {
            Direction::ServerToClient
        }
    }

    /// Dispatch table: the body layout registered for this command, if any.
    pub fn body_kind(self) -> Option<BodyKind> {
        match self {
            Self::Join | Self::PlayerDisconnected => Some(BodyKind::PlayerId),
            Self::SetSeed => Some(BodyKind::Seed),
            Self::ClientTransformPlayer | Self::ServerTransformPlayer => {
                Some(BodyKind::Transform)
            }
            Self::ClientPing | Self::KeepAlive | Self::Pong | Self::ServerPing => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandHeader {
    pub command_id: u16,
    pub body_size: u16,
}

pub fn marshal_header(header: &CommandHeader) -> [u8; HEADER_SIZE] {
    let mut bytes = [0u8; HEADER_SIZE];
    bytes[0..2].copy_from_slice(&encode_u16(header.command_id));
    bytes[2..4].copy_from_slice(&encode_u16(header.body_size));
    bytes
}

pub fn unmarshal_header(data: &[u8]) -> Result<CommandHeader, ProtocolError> {
    if data.len() < HEADER_SIZE {
        return Err(ProtocolError::MalformedHeader { len: data.len() });
    }

    Ok(CommandHeader {
        command_id: decode_u16([data[0], data[1]]),
        body_size: decode_u16([data[2], data[3]]),
    })
}

/// Two signed coordinates, X then Y.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Vector2 {
    pub x: i32,
    pub y: i32,
}

impl Vector2 {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    fn marshal(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&encode_i32(self.x));
        out.extend_from_slice(&encode_i32(self.y));
    }

    fn unmarshal(data: &[u8]) -> Option<Self> {
        if data.len() != VECTOR_BODY_SIZE {
            return None;
        }
        Some(Self {
            x: decode_i32([data[0], data[1], data[2], data[3]]),
            y: decode_i32([data[4], data[5], data[6], data[7]]),
        })
    }
}

/// The unit of player-position broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct PlayerTransform {
    pub id: u64,
    pub position: Vector2,
}

impl PlayerTransform {
    pub fn new(id: u64, x: i32, y: i32) -> Self {
        Self {
            id,
            position: Vector2::new(x, y),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    PlayerId,
    Seed,
    Transform,
}

impl BodyKind {
    pub fn encoded_len(self) -> usize {
        match self {
            Self::PlayerId => 8,
            Self::Seed => 4,
            Self::Transform => TRANSFORM_BODY_SIZE,
        }
    }

    fn unmarshal(self, command_id: u16, data: &[u8]) -> Result<Body, ProtocolError> {
        let malformed = || ProtocolError::MalformedBody {
            command_id,
            expected: self.encoded_len(),
            actual: data.len(),
        };

        if data.len() != self.encoded_len() {
            return Err(malformed());
        }

        match self {
            Self::PlayerId => {
                let mut id = [0u8; 8];
                id.copy_from_slice(data);
                Ok(Body::PlayerId(decode_u64(id)))
            }
            Self::Seed => Ok(Body::Seed(decode_i32([data[0], data[1], data[2], data[3]]))),
            Self::Transform => {
                let mut id = [0u8; 8];
                id.copy_from_slice(&data[0..8]);
                let position = Vector2::unmarshal(&data[8..16]).ok_or_else(malformed)?;
                Ok(Body::Transform(PlayerTransform {
                    id: decode_u64(id),
                    position,
                }))
            }
        }
    }
}

/// Typed command payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Body {
    PlayerId(u64),
    Seed(i32),
    Transform(PlayerTransform),
}

impl Body {
    pub fn kind(&self) -> BodyKind {
        match self {
            Self::PlayerId(_) => BodyKind::PlayerId,
            Self::Seed(_) => BodyKind::Seed,
            Self::Transform(_) => BodyKind::Transform,
        }
    }

    fn marshal(&self, out: &mut Vec<u8>) {
        match self {
            Self::PlayerId(id) => out.extend_from_slice(&encode_u64(*id)),
            Self::Seed(seed) => out.extend_from_slice(&encode_i32(*seed)),
            Self::Transform(transform) => {
                out.extend_from_slice(&encode_u64(transform.id));
                transform.position.marshal(out);
            }
        }
    }
}

/// One wire message: header plus optional typed body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub header: CommandHeader,
    pub body: Option<Body>,
}

impl Command {
    /// Builds a command whose header size always matches its body.
    pub fn new(id: CommandId, body: Option<Body>) -> Self {
        debug_assert_eq!(id.body_kind(), body.as_ref().map(Body::kind));

        let body_size = body.as_ref().map_or(0, |b| b.kind().encoded_len()) as u16;
        Self {
            header: CommandHeader {
                command_id: id.as_u16(),
                body_size,
            },
            body,
        }
    }

    pub fn ping() -> Self {
        Self::new(CommandId::ClientPing, None)
    }

    pub fn join(player_id: u64) -> Self {
        Self::new(CommandId::Join, Some(Body::PlayerId(player_id)))
    }

    pub fn transform_player(transform: PlayerTransform) -> Self {
        Self::new(CommandId::ClientTransformPlayer, Some(Body::Transform(transform)))
    }

    pub fn keep_alive() -> Self {
        Self::new(CommandId::KeepAlive, None)
    }

    pub fn pong() -> Self {
        Self::new(CommandId::Pong, None)
    }

    pub fn set_seed(seed: i32) -> Self {
        Self::new(CommandId::SetSeed, Some(Body::Seed(seed)))
    }

    pub fn relayed_transform(transform: PlayerTransform) -> Self {
        Self::new(CommandId::ServerTransformPlayer, Some(Body::Transform(transform)))
    }

    pub fn server_ping() -> Self {
        Self::new(CommandId::ServerPing, None)
    }

    pub fn player_disconnected(player_id: u64) -> Self {
        Self::new(CommandId::PlayerDisconnected, Some(Body::PlayerId(player_id)))
    }

    /// The decoded id, or `None` for ids this revision does not know.
    pub fn id(&self) -> Option<CommandId> {
        CommandId::from_u16(self.header.command_id)
    }

    pub fn transform(&self) -> Option<PlayerTransform> {
        match self.body {
            Some(Body::Transform(transform)) => Some(transform),
            _ => None,
        }
    }

    pub fn player_id(&self) -> Option<u64> {
        match self.body {
            Some(Body::PlayerId(id)) => Some(id),
            _ => None,
        }
    }

    pub fn seed(&self) -> Option<i32> {
        match self.body {
            Some(Body::Seed(seed)) => Some(seed),
            _ => None,
        }
    }
}

pub fn marshal_command(command: &Command) -> Vec<u8> {
    let mut data = Vec::with_capacity(HEADER_SIZE + command.header.body_size as usize);
    data.extend_from_slice(&marshal_header(&command.header));
    if let Some(body) = &command.body {
        body.marshal(&mut data);
    }

    debug_assert!(data.len() >= HEADER_SIZE);
    debug_assert_eq!(data.len(), HEADER_SIZE + command.header.body_size as usize);
    data
}

pub fn unmarshal_command(data: &[u8]) -> Result<Command, ProtocolError> {
    let header = unmarshal_header(data)?;

    let kind = CommandId::from_u16(header.command_id).and_then(CommandId::body_kind);
    let body = match kind {
        Some(kind) => {
            let end = HEADER_SIZE + header.body_size as usize;
            let slice = data
                .get(HEADER_SIZE..end)
                .ok_or(ProtocolError::MalformedBody {
                    command_id: header.command_id,
                    expected: header.body_size as usize,
                    actual: data.len() - HEADER_SIZE,
                })?;
            Some(kind.unmarshal(header.command_id, slice)?)
        }
        // Unknown ids and body-less commands decode header-only.
        None => None,
    };

    Ok(Command { header, body })
}
