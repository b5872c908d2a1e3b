//! Wire-level building blocks shared by the lobby server and client.
//!
//! - [`codec`]: big-endian fixed-width integers and the zigzag transform
//! - [`protocol`]: command ids, header/body framing and the body dispatch table
//! - [`shutdown`]: the cancellation signal both runtimes hand to their tasks

pub mod codec;
pub mod protocol;
pub mod shutdown;

pub use protocol::{
    marshal_command, marshal_header, unmarshal_command, unmarshal_header, Body, BodyKind,
    Command, CommandHeader, CommandId, Direction, PlayerTransform, ProtocolError, Vector2,
    HEADER_SIZE, MAX_COMMAND_SIZE,
};

use std::time::Duration;

/// Default deadline for a single socket read or write.
pub const IO_TIMEOUT: Duration = Duration::from_secs(1);
