use shared::ProtocolError;
use std::io;
use thiserror::Error;

/// Errors surfaced by the client's blocking operations.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("received unexpected command back (got {got}; want {want})")]
    UnexpectedCommand { got: u16, want: u16 },

    #[error("client runtime has shut down")]
    Closed,

    #[error("invalid server address {0:?}")]
    InvalidAddress(String),

    #[error("unsupported transport {0:?}, expected udp, udp4 or udp6")]
    UnsupportedTransport(String),

    #[error("invalid client configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("not connected")]
    NotConnected,
}

pub type ClientResult<T> = Result<T, ClientError>;
