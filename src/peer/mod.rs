//! Peer wire protocol: message codec, handshake and the per-peer download session.

mod message;
mod protocol;
mod session;

pub use message::{BlockInfo, PeerMessage};
pub use protocol::Handshake;
pub use session::{PeerContext, PeerSession};

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PeerError {
    #[error("invalid handshake: {0}")]
    HandshakeInvalid(&'static str),

    #[error("peer timed out")]
    Timeout,

    #[error("peer closed the connection")]
    Closed,

    #[error("message exceeds size limit: {0}")]
    MessageTooLarge(String),

    #[error("malformed message type {id} with {len} payload bytes")]
    Malformed { id: u8, len: usize },

    #[error("block {offset} of piece {piece_index} has {got} bytes, requested {want}")]
    BlockLength {
        piece_index: u32,
        offset: u32,
        want: u32,
        got: usize,
    },

    #[error("peer kept us choked too long")]
    Choked,

    #[error("piece writer has shut down")]
    WriterClosed,

    #[error("peer I/O error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for PeerError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut => PeerError::Timeout,
            io::ErrorKind::UnexpectedEof => PeerError::Closed,
            io::ErrorKind::InvalidData => PeerError::MessageTooLarge(e.to_string()),
            _ => PeerError::Io(e),
        }
    }
}

/// Choke and interest flags of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerState {
    /// Whether we are choking the peer
    pub am_choking: bool,
    /// Whether we are interested in the peer
    pub am_interested: bool,
    /// Whether the peer is choking us
    pub peer_choking: bool,
    /// Whether the peer is interested in us
    pub peer_interested: bool,
}

impl Default for PeerState {
    fn default() -> Self {
        Self {
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
        }
    }
}
