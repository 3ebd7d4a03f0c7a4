use crate::bencode::BencodeError;
use crate::peer::PeerError;
use crate::tracker::TrackerError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BittorrentError {
    #[error("bencode error: {0}")]
    Bencode(#[from] BencodeError),

    #[error("invalid torrent file: {0}")]
    InvalidTorrent(String),

    #[error("tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("peer error: {0}")]
    Peer(#[from] PeerError),

    #[error("piece error: {0}")]
    Piece(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unsafe path in torrent: {0}")]
    UnsafePath(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("torrent has no usable tracker URL")]
    NoTrackers,

    #[error("no peers available for {0} seconds")]
    NoPeers(u64),

    #[error("operation cancelled")]
    Cancelled,
}

impl BittorrentError {
    /// Process exit code summarising this error for the CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            BittorrentError::Cancelled => 130,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, BittorrentError>;
