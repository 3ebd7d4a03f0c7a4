use crate::bencode::BencodeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("unsupported tracker URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid tracker URL: {0}")]
    InvalidUrl(String),

    #[error("could not resolve tracker host {0}")]
    Resolve(String),

    #[error("tracker answered with HTTP status {0}")]
    HttpStatus(u16),

    #[error("tracker failure: {0}")]
    Failure(String),

    #[error("transaction id mismatch: sent {sent:#010x}, got {got:#010x}")]
    TransactionMismatch { sent: u32, got: u32 },

    #[error("unexpected tracker action {0}")]
    UnexpectedAction(u32),

    #[error("tracker response too short: {0} bytes")]
    ShortResponse(usize),

    #[error("unexpected peers encoding")]
    UnexpectedPeersEncoding,

    #[error("tracker response missing '{0}'")]
    MissingField(&'static str),

    #[error("malformed tracker response: {0}")]
    Bencode(#[from] BencodeError),

    #[error("tracker timed out")]
    Timeout,

    #[error("tracker I/O error: {0}")]
    Io(std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("announce cancelled")]
    Cancelled,
}

impl From<std::io::Error> for TrackerError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut => TrackerError::Timeout,
            _ => TrackerError::Io(e),
        }
    }
}
