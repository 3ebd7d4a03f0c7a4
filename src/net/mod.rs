//! Sockets with per-operation deadlines.

mod stream;
mod udp;

pub use stream::{TimeoutStream, HANDSHAKE_LEN};
pub use udp::{TimeoutUdp, UDP_HANDSHAKE_LEN};
