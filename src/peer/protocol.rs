use super::PeerError;
use crate::net::HANDSHAKE_LEN;

pub const PROTOCOL_STRING: &[u8] = b"BitTorrent protocol";

/// Reserved bytes we send and accept: no extensions
const RESERVED: [u8; 8] = [0u8; 8];

/// Handshake message for peer wire protocol
/// Format: <pstrlen><pstr><reserved><info_hash><peer_id>
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self {
            info_hash,
            peer_id,
        }
    }

    /// Serialize handshake to bytes
    /// Total: 1 + 19 + 8 + 20 + 20 = 68 bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HANDSHAKE_LEN);
        buf.push(PROTOCOL_STRING.len() as u8);
        buf.extend_from_slice(PROTOCOL_STRING);
        buf.extend_from_slice(&RESERVED);
        buf.extend_from_slice(&self.info_hash);
        buf.extend_from_slice(&self.peer_id);
        buf
    }

    /// Deserialize a handshake, checking the protocol header and reserved bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, PeerError> {
        if data.len() < HANDSHAKE_LEN {
            return Err(PeerError::HandshakeInvalid("handshake too short"));
        }

        let pstrlen = data[0] as usize;
        if pstrlen != PROTOCOL_STRING.len() {
            return Err(PeerError::HandshakeInvalid("invalid protocol string length"));
        }
        if &data[1..1 + pstrlen] != PROTOCOL_STRING {
            return Err(PeerError::HandshakeInvalid("invalid protocol string"));
        }
        // Extension bits (BEP-10 at byte 25, DHT at byte 27) are not accepted.
        // Most real clients set them and are rejected here.
        if data[20..28] != RESERVED {
            return Err(PeerError::HandshakeInvalid("unexpected reserved bytes"));
        }

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&data[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&data[48..68]);

        Ok(Handshake {
            info_hash,
            peer_id,
        })
    }

    /// Check a remote handshake against the one we sent.
    ///
    /// Any remote peer id is accepted except our own.
    pub fn verify_reply(&self, reply: &Handshake) -> Result<(), PeerError> {
        if reply.info_hash != self.info_hash {
            return Err(PeerError::HandshakeInvalid("info hash mismatch"));
        }
        if reply.peer_id == self.peer_id {
            return Err(PeerError::HandshakeInvalid("connected to ourselves"));
        }
        Ok(())
    }
}
