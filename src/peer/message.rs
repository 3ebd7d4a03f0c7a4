use super::PeerError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Information about a block within a piece
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Piece index
    pub piece_index: u32,
    /// Byte offset within the piece
    pub offset: u32,
    /// Length of the block
    pub length: u32,
}

impl BlockInfo {
    pub fn new(piece_index: u32, offset: u32, length: u32) -> Self {
        Self {
            piece_index,
            offset,
            length,
        }
    }
}

/// Messages exchanged between peers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    /// Keep-alive message (no payload)
    KeepAlive,
    /// Choke the peer
    Choke,
    /// Unchoke the peer
    Unchoke,
    /// Indicate interest
    Interested,
    /// Indicate lack of interest
    NotInterested,
    /// Indicate possession of a piece
    Have { piece_index: u32 },
    /// Bitfield of available pieces
    Bitfield { bitfield: Bytes },
    /// Request a block
    Request { block: BlockInfo },
    /// Send a block
    Piece {
        piece_index: u32,
        offset: u32,
        data: Bytes,
    },
    /// Cancel a block request
    Cancel { block: BlockInfo },
    /// A message type this client does not speak; its payload is dropped
    Unknown { id: u8 },
}

impl PeerMessage {
    /// Message type IDs
    const CHOKE: u8 = 0;
    const UNCHOKE: u8 = 1;
    const INTERESTED: u8 = 2;
    const NOT_INTERESTED: u8 = 3;
    const HAVE: u8 = 4;
    const BITFIELD: u8 = 5;
    const REQUEST: u8 = 6;
    const PIECE: u8 = 7;
    const CANCEL: u8 = 8;

    /// Serialize message to bytes
    /// Format: <length prefix><message ID><payload>
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();

        match self {
            PeerMessage::KeepAlive => {
                buf.put_u32(0); // length = 0
            }
            PeerMessage::Choke => {
                buf.put_u32(1); // length = 1
                buf.put_u8(Self::CHOKE);
            }
            PeerMessage::Unchoke => {
                buf.put_u32(1);
                buf.put_u8(Self::UNCHOKE);
            }
            PeerMessage::Interested => {
                buf.put_u32(1);
                buf.put_u8(Self::INTERESTED);
            }
            PeerMessage::NotInterested => {
                buf.put_u32(1);
                buf.put_u8(Self::NOT_INTERESTED);
            }
            PeerMessage::Have { piece_index } => {
                buf.put_u32(5); // length = 1 + 4
                buf.put_u8(Self::HAVE);
                buf.put_u32(*piece_index);
            }
            PeerMessage::Bitfield { bitfield } => {
                buf.put_u32((1 + bitfield.len()) as u32);
                buf.put_u8(Self::BITFIELD);
                buf.put_slice(bitfield);
            }
            PeerMessage::Request { block } => {
                buf.put_u32(13); // length = 1 + 4 + 4 + 4
                buf.put_u8(Self::REQUEST);
                put_block(&mut buf, block);
            }
            PeerMessage::Piece {
                piece_index,
                offset,
                data,
            } => {
                buf.put_u32((9 + data.len()) as u32);
                buf.put_u8(Self::PIECE);
                buf.put_u32(*piece_index);
                buf.put_u32(*offset);
                buf.put_slice(data);
            }
            PeerMessage::Cancel { block } => {
                buf.put_u32(13);
                buf.put_u8(Self::CANCEL);
                put_block(&mut buf, block);
            }
            PeerMessage::Unknown { id } => {
                buf.put_u32(1);
                buf.put_u8(*id);
            }
        }

        buf.to_vec()
    }

    /// Parse a message body, i.e. a frame with its length prefix removed.
    /// An empty body is a keep-alive.
    pub fn parse(mut body: Bytes) -> Result<Self, PeerError> {
        if body.is_empty() {
            return Ok(PeerMessage::KeepAlive);
        }

        let message_id = body.get_u8();

        match message_id {
            Self::CHOKE => Ok(PeerMessage::Choke),
            Self::UNCHOKE => Ok(PeerMessage::Unchoke),
            Self::INTERESTED => Ok(PeerMessage::Interested),
            Self::NOT_INTERESTED => Ok(PeerMessage::NotInterested),
            Self::HAVE => {
                need(&body, message_id, 4)?;
                Ok(PeerMessage::Have {
                    piece_index: body.get_u32(),
                })
            }
            Self::BITFIELD => Ok(PeerMessage::Bitfield { bitfield: body }),
            Self::REQUEST => {
                need(&body, message_id, 12)?;
                Ok(PeerMessage::Request {
                    block: get_block(&mut body),
                })
            }
            Self::PIECE => {
                need(&body, message_id, 8)?;
                let piece_index = body.get_u32();
                let offset = body.get_u32();
                Ok(PeerMessage::Piece {
                    piece_index,
                    offset,
                    data: body,
                })
            }
            Self::CANCEL => {
                need(&body, message_id, 12)?;
                Ok(PeerMessage::Cancel {
                    block: get_block(&mut body),
                })
            }
            id => Ok(PeerMessage::Unknown { id }),
        }
    }
}

fn need(body: &Bytes, id: u8, len: usize) -> Result<(), PeerError> {
    if body.len() < len {
        return Err(PeerError::Malformed { id, len: body.len() });
    }
    Ok(())
}

fn put_block(buf: &mut BytesMut, block: &BlockInfo) {
    buf.put_u32(block.piece_index);
    buf.put_u32(block.offset);
    buf.put_u32(block.length);
}

fn get_block(body: &mut Bytes) -> BlockInfo {
    let piece_index = body.get_u32();
    let offset = body.get_u32();
    let length = body.get_u32();
    BlockInfo::new(piece_index, offset, length)
}
