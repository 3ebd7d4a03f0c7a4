mod bitset;
mod manager;
mod scheduler;

pub use bitset::Bitset;
pub use manager::{BlockOutcome, PieceManager};
pub use scheduler::Scheduler;

use crate::peer::BlockInfo;
use crate::torrent::TorrentInfo;

/// Standard block size (16 KB)
pub const BLOCK_SIZE: u32 = 16 * 1024;

/// Largest request length conventional peers accept
#[cfg(test)]
pub const MAX_REQUEST_LEN: u32 = 1 << 17;

/// Piece and block geometry of a torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lengths {
    total_length: u64,
    piece_length: u64,
    piece_count: u32,
}

impl Lengths {
    pub fn new(total_length: u64, piece_length: u64) -> Self {
        let piece_count = total_length.div_ceil(piece_length.max(1)) as u32;
        Self {
            total_length,
            piece_length,
            piece_count,
        }
    }

    pub fn from_info(info: &TorrentInfo) -> Self {
        Self::new(info.total_length, info.piece_length)
    }

    pub fn piece_count(&self) -> u32 {
        self.piece_count
    }

    /// Absolute byte offset of a piece within the torrent payload
    pub fn piece_offset(&self, index: u32) -> u64 {
        index as u64 * self.piece_length
    }

    /// Length of a piece; the last one is short. Zero past the end.
    pub fn piece_len(&self, index: u32) -> u32 {
        if index >= self.piece_count {
            return 0;
        }
        let start = self.piece_offset(index);
        (self.total_length - start).min(self.piece_length) as u32
    }

    /// Get the number of blocks in a piece
    pub fn blocks_in_piece(&self, index: u32) -> u32 {
        self.piece_len(index).div_ceil(BLOCK_SIZE)
    }

    /// Request parameters of one block; the last block of a piece is short.
    pub fn block(&self, index: u32, block_index: u32) -> Option<BlockInfo> {
        let piece_len = self.piece_len(index);
        let offset = block_index.checked_mul(BLOCK_SIZE)?;
        if offset >= piece_len {
            return None;
        }
        let length = BLOCK_SIZE.min(piece_len - offset);
        Some(BlockInfo::new(index, offset, length))
    }

    /// Every block of a piece from `first_block` on.
    pub fn blocks_from(&self, index: u32, first_block: u32) -> impl Iterator<Item = BlockInfo> + '_ {
        (first_block..self.blocks_in_piece(index)).filter_map(move |b| self.block(index, b))
    }
}
