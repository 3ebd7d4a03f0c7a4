use super::{Bitset, Lengths, BLOCK_SIZE};
use crate::error::{BittorrentError, Result};
use crate::torrent::Pieces;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// What adding a block did to its piece
#[derive(Debug, PartialEq, Eq)]
pub enum BlockOutcome {
    /// More blocks are needed
    Pending,
    /// The block was already buffered
    Duplicate,
    /// All blocks arrived and the piece hash matched
    Verified(Vec<u8>),
    /// All blocks arrived but the piece hash did not match; the buffer is dropped
    Corrupt,
}

struct PartialPiece {
    data: Vec<u8>,
    received: Bitset,
}

/// Buffers blocks until a whole piece is present, then verifies it.
pub struct PieceManager {
    lengths: Lengths,
    pieces: Pieces,
    /// In-progress piece data
    downloading: HashMap<u32, PartialPiece>,
}

impl PieceManager {
    pub fn new(lengths: Lengths, pieces: Pieces) -> Self {
        Self {
            lengths,
            pieces,
            downloading: HashMap::new(),
        }
    }

    /// Add a block to a piece
    pub fn add_block(&mut self, piece_index: u32, offset: u32, data: &[u8]) -> Result<BlockOutcome> {
        let piece = self
            .pieces
            .get(piece_index)
            .copied()
            .ok_or_else(|| BittorrentError::Piece(format!("Invalid piece index {piece_index}")))?;

        if offset % BLOCK_SIZE != 0 {
            return Err(BittorrentError::Piece(format!(
                "Block offset {offset} of piece {piece_index} is not block aligned"
            )));
        }
        let block_index = offset / BLOCK_SIZE;
        match self.lengths.block(piece_index, block_index) {
            Some(block) if block.length as usize == data.len() => {}
            _ => {
                return Err(BittorrentError::Piece(format!(
                    "Block exceeds piece size: piece {piece_index} offset {offset} length {}",
                    data.len()
                )))
            }
        }

        let lengths = self.lengths;
        let partial = self.downloading.entry(piece_index).or_insert_with(|| PartialPiece {
            data: vec![0u8; lengths.piece_len(piece_index) as usize],
            received: Bitset::new(lengths.blocks_in_piece(piece_index) as usize),
        });

        if partial.received.test(block_index as usize) {
            return Ok(BlockOutcome::Duplicate);
        }

        let start = offset as usize;
        partial.data[start..start + data.len()].copy_from_slice(data);
        partial.received.set(block_index as usize);

        debug!(
            "Added block to piece {} at offset {} ({} bytes)",
            piece_index,
            offset,
            data.len()
        );

        if !partial.received.all() {
            return Ok(BlockOutcome::Pending);
        }

        let Some(partial) = self.downloading.remove(&piece_index) else {
            return Ok(BlockOutcome::Pending);
        };

        if piece.hash.matches(&partial.data) {
            info!("Piece {} verified", piece.index);
            Ok(BlockOutcome::Verified(partial.data))
        } else {
            warn!("Piece {} failed verification", piece.index);
            Ok(BlockOutcome::Corrupt)
        }
    }

    /// Number of pieces with at least one buffered block
    pub fn in_progress(&self) -> usize {
        self.downloading.len()
    }
}
