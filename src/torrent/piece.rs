use crate::error::{BittorrentError, Result};
use sha1::{Digest, Sha1};

/// A 20-byte SHA1 hash representing a piece
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PieceHash([u8; 20]);

impl PieceHash {
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        let hash: [u8; 20] = slice.try_into().map_err(|_| {
            BittorrentError::InvalidTorrent("Piece hash must be 20 bytes".to_string())
        })?;
        Ok(Self(hash))
    }

    /// SHA1 of `data`
    pub fn of(data: &[u8]) -> Self {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&Sha1::digest(data));
        Self(hash)
    }

    /// Whether `data` hashes to this value
    pub fn matches(&self, data: &[u8]) -> bool {
        Self::of(data) == *self
    }

    #[cfg(test)]
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl AsRef<[u8]> for PieceHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// One entry of the piece table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Piece {
    pub index: u32,
    pub hash: PieceHash,
}

/// Ordered piece table built from the concatenated hash stream
#[derive(Debug, Clone)]
pub struct Pieces {
    pieces: Vec<Piece>,
}

impl Pieces {
    /// Parse pieces from concatenated SHA1 hashes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() % 20 != 0 {
            return Err(BittorrentError::InvalidTorrent(
                "Pieces length must be multiple of 20".to_string(),
            ));
        }

        let pieces = data
            .chunks_exact(20)
            .zip(0u32..)
            .map(|(chunk, index)| {
                Ok(Piece {
                    index,
                    hash: PieceHash::from_slice(chunk)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { pieces })
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn get(&self, index: u32) -> Option<&Piece> {
        self.pieces.get(index as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_piece_table() {
        let mut stream = Vec::new();
        stream.extend_from_slice(PieceHash::of(b"one").as_bytes());
        stream.extend_from_slice(PieceHash::of(b"two").as_bytes());

        let pieces = Pieces::from_bytes(&stream).unwrap();
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces.get(1).unwrap().index, 1);
        assert!(pieces.get(1).unwrap().hash.matches(b"two"));
        assert!(!pieces.get(0).unwrap().hash.matches(b"two"));
        assert!(pieces.get(2).is_none());
    }

    #[test]
    fn test_rejects_truncated_hash_stream() {
        assert!(Pieces::from_bytes(&[0u8; 30]).is_err());
    }
}
