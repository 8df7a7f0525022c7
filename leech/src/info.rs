use crate::{metainfo::MetaInfo, ID};

// Piece geometry of a torrent, very widely used, often cloned but is cheap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentInfo {

    pub total_len: u64,

    pub piece_len: usize,

    pub last_piece_len: usize,

    pub num_pieces: u32,

}

// A single unit of work, one per piece, never mutated once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceWork {

    pub idx: u32,

    // Piece hash originally given in metainfo.
    pub hash: ID,

    // Length of piece in bytes, only the last piece may be shorter.
    pub len: usize,

}

impl TorrentInfo {

    pub fn new(metainfo: &MetaInfo) -> Self {
        Self::from_lengths(metainfo.total_len(), metainfo.piece_len(), metainfo.num_pieces())
    }

    pub fn from_lengths(total_len: u64, piece_len: usize, num_pieces: u32) -> Self {
        let last_piece_len = if num_pieces == 0 {
            0
        } else {
            (total_len - (piece_len as u64 * (num_pieces as u64 - 1))) as usize
        };

        Self {
            total_len,
            piece_len,
            last_piece_len,
            num_pieces,
        }
    }

    // Returns length of piece given its index.
    pub fn piece_len(&self, idx: u32) -> usize {
        if idx + 1 == self.num_pieces {
            self.last_piece_len
        } else {
            self.piece_len
        }
    }

    // Absolute byte offset of a piece in the output.
    pub fn piece_offset(&self, idx: u32) -> u64 {
        idx as u64 * self.piece_len as u64
    }

    // The work catalogue, in piece order.
    pub fn piece_work(&self, piece_hashes: &[ID]) -> Vec<PieceWork> {
        debug_assert_eq!(piece_hashes.len(), self.num_pieces as usize);
        piece_hashes
            .iter()
            .enumerate()
            .map(|(idx, hash)| PieceWork {
                idx: idx as u32,
                hash: *hash,
                len: self.piece_len(idx as u32),
            })
            .collect()
    }
}
