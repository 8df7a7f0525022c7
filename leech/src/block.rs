use bytes::Bytes;
use crate::p2p::PeerError;

// Block data received in a piece message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockData {

    // Index of piece that the block is contained in.
    pub piece_idx: u32,

    // Offset in bytes of block within piece.
    pub offset: u32,

    // Data of block.
    pub data: Bytes,

}

// Describes a block in request and cancel messages.
#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy)]
pub struct BlockInfo {

    pub piece_idx: u32,

    pub offset: u32,

    pub len: u32,

}

impl BlockData {

    // Copies the block into the buffer of the piece we expect it to belong to,
    // returning the number of bytes copied. The buffer is untouched on error.
    pub fn copy_into(&self, expected_idx: u32, buf: &mut [u8]) -> Result<usize, PeerError> {
        if self.piece_idx != expected_idx {
            return Err(PeerError::PieceMismatch {
                expected: expected_idx,
                actual: self.piece_idx,
            });
        }
        let start = self.offset as usize;
        let end = start
            .checked_add(self.data.len())
            .filter(|end| start < buf.len() && *end <= buf.len())
            .ok_or(PeerError::BlockOutOfBounds {
                offset: self.offset,
                len: self.data.len(),
                piece_len: buf.len(),
            })?;
        buf[start..end].copy_from_slice(&self.data);
        Ok(self.data.len())
    }
}

// Length of the block starting at `requested` bytes into a piece.
pub fn block_len(piece_len: usize, requested: usize, block_size: usize) -> usize {
    block_size.min(piece_len - requested)
}

pub fn num_blocks(piece_len: usize, block_size: usize) -> usize {
    (piece_len + (block_size - 1)) / block_size
}
