use bitvec::{order::Msb0, vec::BitVec};

// Bit per piece, most significant bit first within each byte, as sent on the wire.
// A set bit means the piece is present.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bitfield(BitVec<u8, Msb0>);

impl Bitfield {

    // Bitfield with room for at least `num_pieces` bits, all unset.
    pub fn new(num_pieces: usize) -> Self {
        let num_bytes = (num_pieces + 7) / 8;
        Self::from_bytes(vec![0; num_bytes])
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(BitVec::from_vec(bytes))
    }

    // Out of range indices are reported as not present.
    pub fn has_piece(&self, idx: usize) -> bool {
        self.0.get(idx).map(|bit| *bit).unwrap_or(false)
    }

    // Out of range indices are ignored.
    pub fn set_piece(&mut self, idx: usize) {
        if let Some(mut bit) = self.0.get_mut(idx) {
            *bit = true;
        }
    }

    // Number of addressable bits, always a multiple of 8.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn count_ones(&self) -> usize {
        self.0.count_ones()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_raw_slice()
    }
}
