mod handshake;
mod message;
mod connection;
mod piece;
mod session;

pub use handshake::{Handshake, HandshakeCodec, PROTOCOL};
pub use message::{Message, MessageCodec};
pub use connection::PeerConnection;
pub use piece::{download_piece, PieceProgress};
pub use session::{verify_hash, PeerSession, ReportRx, ReportTx, SessionReport};

#[cfg(test)]
pub(crate) use connection::tests as test_util;

pub type Result<T, E = PeerError> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum PeerError {

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to connect: {0}")]
    Connect(std::io::Error),

    #[error("handshake provided zero length protocol")]
    ZeroLengthProtocol,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("connection closed mid-frame")]
    Truncated,

    #[error("handshake provided incorrect info-hash")]
    IncorrectInfoHash,

    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("malformed {0} payload")]
    MalformedPayload(&'static str),

    #[error("expected block for piece {expected}, got piece {actual}")]
    PieceMismatch { expected: u32, actual: u32 },

    #[error("block at offset {offset} with length {len} outside piece of length {piece_len}")]
    BlockOutOfBounds { offset: u32, len: usize, piece_len: usize },

    #[error("connection timeout")]
    Timeout,

    #[error("piece {0} failed hash verification")]
    HashMismatch(u32),

}

impl PeerError {
    // Every error apart from a failed hash check means the connection can't be trusted
    // to make further progress.
    pub fn is_connection_fatal(&self) -> bool {
        !matches!(self, PeerError::HashMismatch(_))
    }
}

impl From<tokio::time::error::Elapsed> for PeerError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        PeerError::Timeout
    }
}
