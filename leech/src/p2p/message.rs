use bytes::{BufMut, Buf, Bytes, BytesMut};
use tokio_util::codec::{Encoder, Decoder};
use crate::{block::{BlockData, BlockInfo}, Bitfield};
use super::PeerError;

// Frames larger than this are treated as a protocol violation rather than buffered.
const MAX_FRAME_LEN: usize = 1 << 22;

const ID_CHOKE: u8 = 0;
const ID_UNCHOKE: u8 = 1;
const ID_INTERESTED: u8 = 2;
const ID_NOT_INTERESTED: u8 = 3;
const ID_HAVE: u8 = 4;
const ID_BITFIELD: u8 = 5;
const ID_REQUEST: u8 = 6;
const ID_PIECE: u8 = 7;
const ID_CANCEL: u8 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {

    // The keep alive message advises peers not to close the connection,
    // even if they haven’t received a message in some time. Carries nothing.
    KeepAlive,

    // A choke message tells a peer that no further requests will be satisfied.
    Choke,

    // Conversely unchoke signifies that requests from the peer will be served.
    Unchoke,

    // Notifies a peer that the client is interested in making requests for blocks.
    Interested,

    // Notifies a peer the client is no longer interested in requesting blocks.
    NotInterested,

    // Tells a peer that the client has a piece, referenced by the piece index.
    Have { idx: u32 },

    // Short form method of communicating to a peer what pieces a client has,
    // sent directly after the handshake.
    Bitfield(Bitfield),

    // Request for a block, referencing the piece index, the offset of the block
    // within the piece and its length (usually 16KB).
    Request(BlockInfo),

    // Block data, referencing piece index and block offset.
    Piece(BlockData),

    // The cancel message is sent to cancel a request for a block.
    Cancel(BlockInfo),

    // Any message id we don't know about, kept so callers can skip it.
    Unknown { id: u8, payload: Bytes },
}

impl Message {

    pub fn request(piece_idx: u32, offset: u32, len: u32) -> Message {
        Message::Request(BlockInfo { piece_idx, offset, len })
    }

    pub fn have(idx: u32) -> Message {
        Message::Have { idx }
    }

    // Wire id, none for keep alives.
    pub fn id(&self) -> Option<u8> {
        match self {
            Message::KeepAlive => None,
            Message::Choke => Some(ID_CHOKE),
            Message::Unchoke => Some(ID_UNCHOKE),
            Message::Interested => Some(ID_INTERESTED),
            Message::NotInterested => Some(ID_NOT_INTERESTED),
            Message::Have { .. } => Some(ID_HAVE),
            Message::Bitfield(_) => Some(ID_BITFIELD),
            Message::Request(_) => Some(ID_REQUEST),
            Message::Piece(_) => Some(ID_PIECE),
            Message::Cancel(_) => Some(ID_CANCEL),
            Message::Unknown { id, .. } => Some(*id),
        }
    }

    // Copies the block of a piece message into `buf`, see `BlockData::copy_into`.
    pub fn parse_piece(&self, expected_idx: u32, buf: &mut [u8]) -> Result<usize, PeerError> {
        match self {
            Message::Piece(block) => block.copy_into(expected_idx, buf),
            other => Err(PeerError::UnexpectedMessage(format!("expected piece, got {}", other))),
        }
    }
}

pub struct MessageCodec;

impl Encoder<Message> for MessageCodec {

    type Error = PeerError;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match msg {

            // [0, 0, 0, 0]
            Message::KeepAlive => dst.put_u32(0),

            // [0, 0, 0, 1, 0]
            Message::Choke => {
                dst.put_u32(1);
                dst.put_u8(ID_CHOKE);
            },

            // [0, 0, 0, 1, 1]
            Message::Unchoke => {
                dst.put_u32(1);
                dst.put_u8(ID_UNCHOKE);
            },

            // [0, 0, 0, 1, 2]
            Message::Interested => {
                dst.put_u32(1);
                dst.put_u8(ID_INTERESTED);
            },

            // [0, 0, 0, 1, 3]
            Message::NotInterested => {
                dst.put_u32(1);
                dst.put_u8(ID_NOT_INTERESTED);
            },

            // have: <len=0005><id=4><piece index>
            Message::Have { idx } => {
                dst.put_u32(5);
                dst.put_u8(ID_HAVE);
                dst.put_u32(idx);
            },

            // bitfield: <len=0001+X><id=5><bitfield>
            Message::Bitfield(bitfield) => {
                let bytes = bitfield.as_bytes();
                dst.put_u32(1 + bytes.len() as u32);
                dst.put_u8(ID_BITFIELD);
                dst.extend_from_slice(bytes);
            },

            // request: <len=0013><id=6><index><begin><length>
            Message::Request(block) => {
                dst.put_u32(13);
                dst.put_u8(ID_REQUEST);
                dst.put_u32(block.piece_idx);
                dst.put_u32(block.offset);
                dst.put_u32(block.len);
            },

            // piece: <len=0009+X><id=7><index><begin><block>
            Message::Piece(block) => {
                dst.put_u32(9 + block.data.len() as u32);
                dst.put_u8(ID_PIECE);
                dst.put_u32(block.piece_idx);
                dst.put_u32(block.offset);
                dst.extend_from_slice(&block.data);
            },

            // cancel: <len=0013><id=8><index><begin><length>
            Message::Cancel(block) => {
                dst.put_u32(13);
                dst.put_u8(ID_CANCEL);
                dst.put_u32(block.piece_idx);
                dst.put_u32(block.offset);
                dst.put_u32(block.len);
            },

            Message::Unknown { id, payload } => {
                dst.put_u32(1 + payload.len() as u32);
                dst.put_u8(id);
                dst.extend_from_slice(&payload);
            },
        }

        Ok(())
    }
}

impl Decoder for MessageCodec {

    type Item = Message;
    type Error = PeerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {

        // Can't read message length.
        if src.len() < 4 { return Ok(None); }

        let msg_len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if msg_len > MAX_FRAME_LEN {
            return Err(PeerError::Protocol(format!("frame of {} bytes too large", msg_len)));
        }

        if src.len() < 4 + msg_len {
            // Haven't recieved all of message.
            src.reserve(4 + msg_len - src.len());
            return Ok(None);
        }

        src.advance(4);
        if msg_len == 0 { return Ok(Some(Message::KeepAlive)); }

        // Parse from the frame alone so a bad payload can't desync the stream.
        let mut payload = src.split_to(msg_len);
        let id = payload.get_u8();

        let msg = match (id, payload.len()) {
            (ID_CHOKE, 0) => Message::Choke,
            (ID_UNCHOKE, 0) => Message::Unchoke,
            (ID_INTERESTED, 0) => Message::Interested,
            (ID_NOT_INTERESTED, 0) => Message::NotInterested,
            (ID_HAVE, 4) => Message::Have { idx: payload.get_u32() },
            (ID_HAVE, _) => return Err(PeerError::MalformedPayload("have")),
            (ID_BITFIELD, _) => Message::Bitfield(Bitfield::from_bytes(payload.to_vec())),
            (ID_REQUEST | ID_CANCEL, 12) => {
                let block = BlockInfo {
                    piece_idx: payload.get_u32(),
                    offset: payload.get_u32(),
                    len: payload.get_u32(),
                };
                if id == ID_REQUEST { Message::Request(block) } else { Message::Cancel(block) }
            },
            (ID_PIECE, len) if len >= 8 => {
                let piece_idx = payload.get_u32();
                let offset = payload.get_u32();
                Message::Piece(BlockData { piece_idx, offset, data: payload.freeze() })
            },
            (ID_PIECE, _) => return Err(PeerError::MalformedPayload("piece")),
            // Anything else is passed on untouched, including known ids with an
            // unexpected payload size, so the caller can skip it.
            (id, _) => Message::Unknown { id, payload: payload.freeze() },
        };

        Ok(Some(msg))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(msg) => Ok(Some(msg)),
            None if src.is_empty() => Ok(None),
            None => Err(PeerError::Truncated),
        }
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::KeepAlive => write!(f, "keep alive"),
            Message::Choke => write!(f, "choke"),
            Message::Unchoke => write!(f, "unchoke"),
            Message::Interested => write!(f, "interested"),
            Message::NotInterested => write!(f, "not interested"),
            Message::Have { idx } => write!(f, "have piece idx: {}", idx),
            Message::Bitfield(bf) => write!(f, "bitfield with {} pieces", bf.count_ones()),
            Message::Request(block) => write!(f, "request for block {{ piece idx: {}, offset {}, length: {} }}",
                block.piece_idx,
                block.offset,
                block.len,
            ),
            Message::Piece(block) => write!(f, "block data {{ piece idx: {}, offset: {}, length: {} }}",
                block.piece_idx,
                block.offset,
                block.data.len(),
            ),
            Message::Cancel(block) => write!(f, "cancel for block {{ piece idx: {}, offset: {}, length: {} }}",
                block.piece_idx,
                block.offset,
                block.len
            ),
            Message::Unknown { id, payload } => write!(f, "unknown message id {} with {} bytes", id, payload.len()),
        }
    }
}
