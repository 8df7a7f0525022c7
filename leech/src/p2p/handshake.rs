use bytes::{BufMut, Buf, Bytes, BytesMut};
use tokio_util::codec::{Encoder, Decoder};
use crate::ID;
use super::PeerError;

pub const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";

// Bytes following the protocol string: reserved, info hash and peer id.
const HANDSHAKE_TAIL_LEN: usize = 8 + 20 + 20;

#[derive(Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol:   Bytes,
    pub reserved:   [u8; 8],
    pub info_hash:  ID,
    pub peer_id:    ID,
}

impl Handshake {
    pub fn new(info_hash: ID, peer_id: ID) -> Self {
        Self {
            protocol:   Bytes::from_static(PROTOCOL),
            reserved:   [0; 8],
            info_hash,
            peer_id,
        }
    }

    // Length of the encoded handshake.
    pub fn encoded_len(&self) -> usize {
        1 + self.protocol.len() + HANDSHAKE_TAIL_LEN
    }

    pub fn to_bytes(&self) -> Result<Bytes, PeerError> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        HandshakeCodec.encode(self.clone(), &mut buf)?;
        Ok(buf.freeze())
    }
}

pub struct HandshakeCodec;

impl Encoder<Handshake> for HandshakeCodec {

    type Error = PeerError;

    fn encode(&mut self, item: Handshake, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let protocol_len = u8::try_from(item.protocol.len())
            .ok()
            .filter(|len| *len > 0)
            .ok_or_else(|| PeerError::Protocol(format!("bad protocol length {}", item.protocol.len())))?;

        dst.reserve(item.encoded_len());
        dst.put_u8(protocol_len);
        dst.extend_from_slice(&item.protocol);
        dst.extend_from_slice(&item.reserved);
        dst.extend_from_slice(&item.info_hash);
        dst.extend_from_slice(&item.peer_id);
        Ok(())
    }
}

impl Decoder for HandshakeCodec {

    type Item = Handshake;
    type Error = PeerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {

        if src.is_empty() {
            return Ok(None);
        }

        let protocol_len = src[0] as usize;
        if protocol_len == 0 {
            return Err(PeerError::ZeroLengthProtocol);
        }

        let total_len = 1 + protocol_len + HANDSHAKE_TAIL_LEN;
        if src.len() < total_len {
            // Handshake not fully recieved.
            src.reserve(total_len - src.len());
            return Ok(None);
        }

        src.advance(1);
        let protocol = src.split_to(protocol_len).freeze();

        let mut reserved = [0; 8];
        src.copy_to_slice(&mut reserved);

        let mut info_hash = [0; 20];
        src.copy_to_slice(&mut info_hash);

        let mut peer_id = [0; 20];
        src.copy_to_slice(&mut peer_id);

        Ok(Some(Handshake {
            protocol,
            reserved,
            info_hash,
            peer_id,
        }))
    }

    // The stream ended, anything left over is a partial handshake.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(handshake) => Ok(Some(handshake)),
            None if src.is_empty() => Ok(None),
            None => Err(PeerError::Truncated),
        }
    }
}

impl std::fmt::Debug for Handshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handshake")
            .field("protocol", &String::from_utf8_lossy(&self.protocol))
            .field("reserved", &self.reserved)
            .field("info_hash", &hex::encode(self.info_hash))
            .field("peer_id", &String::from_utf8_lossy(&self.peer_id))
            .finish()
    }
}
