use std::net::SocketAddr;
use futures::{SinkExt, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    time,
};
use tokio_util::codec::Framed;
use crate::{Bitfield, Config, ID};
use super::{handshake::*, message::*, PeerError, Result};

// A live connection to a single peer, past the handshake and bitfield exchange.
// Owned by exactly one session.
pub struct PeerConnection<S = TcpStream> {

    socket: Framed<S, MessageCodec>,

    // Whether the peer is refusing our requests, peers start out choking.
    pub choked: bool,

    // Pieces the peer has told us it has.
    pub bitfield: Bitfield,

    // Id the peer sent in its handshake.
    pub peer_id: ID,

}

impl PeerConnection<TcpStream> {

    pub async fn connect(
        address: SocketAddr,
        info_hash: ID,
        client_id: ID,
        config: &Config,
    ) -> Result<Self> {
        let stream = time::timeout(config.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| PeerError::Connect(std::io::ErrorKind::TimedOut.into()))?
            .map_err(PeerError::Connect)?;
        tracing::trace!("outbound connection successful");
        Self::establish(stream, info_hash, client_id, config).await
    }
}

impl<S> PeerConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{

    // Runs the handshake and bitfield exchange over an already open stream.
    pub async fn establish(stream: S, info_hash: ID, client_id: ID, config: &Config) -> Result<Self> {

        let mut socket = Framed::new(stream, HandshakeCodec);
        let handshake = time::timeout(
            config.handshake_timeout,
            exchange_handshake(&mut socket, info_hash, client_id),
        ).await??;

        // Switch from handshake to message codec, keeping anything already buffered.
        let mut socket = socket.map_codec(|_| MessageCodec);
        let bitfield = time::timeout(config.bitfield_timeout, receive_bitfield(&mut socket)).await??;
        tracing::info!("peer connected, has {} pieces", bitfield.count_ones());

        Ok(PeerConnection {
            socket,
            choked: true,
            bitfield,
            peer_id: handshake.peer_id,
        })
    }

    // Logs a message and sends to peer.
    pub async fn send(&mut self, msg: Message) -> Result<()> {
        tracing::trace!("send: {}", msg);
        self.socket.send(msg).await
    }

    pub async fn send_interested(&mut self) -> Result<()> {
        self.send(Message::Interested).await
    }

    pub async fn send_unchoke(&mut self) -> Result<()> {
        self.send(Message::Unchoke).await
    }

    pub async fn send_request(&mut self, idx: u32, offset: u32, len: u32) -> Result<()> {
        self.send(Message::request(idx, offset, len)).await
    }

    pub async fn send_have(&mut self, idx: u32) -> Result<()> {
        self.send(Message::have(idx)).await
    }

    // Waits for the next message, keep alives included.
    pub async fn receive(&mut self) -> Result<Message> {
        let msg = read_message(&mut self.socket).await?;
        tracing::trace!("read: {}", msg);
        Ok(msg)
    }

    // Applies choke and have messages to the peer state, returns whether the
    // message was one of them.
    pub fn update_state(&mut self, msg: &Message) -> bool {
        match msg {
            Message::Choke => {
                if !self.choked {
                    tracing::debug!("choked by peer");
                }
                self.choked = true;
            },
            Message::Unchoke => {
                if self.choked {
                    tracing::debug!("unchoked by peer");
                }
                self.choked = false;
            },
            Message::Have { idx } => self.bitfield.set_piece(*idx as usize),
            _ => return false,
        }
        true
    }
}

// We always initiate, so send ours first and expect the same torrent back.
async fn exchange_handshake<S>(
    socket: &mut Framed<S, HandshakeCodec>,
    info_hash: ID,
    client_id: ID,
) -> Result<Handshake>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    tracing::trace!("send handshake");
    socket.send(Handshake::new(info_hash, client_id)).await?;

    let handshake = match socket.next().await {
        Some(handshake) => handshake?,
        None => return Err(PeerError::Truncated),
    };
    tracing::debug!("read: {:?}", handshake);

    if handshake.info_hash != info_hash {
        return Err(PeerError::IncorrectInfoHash);
    }
    Ok(handshake)
}

// The first message after the handshake has to be the bitfield.
async fn receive_bitfield<S>(socket: &mut Framed<S, MessageCodec>) -> Result<Bitfield>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match read_message(socket).await? {
        Message::Bitfield(bitfield) => Ok(bitfield),
        other => Err(PeerError::UnexpectedMessage(format!("expected bitfield, got {}", other))),
    }
}

async fn read_message<S>(socket: &mut Framed<S, MessageCodec>) -> Result<Message>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match socket.next().await {
        Some(msg) => msg,
        None => Err(PeerError::Io(std::io::ErrorKind::UnexpectedEof.into())),
    }
}
