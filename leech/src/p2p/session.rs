use std::{collections::HashSet, net::SocketAddr, sync::Arc};
use sha1::{Digest, Sha1};
use tokio::{io::{AsyncRead, AsyncWrite}, sync::mpsc};
use crate::{torrent::TorrentContext, PieceWork};
use super::{download_piece, PeerConnection, PeerError, Result};

// Sent from sessions to the torrent.
#[derive(Debug)]
pub enum SessionReport {

    // Handshake and bitfield exchange succeeded.
    Connected { address: SocketAddr, num_pieces: usize },

    // A piece which passed hash verification.
    Piece { idx: u32, data: Vec<u8> },

    // A connected session has ended, nothing more follows from it.
    Disconnected { address: SocketAddr },

}

pub type ReportTx = mpsc::UnboundedSender<SessionReport>;
pub type ReportRx = mpsc::UnboundedReceiver<SessionReport>;

// A worker downloading pieces from a single peer.
#[derive(Debug)]
pub struct PeerSession {

    address: SocketAddr,

    // Read only state shared by all sessions of the torrent.
    torrent_ctx: Arc<TorrentContext>,

    report_tx: ReportTx,

    // Pieces from this peer which failed verification, never asked for again.
    // Only narrows this peer's choices, the piece stays queued for everyone else.
    rejected: HashSet<u32>,

}

impl PeerSession {

    pub fn new(address: SocketAddr, torrent_ctx: Arc<TorrentContext>, report_tx: ReportTx) -> Self {
        Self {
            address,
            torrent_ctx,
            report_tx,
            rejected: HashSet::new(),
        }
    }

    // Connects and downloads until there is no more work this peer can do.
    // Failures only end this session, they are never passed on.
    pub async fn start_session(mut self) {
        let conn = match PeerConnection::connect(
            self.address,
            self.torrent_ctx.info_hash,
            self.torrent_ctx.config.client_id,
            &self.torrent_ctx.config,
        ).await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!("connection failed: {}", e);
                return;
            },
        };

        self.report_tx.send(SessionReport::Connected {
            address: self.address,
            num_pieces: conn.bitfield.count_ones(),
        }).ok();

        match self.run(conn).await {
            Ok(()) => tracing::info!("session finished"),
            Err(e) => tracing::warn!("session ended: {}", e),
        }
        self.report_tx.send(SessionReport::Disconnected { address: self.address }).ok();
    }

    pub(crate) async fn run<S>(&mut self, mut conn: PeerConnection<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        conn.send_unchoke().await?;
        conn.send_interested().await?;

        loop {
            let rejected = &self.rejected;
            let bitfield = &conn.bitfield;
            let work = self.torrent_ctx.queue
                .pop_matching(|w| bitfield.has_piece(w.idx as usize) && !rejected.contains(&w.idx))
                .await;
            let Some(work) = work else {
                tracing::debug!("no more work from this peer");
                return Ok(());
            };

            match self.attempt(&mut conn, &work).await {
                Ok(data) => {
                    tracing::debug!("piece {} verified", work.idx);
                    self.report_tx.send(SessionReport::Piece { idx: work.idx, data }).ok();
                    self.torrent_ctx.queue.complete().await;
                    conn.send_have(work.idx).await?;
                },
                Err(e) if e.is_connection_fatal() => {
                    self.torrent_ctx.queue.requeue(work).await;
                    return Err(e);
                },
                Err(e) => {
                    tracing::warn!("{}", e);
                    self.rejected.insert(work.idx);
                    self.torrent_ctx.queue.requeue(work).await;
                },
            }
        }
    }

    async fn attempt<S>(&self, conn: &mut PeerConnection<S>, work: &PieceWork) -> Result<Vec<u8>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let data = download_piece(conn, work, &self.torrent_ctx.config).await?;
        if !verify_hash(&data, &work.hash) {
            return Err(PeerError::HashMismatch(work.idx));
        }
        Ok(data)
    }
}

// Hash the piece data and compare with hash given in metainfo.
pub fn verify_hash(data: &[u8], hash: &[u8; 20]) -> bool {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().as_slice() == hash
}
