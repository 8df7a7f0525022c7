use std::{
    net::{SocketAddr, SocketAddrV4},
    sync::Arc,
    time::Instant,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::Instrument;
use crate::{
    disk::{DiskError, Output},
    info::TorrentInfo,
    metainfo::MetaInfoError,
    p2p::{PeerSession, ReportRx, ReportTx, SessionReport},
    stats::DownloadStats,
    tracker::TrackerError,
    work::WorkQueue,
    Bitfield,
    Config,
    DownloadEvent,
    EventTx,
    ID,
};

#[cfg(test)]
mod tests;

#[derive(Debug, thiserror::Error)]
pub enum TorrentError {

    #[error("no peers left with {remaining} of {total} pieces missing")]
    Exhausted { remaining: usize, total: usize },

    #[error("no peers found for torrent")]
    NoPeers,

    #[error("tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("metainfo error: {0}")]
    MetaInfo(#[from] MetaInfoError),

    #[error("disk error: {0}")]
    Disk(#[from] DiskError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("channel error: {0}")]
    Channel(String),
}

impl<T> From<mpsc::error::SendError<T>> for TorrentError {
    fn from(e: mpsc::error::SendError<T>) -> Self {
        TorrentError::Channel(e.to_string())
    }
}

impl From<tokio::task::JoinError> for TorrentError {
    fn from(e: tokio::task::JoinError) -> Self {
        TorrentError::Channel(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TorrentError>;

// Context is a read-only state accessible by peers in tasks.
#[derive(Debug)]
pub struct TorrentContext {

    pub info_hash: ID,

    // Pieces not yet downloaded, shared by every session.
    pub queue: WorkQueue,

    pub config: Config,

}

pub struct TorrentParams {

    pub info_hash: ID,

    pub piece_hashes: Vec<ID>,

    pub info: TorrentInfo,

    // Peers to start sessions with, at most `config.max_peers` of them are used.
    pub peers: Vec<SocketAddrV4>,

    pub output: Arc<dyn Output>,

    pub event_tx: Option<EventTx>,

    pub config: Config,

}

#[derive(Debug)]
pub struct Torrent {

    ctx: Arc<TorrentContext>,

    info: TorrentInfo,

    peers: Vec<SocketAddr>,

    output: Arc<dyn Output>,

    event_tx: Option<EventTx>,

    // Pieces verified and written to the output.
    own_bitfield: Bitfield,

    num_downloaded: usize,

    bytes_downloaded: u64,

    // Sessions past the handshake which haven't ended yet.
    num_peers: usize,

    start_time: Option<Instant>,

}

impl Torrent {

    pub fn new(params: TorrentParams) -> Self {
        let work = params.info.piece_work(&params.piece_hashes);
        let num_pieces = params.info.num_pieces as usize;

        let mut peers: Vec<SocketAddr> = params.peers.into_iter().map(SocketAddr::V4).collect();
        if params.config.max_peers > 0 {
            peers.truncate(params.config.max_peers);
        }

        Torrent {
            ctx: Arc::new(TorrentContext {
                info_hash: params.info_hash,
                queue: WorkQueue::new(work),
                config: params.config,
            }),
            info: params.info,
            peers,
            output: params.output,
            event_tx: params.event_tx,
            own_bitfield: Bitfield::new(num_pieces),
            num_downloaded: 0,
            bytes_downloaded: 0,
            num_peers: 0,
            start_time: None,
        }
    }

    // Downloads every piece, returning once all of them are written to the output
    // or no sessions remain to download the rest.
    #[tracing::instrument(skip_all, name = "torrent", fields(info_hash = %hex::encode(self.ctx.info_hash)))]
    pub async fn run(mut self) -> Result<()> {
        tracing::info!("starting torrent with {} pieces", self.info.num_pieces);
        self.start_time = Some(Instant::now());

        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let sessions = self.start_sessions(report_tx);

        let res = self.collect_pieces(report_rx).await;
        self.shutdown(sessions).await;

        match &res {
            Ok(()) => {
                tracing::info!("torrent download complete");
                self.send_event(DownloadEvent::Finished);
            },
            Err(e) => tracing::error!("torrent failed: {}", e),
        }
        res
    }

    fn start_sessions(&self, report_tx: ReportTx) -> Vec<JoinHandle<()>> {
        if self.peers.is_empty() {
            tracing::warn!("no peers to connect to");
        } else {
            tracing::info!("connecting to {} peers", self.peers.len());
        }

        // Our own sender is dropped on return, so the channel closes once every session has ended.
        self.peers
            .iter()
            .map(|address| {
                let session = PeerSession::new(*address, self.ctx.clone(), report_tx.clone());
                let span = tracing::info_span!("peer", address = %address);
                tokio::spawn(session.start_session().instrument(span))
            })
            .collect()
    }

    async fn collect_pieces(&mut self, mut report_rx: ReportRx) -> Result<()> {
        let total = self.info.num_pieces as usize;

        while self.num_downloaded < total {
            let Some(report) = report_rx.recv().await else {
                // Every session has ended with work left over.
                return Err(TorrentError::Exhausted {
                    remaining: total - self.num_downloaded,
                    total,
                });
            };

            match report {
                SessionReport::Connected { address, num_pieces } => {
                    self.num_peers += 1;
                    tracing::debug!("peer {} connected with {} pieces", address, num_pieces);
                },
                SessionReport::Disconnected { address } => {
                    self.num_peers = self.num_peers.saturating_sub(1);
                    tracing::debug!("peer {} disconnected, {} remain", address, self.num_peers);
                },
                SessionReport::Piece { idx, data } => self.handle_piece(idx, data).await?,
            }
        }
        Ok(())
    }

    async fn handle_piece(&mut self, idx: u32, data: Vec<u8>) -> Result<()> {
        if self.own_bitfield.has_piece(idx as usize) {
            tracing::warn!("piece {} already downloaded", idx);
            return Ok(());
        }

        let offset = self.info.piece_offset(idx);
        let len = data.len() as u64;
        let output = self.output.clone();
        tokio::task::spawn_blocking(move || output.write_at(offset, &data)).await??;

        self.own_bitfield.set_piece(idx as usize);
        self.num_downloaded += 1;
        self.bytes_downloaded += len;
        tracing::info!(
            "piece {} downloaded, {} pieces remain",
            idx,
            self.info.num_pieces as usize - self.num_downloaded,
        );

        self.send_event(DownloadEvent::Progress(self.stats()));
        Ok(())
    }

    // Releases sessions waiting for work and stops any still connecting.
    async fn shutdown(&mut self, sessions: Vec<JoinHandle<()>>) {
        self.ctx.queue.close().await;
        for handle in sessions.iter() {
            handle.abort();
        }
        for handle in sessions {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    tracing::warn!("session task failed: {}", e);
                }
            }
        }
    }

    pub fn stats(&self) -> DownloadStats {
        DownloadStats {
            num_pieces: self.info.num_pieces as usize,
            num_downloaded: self.num_downloaded,
            num_peers: self.num_peers,
            bytes_downloaded: self.bytes_downloaded,
            time_elapsed: self.start_time.map(|t| t.elapsed()).unwrap_or_default(),
        }
    }

    fn send_event(&self, event: DownloadEvent) {
        if let Some(tx) = &self.event_tx {
            // The listener going away doesn't stop the download.
            tx.send(event).ok();
        }
    }
}
