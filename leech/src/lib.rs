use std::path::Path;
use tokio::sync::mpsc;

mod config;
mod metainfo;
mod info;
mod bitfield;
mod block;
mod work;
mod disk;
mod torrent;
pub mod p2p;
pub mod tracker;
pub mod stats;

// Most commonly used block size - 16KB.
pub const BLOCK_SIZE: usize = 0x4000;

// Number of unfulfilled block requests we keep in flight with a single peer.
pub const MAX_BACKLOG: usize = 5;

// 20 byte SHA1 hash, used for info hashes, piece hashes and peer ids.
pub type ID = [u8; 20];

// Events the users of the library can listen to while a download runs.
#[derive(Debug)]
pub enum DownloadEvent {

    // Sent every time a piece has been verified and written.
    Progress(stats::DownloadStats),

    // Sent once every piece has been written.
    Finished,

}

pub type EventTx = mpsc::UnboundedSender<DownloadEvent>;
pub type EventRx = mpsc::UnboundedReceiver<DownloadEvent>;

// Re-exports
pub use config::Config;
pub use bitfield::Bitfield;
pub use metainfo::{MetaInfo, MetaInfoError};
pub use info::{PieceWork, TorrentInfo};
pub use disk::{DiskError, FileOutput, MemoryOutput, Output};
pub use torrent::{Torrent, TorrentError, TorrentParams};
pub use tracker::{discover_peers, TrackerError};

// Discovers peers for the torrent and downloads it to `dest`.
// Progress is reported through `event_tx` if one is provided.
pub async fn download(
    metainfo: &MetaInfo,
    dest: impl AsRef<Path>,
    config: Config,
    event_tx: Option<EventTx>,
) -> Result<(), TorrentError> {

    let peers = discover_peers(metainfo, &config).await?;
    if peers.is_empty() {
        return Err(TorrentError::NoPeers);
    }

    let info = TorrentInfo::new(metainfo);
    let output = FileOutput::create(dest.as_ref(), info.total_len)?;

    let torrent = Torrent::new(TorrentParams {
        info_hash: metainfo.info_hash(),
        piece_hashes: metainfo.piece_hashes(),
        info,
        peers,
        output: std::sync::Arc::new(output),
        event_tx,
        config,
    });

    torrent.run().await
}
