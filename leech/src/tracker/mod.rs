use std::net::{Ipv4Addr, SocketAddrV4};
use bytes::Buf;
use tokio::time;
use tracing::Instrument;
use url::Url;
use crate::{metainfo::MetaInfo, Config, ID};

mod http;
mod udp;
pub use udp::UdpTracker;
pub use http::HttpTracker;

pub type Result<T> = std::result::Result<T, TrackerError>;

#[derive(thiserror::Error, Debug)]
pub enum TrackerError {

    #[error("request error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("error deserializing response: {0}")]
    BencodeError(#[from] serde_bencode::Error),

    #[error("timeout")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("invalid url")]
    InvalidUrl,

    #[error("unsupported tracker scheme: {0}")]
    UnsupportedScheme(String),

    #[error("compact peer list length {0} not a multiple of 6")]
    InvalidPeers(usize),

    #[error("response error: {0}")]
    ResponseError(String),

}

#[async_trait::async_trait]
pub trait Tracker: Send + Sync {

    async fn announce(&mut self, params: AnnounceParams) -> Result<Vec<SocketAddrV4>>;

}

#[derive(Debug, Copy, Clone, Default)]
pub struct AnnounceParams {

    // Hash of info dict.
    pub info_hash:  ID,

    // Urlencoded 20-byte string used as a unique ID for the client.
    pub client_id:  ID,

    // Port number.
    pub port:       u16,

    // The total amount uploaded so far.
    pub uploaded:   u64,

    // The total amount downloaded so far.
    pub downloaded: u64,

    // The number of bytes this client still has to download to be 100% complete.
    pub left:       u64,

}

// Compact peer list, 4 bytes of IP address then 2 bytes of port per peer.
// All in network (big-endian) byte order.
pub fn parse_compact_peers(mut bytes: &[u8]) -> Result<Vec<SocketAddrV4>> {
    if bytes.len() % 6 != 0 {
        return Err(TrackerError::InvalidPeers(bytes.len()));
    }

    let mut peers = Vec::with_capacity(bytes.len() / 6);
    while bytes.has_remaining() {
        let ip = Ipv4Addr::from(bytes.get_u32());
        let port = bytes.get_u16();
        peers.push(SocketAddrV4::new(ip, port));
    }
    Ok(peers)
}

async fn announce_one(url: &Url, params: AnnounceParams, config: &Config) -> Result<Vec<SocketAddrV4>> {
    let mut tracker = tracker_for(url)?;
    time::timeout(config.tracker_timeout, tracker.announce(params)).await?
}

// Create tracker based on scheme.
pub fn tracker_for(url: &Url) -> Result<Box<dyn Tracker>> {
    match url.scheme() {
        "http" | "https" => Ok(Box::new(HttpTracker::new(url.clone()))),
        "udp" => Ok(Box::new(UdpTracker::new(url.clone()))),
        other => Err(TrackerError::UnsupportedScheme(other.to_string())),
    }
}

// Announces to the torrent's trackers in order, stopping at the first which gives
// us any peers. An empty list means every tracker answered without peers.
pub async fn discover_peers(metainfo: &MetaInfo, config: &Config) -> Result<Vec<SocketAddrV4>> {
    let params = AnnounceParams {
        info_hash: metainfo.info_hash(),
        client_id: config.client_id,
        port: config.listen_port,
        uploaded: 0,
        downloaded: 0,
        left: metainfo.total_len(),
    };
    announce_to_any(&metainfo.tracker_urls(), params, config).await
}

pub(crate) async fn announce_to_any(
    urls: &[Url],
    params: AnnounceParams,
    config: &Config,
) -> Result<Vec<SocketAddrV4>> {

    let mut last_err = None;
    for url in urls {
        let span = tracing::info_span!("tracker", url = %url);
        let res = announce_one(url, params, config).instrument(span).await;

        match res {
            Ok(mut peers) if !peers.is_empty() => {
                let mut seen = std::collections::HashSet::new();
                peers.retain(|peer| seen.insert(*peer));
                tracing::info!("tracker {} provided {} peers", url, peers.len());
                return Ok(peers);
            },
            Ok(_) => tracing::warn!("tracker {} provided no peers", url),
            Err(e) => {
                tracing::warn!("tracker {} announce error: {}", url, e);
                last_err = Some(e);
            },
        }
    }

    match last_err {
        Some(e) => Err(e),
        None => Ok(Vec::new()),
    }
}
