use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use bytes::{Buf, BufMut, BytesMut};
use tokio::net::UdpSocket;
use url::Url;
use super::{parse_compact_peers, AnnounceParams, Result, Tracker, TrackerError};

// Reference: https://www.bittorrent.org/beps/bep_0015.html

const PROTOCOL_ID: i64      = 0x41727101980;
const ACTION_CONNECT: i32   = 0;
const ACTION_ANNOUNCE: i32  = 1;
const ACTION_ERROR: i32     = 3;

// One-off announce, no event.
const EVENT_NONE: i32       = 0;

const CONNECT_RESPONSE_LEN: usize = 16;
const ANNOUNCE_HEADER_LEN: usize = 20;

pub struct UdpTracker {

    url: Url,

    conn_id: Option<i64>,

}

impl UdpTracker {

    pub fn new(url: Url) -> Self {
        Self {
            url,
            conn_id: None,
        }
    }

    async fn resolve(&self) -> Result<SocketAddr> {
        let host = self.url.host_str().ok_or(TrackerError::InvalidUrl)?;
        let port = self.url.port().ok_or(TrackerError::InvalidUrl)?;
        tokio::net::lookup_host((host, port))
            .await?
            .find(SocketAddr::is_ipv4)
            .ok_or(TrackerError::InvalidUrl)
    }

    async fn connect(&mut self, socket: &UdpSocket) -> Result<i64> {

        // Send connect request.
        let trans_id: i32 = rand::random();
        let mut buf = BytesMut::with_capacity(16);
        buf.put_i64(PROTOCOL_ID);
        buf.put_i32(ACTION_CONNECT);
        buf.put_i32(trans_id);
        socket.send(&buf).await?;

        // Receive connect response.
        let mut resp_buf = [0u8; 64];
        let n = socket.recv(&mut resp_buf).await?;
        let mut resp = &resp_buf[..n];
        check_header(&mut resp, ACTION_CONNECT, trans_id, CONNECT_RESPONSE_LEN)?;

        let conn_id = resp.get_i64();
        self.conn_id = Some(conn_id);
        tracing::trace!("connected to tracker");
        Ok(conn_id)
    }
}

// Checks the action and transaction id every response starts with,
// leaving `resp` positioned after them.
fn check_header(resp: &mut &[u8], action: i32, trans_id: i32, min_len: usize) -> Result<()> {
    if resp.len() >= 8 && (&resp[..4]).get_i32() == ACTION_ERROR {
        let message = String::from_utf8_lossy(&resp[8..]).to_string();
        return Err(TrackerError::ResponseError(message));
    }
    if resp.len() < min_len {
        return Err(TrackerError::ResponseError("invalid response length".to_string()));
    }
    if resp.get_i32() != action {
        return Err(TrackerError::ResponseError(format!("expected action {}", action)));
    }
    if resp.get_i32() != trans_id {
        return Err(TrackerError::ResponseError("invalid transaction id".to_string()));
    }
    Ok(())
}

#[async_trait::async_trait]
impl Tracker for UdpTracker {

    async fn announce(&mut self, params: AnnounceParams) -> Result<Vec<SocketAddrV4>> {

        let addr = self.resolve().await?;
        // Uses first available local port.
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.connect(addr).await?;

        let conn_id = self.connect(&socket).await?;
        let trans_id: i32 = rand::random();

        let mut buf = BytesMut::with_capacity(98);
        buf.put_i64(conn_id);
        buf.put_i32(ACTION_ANNOUNCE);
        buf.put_i32(trans_id);
        buf.put(&params.info_hash[..]);
        buf.put(&params.client_id[..]);
        buf.put_u64(params.downloaded);
        buf.put_u64(params.left);
        buf.put_u64(params.uploaded);
        buf.put_i32(EVENT_NONE);
        buf.put_i32(0); // IP address, default = 0.
        buf.put_i32(rand::random()); // Key, random.
        buf.put_i32(-1); // Number of peers wanted, tracker default.
        buf.put_u16(params.port);
        socket.send(&buf).await?;

        let mut resp_buf = [0u8; 4096];
        let n = socket.recv(&mut resp_buf).await?;
        let mut resp = &resp_buf[..n];
        check_header(&mut resp, ACTION_ANNOUNCE, trans_id, ANNOUNCE_HEADER_LEN)?;

        let interval = resp.get_i32();
        let leechers = resp.get_i32();
        let seeders = resp.get_i32();
        tracing::debug!("interval {}s, {} leechers, {} seeders", interval, leechers, seeders);

        let peers = parse_compact_peers(resp)?;
        tracing::info!("provided {} peers", peers.len());
        Ok(peers)
    }
}
