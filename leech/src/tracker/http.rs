use std::net::{Ipv4Addr, SocketAddrV4};
use url::Url;
use serde::de;
use serde_derive::Deserialize;
use super::{parse_compact_peers, AnnounceParams, Result, Tracker, TrackerError};

pub struct HttpTracker {

    client: reqwest::Client,

    url: Url,

}

impl HttpTracker {
    pub fn new(url: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }

    fn announce_url(&self, params: &AnnounceParams) -> String {
        // Announce urls may already carry a query of their own.
        let separator = if self.url.query().is_some() { '&' } else { '?' };
        format!(
            "{}{}info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1",
            self.url.as_str(),
            separator,
            urlencoding::encode_binary(&params.info_hash),
            urlencoding::encode_binary(&params.client_id),
            params.port,
            params.uploaded,
            params.downloaded,
            params.left,
        )
    }
}

#[async_trait::async_trait]
impl Tracker for HttpTracker {

    async fn announce(&mut self, params: AnnounceParams) -> Result<Vec<SocketAddrV4>> {

        let url = self.announce_url(&params);
        tracing::debug!("announce url: {}", url);

        let raw_resp = self.client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        let resp: HttpResponse = serde_bencode::from_bytes(&raw_resp)?;
        tracing::debug!("announce response: {:?}", resp);

        if let Some(failure) = resp.failure_reason {
            return Err(TrackerError::ResponseError(failure));
        }
        if let Some(warning) = resp.warning_message {
            tracing::warn!("warning: {}", warning);
        }

        Ok(resp.peers)
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct HttpResponse {

    // If present, then no other keys may be present.
    // The value is a human-readable error message as to why the request failed.
    #[serde(rename = "failure reason")]
    pub failure_reason: Option<String>,

    // Similar to failure reason, but the response still gets processed normally.
    #[serde(rename = "warning message")]
    pub warning_message: Option<String>,

    // Interval in seconds that the client should wait between sending regular requests to the tracker.
    pub interval: Option<u64>,

    // Minimum announce interval. If present clients must not reannounce more frequently than this.
    #[serde(rename = "min interval")]
    pub min_interval: Option<u64>,

    // Number of peers with the entire file, i.e. seeders.
    pub complete: Option<u64>,

    // Number of non-seeder peers, aka "leechers".
    pub incomplete: Option<u64>,

    #[serde(default)]
    #[serde(deserialize_with = "peer_deserialize")]
    pub peers: Vec<SocketAddrV4>,
}

// The tracker can either return a dictionary model or a compacted string.
// Even if we request a compacted string, the tracker can still return a dictionary model.
fn peer_deserialize<'de, D>(deserializer: D) -> std::result::Result<Vec<SocketAddrV4>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct PeerVisitor;

    impl<'de> de::Visitor<'de> for PeerVisitor {

        type Value = Vec<SocketAddrV4>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string of bytes or a list of dictionaries")
        }

        // String model.
        fn visit_bytes<E>(self, v: &[u8]) -> std::result::Result<Self::Value, E>
        where
            E: de::Error,
        {
            parse_compact_peers(v).map_err(E::custom)
        }

        // Dictionary model, a list of dictionaries each with the keys "ip" and "port".
        // Only IPv4 addresses are kept.
        fn visit_seq<A>(self, mut seq: A) -> std::result::Result<Self::Value, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            #[derive(Deserialize)]
            struct PeerItem {
                ip: String,
                port: u16,
            }

            let mut peers = Vec::new();
            while let Some(peer) = seq.next_element::<PeerItem>()? {
                match peer.ip.parse::<Ipv4Addr>() {
                    Ok(ip) => peers.push(SocketAddrV4::new(ip, peer.port)),
                    Err(_) => tracing::debug!("skipping peer with address {}", peer.ip),
                }
            }

            Ok(peers)
        }
    }

    deserializer.deserialize_any(PeerVisitor)
}

#[cfg(test)]
mod tests {
    use tokio::{io::{AsyncReadExt, AsyncWriteExt}, net::TcpListener, sync::oneshot};
    use super::*;

    #[test]
    fn test_parse_response_binary() {
        let s = "64383a636f6d706c65746569396531303a696e636f6d706c657465693165383a696e74657276616c69313830306531323a6d696e20696e74657276616c693138303065353a706565727336303a52454d051ae1ca2f2a2ec00884937726decc61759ab8138851ab05e8f6bb5062f69770469247493ad4d005879f2ec8d54237ce44ea6043db8806c8d565";
        let response: HttpResponse = serde_bencode::from_bytes(&hex::decode(s).unwrap()).unwrap();
        assert_eq!(response.interval, Some(1800));
        assert_eq!(response.min_interval, Some(1800));
        assert_eq!(response.complete, Some(9));
        assert_eq!(response.incomplete, Some(1));
        assert_eq!(response.peers.len(), 10);
        assert!(response.peers.contains(&SocketAddrV4::new(Ipv4Addr::new(97, 117, 154, 184), 5000)));
        assert!(response.peers.contains(&SocketAddrV4::new(Ipv4Addr::new(5, 135, 159, 46), 51413)));
    }

    #[test]
    fn test_parse_response_dictionary_model() {
        let body = b"d8:intervali60e5:peersld2:ip9:127.0.0.17:peer id20:-XX0000-remote0000004:porti6881eed2:ip3:::14:porti80eeee";
        let response: HttpResponse = serde_bencode::from_bytes(body).unwrap();
        assert_eq!(response.peers, vec![SocketAddrV4::new(Ipv4Addr::LOCALHOST, 6881)]);
    }

    #[test]
    fn test_parse_response_bad_compact_length() {
        let body = b"d8:intervali60e5:peers5:abcdee";
        assert!(serde_bencode::from_bytes::<HttpResponse>(body).is_err());
    }

    #[test]
    fn test_announce_url() {
        let params = AnnounceParams {
            info_hash: [0xab; 20],
            client_id: *b"-LE0100-abcdefghijkl",
            port: 6881,
            left: 1000,
            ..Default::default()
        };
        let tracker = HttpTracker::new(Url::parse("http://tracker.example/announce").unwrap());
        let url = tracker.announce_url(&params);
        assert!(url.starts_with("http://tracker.example/announce?info_hash=%AB%AB"));
        assert!(url.contains("&peer_id=-LE0100-abcdefghijkl&port=6881"));
        assert!(url.ends_with("&left=1000&compact=1"));

        let tracker = HttpTracker::new(Url::parse("http://tracker.example/announce?key=1").unwrap());
        assert!(tracker.announce_url(&params).starts_with("http://tracker.example/announce?key=1&info_hash="));
    }

    // Answers one request with `body`, sending back the request line.
    async fn serve_once(body: &'static [u8]) -> (Url, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("http://{}/announce", listener.local_addr().unwrap())).unwrap();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let request = String::from_utf8_lossy(&request).to_string();
            tx.send(request.lines().next().unwrap_or_default().to_string()).ok();

            let head = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n", body.len());
            stream.write_all(head.as_bytes()).await.unwrap();
            stream.write_all(body).await.unwrap();
        });
        (url, rx)
    }

    #[tokio::test]
    async fn test_announce() {
        let (url, request) = serve_once(b"d8:intervali900e10:tracker id3:abc5:peers6:\x7f\x00\x00\x01\x1a\xe1e").await;
        let mut tracker = HttpTracker::new(url);
        let params = AnnounceParams {
            info_hash: [1; 20],
            client_id: [b'a'; 20],
            port: 6881,
            ..Default::default()
        };

        let peers = tracker.announce(params).await.unwrap();
        assert_eq!(peers, vec![SocketAddrV4::new(Ipv4Addr::LOCALHOST, 6881)]);

        let request = request.await.unwrap();
        assert!(request.starts_with("GET /announce?info_hash=%01%01"));
        assert!(request.contains("compact=1"));
    }

    #[tokio::test]
    async fn test_announce_failure_reason() {
        let (url, _request) = serve_once(b"d14:failure reason17:torrent not founde").await;
        let mut tracker = HttpTracker::new(url);
        let res = tracker.announce(AnnounceParams::default()).await;
        assert!(matches!(res, Err(TrackerError::ResponseError(reason)) if reason == "torrent not found"));
    }
}
