use std::{collections::HashSet, net::SocketAddrV4, sync::Arc, time::Duration};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use sha1::{Digest, Sha1};
use tokio::{net::TcpListener, sync::mpsc, task::JoinHandle, time};
use crate::{
    block::BlockData,
    disk::MemoryOutput,
    info::TorrentInfo,
    p2p::{test_util::*, Message},
    Bitfield,
    Config,
    DownloadEvent,
    ID,
};
use super::*;

const PIECE_LEN: usize = 16384;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Behaviour {
    Honest,
    // Flips a byte in every block it serves.
    Corrupt,
    // Closes the connection straight after the bitfield.
    HangUp,
    // Keeps us choked for a while before serving honestly.
    Slow,
}

// Three full pieces and a short last one.
fn torrent_data() -> Vec<Vec<u8>> {
    [PIECE_LEN, PIECE_LEN, PIECE_LEN, 1000]
        .iter()
        .enumerate()
        .map(|(i, len)| (0..*len).map(|b| (b * 7 + i * 13) as u8).collect())
        .collect()
}

fn sha1(data: &[u8]) -> ID {
    let mut hash = [0; 20];
    hash.copy_from_slice(&Sha1::digest(data));
    hash
}

fn config() -> Config {
    Config {
        client_id: CLIENT_ID,
        piece_timeout: Duration::from_secs(5),
        ..Config::default()
    }
}

fn params(pieces: &[Vec<u8>], peers: Vec<SocketAddrV4>, output: Arc<MemoryOutput>, config: Config) -> TorrentParams {
    let total_len = pieces.iter().map(|p| p.len() as u64).sum();
    TorrentParams {
        info_hash: INFO_HASH,
        piece_hashes: pieces.iter().map(|p| sha1(p)).collect(),
        info: TorrentInfo::from_lengths(total_len, PIECE_LEN, pieces.len() as u32),
        peers,
        output,
        event_tx: None,
        config,
    }
}

fn output_for(pieces: &[Vec<u8>]) -> Arc<MemoryOutput> {
    Arc::new(MemoryOutput::new(pieces.iter().map(|p| p.len()).sum()))
}

// A seeding peer on a local listener, serving the pieces in `has` to a single
// connection. Resolves to the piece indices it was asked for.
async fn spawn_seeder(
    pieces: Vec<Vec<u8>>,
    has: &[u32],
    behaviour: Behaviour,
) -> (SocketAddrV4, JoinHandle<Vec<u32>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = match listener.local_addr().unwrap() {
        std::net::SocketAddr::V4(address) => address,
        other => panic!("unexpected address {}", other),
    };

    let mut bitfield = Bitfield::new(pieces.len());
    for idx in has {
        bitfield.set_piece(*idx as usize);
    }

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut peer = FakePeer::accept(stream, INFO_HASH, Some(Message::Bitfield(bitfield))).await;
        let mut requested = Vec::new();
        if behaviour == Behaviour::HangUp {
            return requested;
        }

        while let Some(Ok(msg)) = peer.socket.next().await {
            match msg {
                Message::Interested => {
                    if behaviour == Behaviour::Slow {
                        time::sleep(Duration::from_millis(200)).await;
                    }
                    if peer.socket.send(Message::Unchoke).await.is_err() {
                        break;
                    }
                },
                Message::Request(req) => {
                    requested.push(req.piece_idx);
                    let start = req.offset as usize;
                    let mut data = pieces[req.piece_idx as usize][start..start + req.len as usize].to_vec();
                    if behaviour == Behaviour::Corrupt {
                        data[0] ^= 0xff;
                    }
                    let block = Message::Piece(BlockData {
                        piece_idx: req.piece_idx,
                        offset: req.offset,
                        data: Bytes::from(data),
                    });
                    if peer.socket.send(block).await.is_err() {
                        break;
                    }
                },
                _ => {},
            }
        }
        requested
    });

    (address, handle)
}

async fn unreachable_address() -> SocketAddrV4 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    match listener.local_addr().unwrap() {
        std::net::SocketAddr::V4(address) => address,
        other => panic!("unexpected address {}", other),
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init()
        .ok();
}

async fn run_torrent(params: TorrentParams) -> Result<()> {
    init_tracing();
    time::timeout(Duration::from_secs(20), Torrent::new(params).run())
        .await
        .expect("download hung")
}

#[tokio::test]
async fn test_download_from_disjoint_and_overlapping_peers() {
    let pieces = torrent_data();
    let (a, a_handle) = spawn_seeder(pieces.clone(), &[0, 1], Behaviour::Honest).await;
    let (b, b_handle) = spawn_seeder(pieces.clone(), &[2], Behaviour::Honest).await;
    let (c, c_handle) = spawn_seeder(pieces.clone(), &[1, 3], Behaviour::Honest).await;

    let output = output_for(&pieces);
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let mut params = params(&pieces, vec![a, b, c], output.clone(), config());
    params.event_tx = Some(event_tx);

    run_torrent(params).await.unwrap();
    assert_eq!(output.bytes().unwrap(), pieces.concat());

    // Nobody is asked for a piece they don't have.
    let a_requested: HashSet<u32> = a_handle.await.unwrap().into_iter().collect();
    let b_requested: HashSet<u32> = b_handle.await.unwrap().into_iter().collect();
    let c_requested: HashSet<u32> = c_handle.await.unwrap().into_iter().collect();
    assert!(a_requested.is_subset(&HashSet::from([0, 1])));
    assert!(b_requested.is_subset(&HashSet::from([2])));
    assert!(c_requested.is_subset(&HashSet::from([1, 3])));

    let mut progress = Vec::new();
    let mut finished = false;
    while let Some(event) = event_rx.recv().await {
        match event {
            DownloadEvent::Progress(stats) => progress.push(stats.num_downloaded),
            DownloadEvent::Finished => finished = true,
        }
    }
    assert_eq!(progress, vec![1, 2, 3, 4]);
    assert!(finished);
}

#[tokio::test]
async fn test_never_requests_piece_peer_lacks() {
    let pieces = torrent_data();
    let (partial, partial_handle) = spawn_seeder(pieces.clone(), &[0, 1, 3], Behaviour::Honest).await;
    let (other, other_handle) = spawn_seeder(pieces.clone(), &[2], Behaviour::Honest).await;

    let output = output_for(&pieces);
    run_torrent(params(&pieces, vec![partial, other], output.clone(), config())).await.unwrap();

    assert_eq!(output.bytes().unwrap(), pieces.concat());
    assert!(!partial_handle.await.unwrap().contains(&2));
    assert_eq!(other_handle.await.unwrap(), vec![2]);
}

#[tokio::test]
async fn test_corrupt_peer_then_honest_peer() {
    let pieces = torrent_data();
    let (corrupt, corrupt_handle) = spawn_seeder(pieces.clone(), &[0, 1, 2, 3], Behaviour::Corrupt).await;
    let (honest, _honest_handle) = spawn_seeder(pieces.clone(), &[0, 1, 2, 3], Behaviour::Slow).await;

    let output = output_for(&pieces);
    run_torrent(params(&pieces, vec![corrupt, honest], output.clone(), config())).await.unwrap();

    assert_eq!(output.bytes().unwrap(), pieces.concat());

    // A piece that failed verification is never asked of the same peer again.
    let requested = corrupt_handle.await.unwrap();
    let unique: HashSet<u32> = requested.iter().copied().collect();
    // Every piece fits in a single block.
    assert!(!requested.is_empty());
    assert_eq!(requested.len(), unique.len());
}

#[tokio::test]
async fn test_all_peers_gone_is_exhaustion() {
    let pieces = torrent_data();
    let (hang_up, _handle) = spawn_seeder(pieces.clone(), &[0, 1, 2, 3], Behaviour::HangUp).await;
    let unreachable = unreachable_address().await;

    let output = output_for(&pieces);
    let res = run_torrent(params(&pieces, vec![hang_up, unreachable], output, config())).await;
    assert!(matches!(res, Err(TorrentError::Exhausted { remaining: 4, total: 4 })));
}

#[tokio::test]
async fn test_partial_download_is_exhaustion() {
    let pieces = torrent_data();
    let (peer, _handle) = spawn_seeder(pieces.clone(), &[0, 1], Behaviour::Honest).await;

    let output = output_for(&pieces);
    let res = run_torrent(params(&pieces, vec![peer], output.clone(), config())).await;
    assert!(matches!(res, Err(TorrentError::Exhausted { remaining: 2, total: 4 })));

    // What could be downloaded was still written.
    let bytes = output.bytes().unwrap();
    assert_eq!(&bytes[..2 * PIECE_LEN], &pieces[..2].concat()[..]);
}

#[tokio::test]
async fn test_no_peers_is_exhaustion() {
    let pieces = torrent_data();
    let res = run_torrent(params(&pieces, Vec::new(), output_for(&pieces), config())).await;
    assert!(matches!(res, Err(TorrentError::Exhausted { remaining: 4, total: 4 })));
}

#[tokio::test]
async fn test_max_peers_caps_sessions() {
    let pieces = torrent_data();
    let (first, _first_handle) = spawn_seeder(pieces.clone(), &[0, 1, 2, 3], Behaviour::Honest).await;
    let (second, second_handle) = spawn_seeder(pieces.clone(), &[0, 1, 2, 3], Behaviour::Honest).await;

    let config = Config {
        max_peers: 1,
        ..config()
    };
    let output = output_for(&pieces);
    run_torrent(params(&pieces, vec![first, second], output.clone(), config)).await.unwrap();
    assert_eq!(output.bytes().unwrap(), pieces.concat());

    // The second peer was never connected to.
    assert!(!second_handle.is_finished());
    second_handle.abort();
}
