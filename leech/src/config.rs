use std::time::Duration;
use rand::{distributions::Alphanumeric, Rng};
use crate::{ID, BLOCK_SIZE, MAX_BACKLOG};

#[derive(Debug, Clone)]
pub struct Config {

    // Our 20 byte peer id, sent in handshakes and tracker announces.
    pub client_id: ID,

    // Port advertised to trackers.
    pub listen_port: u16,

    // Bound on dialling a peer.
    pub connect_timeout: Duration,

    // Bound on the handshake exchange.
    pub handshake_timeout: Duration,

    // Bound on receiving the bitfield directly after the handshake.
    pub bitfield_timeout: Duration,

    // Bound on downloading a single piece from a single peer.
    pub piece_timeout: Duration,

    // Bound on a single tracker announce.
    pub tracker_timeout: Duration,

    // Max number of block requests in flight per peer.
    pub max_backlog: usize,

    // Size of requested blocks.
    pub block_size: usize,

    // Max number of peer workers, 0 for no limit.
    pub max_peers: usize,

}

// Azureus-style prefix, the rest of the id is random.
const CLIENT_ID_PREFIX: &[u8; 8] = b"-LE0100-";

pub fn generate_client_id() -> ID {
    let mut id = [0; 20];
    id[..8].copy_from_slice(CLIENT_ID_PREFIX);
    let mut rng = rand::thread_rng();
    for b in id[8..].iter_mut() {
        *b = rng.sample(Alphanumeric);
    }
    id
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: generate_client_id(),
            listen_port: 6881,
            connect_timeout: Duration::from_secs(3),
            handshake_timeout: Duration::from_secs(3),
            bitfield_timeout: Duration::from_secs(5),
            piece_timeout: Duration::from_secs(30),
            tracker_timeout: Duration::from_secs(15),
            max_backlog: MAX_BACKLOG,
            block_size: BLOCK_SIZE,
            max_peers: 50,
        }
    }
}
