use std::time::Duration;

// Snapshot of a running download, sent with every progress event.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DownloadStats {

    pub num_pieces: usize,

    pub num_downloaded: usize,

    // Peers currently connected.
    pub num_peers: usize,

    // Bytes of verified pieces written to the output.
    pub bytes_downloaded: u64,

    pub time_elapsed: Duration,

}

impl DownloadStats {

    pub fn is_complete(&self) -> bool {
        self.num_downloaded == self.num_pieces
    }

    pub fn percent(&self) -> f64 {
        if self.num_pieces == 0 {
            return 100.0;
        }
        self.num_downloaded as f64 / self.num_pieces as f64 * 100.0
    }

    // Average download rate over the whole run, in bytes per second.
    pub fn avg_rate(&self) -> u64 {
        let secs = self.time_elapsed.as_secs_f64();
        if secs == 0.0 {
            0
        } else {
            (self.bytes_downloaded as f64 / secs) as u64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats() {
        let stats = DownloadStats {
            num_pieces: 4,
            num_downloaded: 1,
            num_peers: 2,
            bytes_downloaded: 2048,
            time_elapsed: Duration::from_secs(2),
        };
        assert_eq!(stats.percent(), 25.0);
        assert_eq!(stats.avg_rate(), 1024);
        assert!(!stats.is_complete());

        let empty = DownloadStats::default();
        assert!(empty.is_complete());
        assert_eq!(empty.percent(), 100.0);
        assert_eq!(empty.avg_rate(), 0);
    }
}
