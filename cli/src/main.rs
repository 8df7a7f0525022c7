use std::{path::PathBuf, time::Duration};
use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use leech::{Config, DownloadEvent, MetaInfo};

#[derive(Parser)]
#[command(version, about = "Downloads a single file torrent")]
struct Args {

    #[arg(help = "Path to torrent file")]
    torrent: PathBuf,

    #[arg(help = "Where to write the downloaded file")]
    output: PathBuf,

    #[arg(short, long, help = "Port advertised to trackers")]
    port: Option<u16>,

    #[arg(long, help = "Maximum number of peers to download from, 0 for no limit")]
    max_peers: Option<usize>,

    #[arg(long, help = "Seconds allowed for downloading a single piece")]
    piece_timeout: Option<u64>,

    #[arg(short, long, action = clap::ArgAction::Count, help = "Verbose output, repeat for more")]
    verbose: u8,

}

impl Args {
    fn config(&self) -> Config {
        let mut config = Config::default();
        if let Some(port) = self.port {
            config.listen_port = port;
        }
        if let Some(max_peers) = self.max_peers {
            config.max_peers = max_peers;
        }
        if let Some(secs) = self.piece_timeout {
            config.piece_timeout = Duration::from_secs(secs);
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {

    let args = Args::parse();

    // Set up logging, RUST_LOG takes precedence over the verbosity flag.
    let level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let sub = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .finish();
    tracing::subscriber::set_global_default(sub)?;

    let metainfo = MetaInfo::new(&args.torrent)
        .with_context(|| format!("failed to parse metainfo {}", args.torrent.display()))?;
    tracing::info!("loaded torrent {} ({})", metainfo.name(), metainfo.info_hash_hex());

    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                DownloadEvent::Progress(stats) => {
                    println!(
                        "({:.2}%) downloaded piece {} of {} from {} peers",
                        stats.percent(),
                        stats.num_downloaded,
                        stats.num_pieces,
                        stats.num_peers,
                    );
                },
                DownloadEvent::Finished => println!("download complete"),
            }
        }
    });

    leech::download(&metainfo, &args.output, args.config(), Some(event_tx))
        .await
        .with_context(|| format!("failed to download {}", metainfo.name()))?;

    printer.await?;
    println!("saved to {}", args.output.display());
    Ok(())
}
