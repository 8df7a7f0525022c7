use tokio::{io::{AsyncRead, AsyncWrite}, time};
use crate::{block::{block_len, num_blocks}, Config, PieceWork};
use super::{message::Message, PeerConnection, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceState {

    // More blocks still need to be requested.
    Requesting,

    // Everything has been requested, waiting on the remaining blocks.
    Draining,

    Complete,
}

// Transient state of one attempt at downloading one piece from one peer.
#[derive(Debug)]
pub struct PieceProgress {

    pub idx: u32,

    pub buf: Vec<u8>,

    // Bytes received into buf.
    pub downloaded: usize,

    // Bytes asked for so far.
    pub requested: usize,

    // Requests sent but not yet answered.
    pub backlog: usize,

}

impl PieceProgress {

    pub fn new(work: &PieceWork) -> Self {
        PieceProgress {
            idx: work.idx,
            buf: vec![0; work.len],
            downloaded: 0,
            requested: 0,
            backlog: 0,
        }
    }

    pub fn state(&self) -> PieceState {
        if self.downloaded >= self.buf.len() {
            PieceState::Complete
        } else if self.requested < self.buf.len() {
            PieceState::Requesting
        } else {
            PieceState::Draining
        }
    }

    // Queue requests up to the backlog limit, unless the peer is choking us.
    async fn make_requests<S>(&mut self, conn: &mut PeerConnection<S>, config: &Config) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        while !conn.choked
            && self.backlog < config.max_backlog
            && self.state() == PieceState::Requesting
        {
            let len = block_len(self.buf.len(), self.requested, config.block_size);
            tracing::debug!("send request: piece {} offset {} length {}", self.idx, self.requested, len);
            conn.send_request(self.idx, self.requested as u32, len as u32).await?;
            self.requested += len;
            self.backlog += 1;
        }
        Ok(())
    }

    fn handle_msg<S>(&mut self, conn: &mut PeerConnection<S>, msg: Message) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if conn.update_state(&msg) {
            return Ok(());
        }
        match msg {
            Message::Piece(_) => {
                let n = msg.parse_piece(self.idx, &mut self.buf)?;
                self.downloaded += n;
                self.backlog = self.backlog.saturating_sub(1);
            },
            Message::KeepAlive => {},
            other => tracing::trace!("ignoring {} whilst downloading", other),
        }
        Ok(())
    }

    async fn run<S>(&mut self, conn: &mut PeerConnection<S>, config: &Config) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        while self.state() != PieceState::Complete {
            self.make_requests(conn, config).await?;
            let msg = conn.receive().await?;
            self.handle_msg(conn, msg)?;
        }
        Ok(())
    }
}

// Pipelines block requests for a piece until every byte has arrived. The whole
// attempt is bounded by the piece timeout, running out of time is a hard failure.
pub async fn download_piece<S>(
    conn: &mut PeerConnection<S>,
    work: &PieceWork,
    config: &Config,
) -> Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    tracing::debug!("downloading piece {} in {} blocks", work.idx, num_blocks(work.len, config.block_size));
    let mut progress = PieceProgress::new(work);
    time::timeout(config.piece_timeout, progress.run(conn, config)).await??;
    Ok(progress.buf)
}
