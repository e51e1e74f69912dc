//! channel - move exchange over one-shot streams
//!
//! outbound, every move gets a fresh stream under [`GAME_ALPN`]: open (retrying
//! on failure), write one line, close. inbound, every accepted stream gets its
//! own read loop which decodes lines and hands moves to the session through a
//! single-slot buffer. a second decoded move waits until the session took the
//! first one.

use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::Timing;
use crate::game::Move;
use crate::overlay::{Overlay, PeerId};
use crate::protocol::{decode_move, encode_move, GAME_ALPN};

/// longest accepted move line, newline included
pub const MAX_LINE_LEN: u64 = 64;

/// create the pending move buffer (capacity 1)
pub fn move_buffer() -> (MoveSink, MoveInbox) {
    let (tx, rx) = mpsc::channel(1);
    (MoveSink { tx }, MoveInbox { rx })
}

/// producer side of the pending move buffer, one clone per read loop
#[derive(Clone, Debug)]
pub struct MoveSink {
    tx: mpsc::Sender<Move>,
}

impl MoveSink {
    /// hand a move to the session, waiting while the slot is taken.
    /// fails if the session is gone.
    pub async fn deliver(&self, mv: Move) -> Result<(), Move> {
        self.tx.send(mv).await.map_err(|e| e.0)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// consumer side of the pending move buffer, owned by the session
#[derive(Debug)]
pub struct MoveInbox {
    rx: mpsc::Receiver<Move>,
}

impl MoveInbox {
    /// next opponent move; `None` once every sink is dropped
    pub async fn next(&mut self) -> Option<Move> {
        self.rx.recv().await
    }

    /// next opponent move, giving up after `limit`
    pub async fn next_within(&mut self, limit: Option<Duration>) -> Result<Option<Move>, Duration> {
        match limit {
            Some(limit) => timeout(limit, self.rx.recv()).await.map_err(|_| limit),
            None => Ok(self.rx.recv().await),
        }
    }
}

/// what a read loop saw before its stream ended
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReadSummary {
    pub delivered: usize,
    pub malformed: usize,
}

/// decode newline-delimited moves from `reader` until end of stream
///
/// blank lines are skipped, malformed or overlong lines are logged and
/// dropped. the loop also ends on a read error or once the session stopped
/// listening.
pub async fn read_moves<R: AsyncRead + Unpin>(reader: R, sink: &MoveSink) -> ReadSummary {
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    let mut summary = ReadSummary::default();

    loop {
        if sink.is_closed() {
            debug!("session gone, closing move stream");
            break;
        }

        line.clear();
        let n = match (&mut reader).take(MAX_LINE_LEN).read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!("move stream read failed: {}", e);
                break;
            }
        };

        if n as u64 == MAX_LINE_LEN && line.last() != Some(&b'\n') {
            warn!("discarding move line longer than {} bytes", MAX_LINE_LEN);
            summary.malformed += 1;
            if !skip_line(&mut reader).await {
                break;
            }
            continue;
        }

        match decode_move(&String::from_utf8_lossy(&line)) {
            Ok(Some(mv)) => {
                if sink.deliver(mv).await.is_err() {
                    debug!("session gone, dropping {}", mv);
                    break;
                }
                summary.delivered += 1;
            }
            Ok(None) => {}
            Err(e) => {
                warn!("discarding malformed move: {}", e);
                summary.malformed += 1;
            }
        }
    }

    summary
}

/// consume the rest of an overlong line. false once the stream is done.
async fn skip_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> bool {
    let mut chunk = Vec::new();
    loop {
        chunk.clear();
        match (&mut *reader).take(MAX_LINE_LEN).read_until(b'\n', &mut chunk).await {
            Ok(0) | Err(_) => return false,
            Ok(_) if chunk.last() == Some(&b'\n') => return true,
            Ok(_) => {}
        }
    }
}

/// send one move to `peer` on a fresh stream
///
/// stream opens are retried every `send_retry_interval` until
/// `send_deadline` passes. a failed write on an open stream is not retried.
pub async fn send_move<O: Overlay>(
    overlay: &O,
    peer: PeerId,
    mv: Move,
    timing: &Timing,
) -> Result<(), ChannelError> {
    let open = open_with_retry(overlay, peer, timing.send_retry_interval);
    let mut stream = match timing.send_deadline {
        Some(deadline) => timeout(deadline, open)
            .await
            .map_err(|_| ChannelError::Timeout(deadline))?,
        None => open.await,
    };

    stream
        .write_all(&encode_move(mv))
        .await
        .map_err(ChannelError::Write)?;
    stream.shutdown().await.map_err(ChannelError::Write)?;
    Ok(())
}

async fn open_with_retry<O: Overlay>(overlay: &O, peer: PeerId, interval: Duration) -> O::Stream {
    let mut attempt = 1u32;
    loop {
        match overlay.open_stream(peer, GAME_ALPN).await {
            Ok(stream) => {
                if attempt > 1 {
                    info!("stream to {} open after {} attempts", peer, attempt);
                }
                return stream;
            }
            Err(e) => {
                warn!("stream to {} failed (attempt {}): {}", peer, attempt, e);
                attempt += 1;
                sleep(interval).await;
            }
        }
    }
}

/// move channel errors
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("no stream to opponent within {0:?}")]
    Timeout(Duration),
    #[error("failed to write move: {0}")]
    Write(#[source] std::io::Error),
}
