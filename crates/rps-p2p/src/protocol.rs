//! protocol - wire formats
//!
//! two protocols share the endpoint:
//!
//! - `/game/rps`: one move per line, the decimal code followed by `\n`.
//!   one message kind only, so no tag, length or checksum.
//! - `/rps/rendezvous/1`: one request and one response per bi stream, each a
//!   u32 little-endian length prefix and a SCALE-encoded message.

use parity_scale_codec::{Decode, Encode};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::game::Move;
use crate::overlay::{PeerId, Topic};

/// logical protocol of the move exchange
pub const GAME_ALPN: &[u8] = b"/game/rps";

/// logical protocol of the bootstrap lookup service
pub const RENDEZVOUS_ALPN: &[u8] = b"/rps/rendezvous/1";

/// topic both players announce under
pub const RENDEZVOUS_TOPIC: &str = "rock-paper-scissors-dht";

/// upper bound for a single rendezvous frame
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// what this process is for, chosen once at startup
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// well-known lookup node, never plays
    Bootstrap,
    /// plays exactly one match
    Player,
}

impl Role {
    /// protocol accepted on inbound connections
    pub fn alpn(&self) -> &'static [u8] {
        match self {
            Role::Bootstrap => RENDEZVOUS_ALPN,
            Role::Player => GAME_ALPN,
        }
    }
}

// === move lines ===

/// `2` -> `b"2\n"`
pub fn encode_move(mv: Move) -> Vec<u8> {
    format!("{}\n", mv.code()).into_bytes()
}

/// decode one line of the move stream
///
/// returns `Ok(None)` for a blank line, which carries no move.
pub fn decode_move(line: &str) -> Result<Option<Move>, MoveParseError> {
    let token = line.trim();
    if token.is_empty() {
        return Ok(None);
    }
    let value: i64 = token
        .parse()
        .map_err(|_| MoveParseError::NotAnInteger(token.to_string()))?;
    u8::try_from(value)
        .ok()
        .and_then(Move::from_code)
        .map(Some)
        .ok_or(MoveParseError::OutOfRange(value))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoveParseError {
    #[error("not an integer: {0:?}")]
    NotAnInteger(String),
    #[error("move code out of range: {0}")]
    OutOfRange(i64),
}

// === rendezvous messages ===

/// request to the bootstrap node
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub enum RendezvousRequest {
    /// record the caller as a provider of `topic`
    Provide { topic: Topic, addrs: Vec<String> },
    /// list providers of `topic`
    FindProviders { topic: Topic },
}

/// a peer that announced a topic, and where it said it can be reached
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct ProviderRecord {
    pub peer: PeerId,
    pub addrs: Vec<String>,
}

/// reply from the bootstrap node
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub enum RendezvousResponse {
    Ack,
    Providers(Vec<ProviderRecord>),
    Error(String),
}

impl RendezvousRequest {
    pub fn encode_to_vec(&self) -> Vec<u8> {
        self.encode()
    }

    pub fn decode_from_slice(data: &[u8]) -> Result<Self, parity_scale_codec::Error> {
        Self::decode(&mut &data[..])
    }
}

impl RendezvousResponse {
    pub fn encode_to_vec(&self) -> Vec<u8> {
        self.encode()
    }

    pub fn decode_from_slice(data: &[u8]) -> Result<Self, parity_scale_codec::Error> {
        Self::decode(&mut &data[..])
    }
}

// === framing ===

pub async fn write_frame<W: AsyncWrite + Unpin>(send: &mut W, msg: &[u8]) -> io::Result<()> {
    if msg.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "message too large"));
    }
    send.write_all(&(msg.len() as u32).to_le_bytes()).await?;
    send.write_all(msg).await?;
    send.flush().await
}

pub async fn read_frame<R: AsyncRead + Unpin>(recv: &mut R) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    recv.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "message too large"));
    }
    let mut msg = vec![0u8; len];
    recv.read_exact(&mut msg).await?;
    Ok(msg)
}
