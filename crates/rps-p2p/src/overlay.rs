//! overlay - what the game needs from the networking layer
//!
//! the game never talks to a transport directly. it needs a stable local
//! identity, a registry of peers it has heard of, a way to open a byte stream
//! to a peer under a named protocol, and a topic-based announce/discover
//! primitive. [`crate::node::PlayerNode`] provides all of it over QUIC.

use parity_scale_codec::{Decode, Encode};
use sha2::{Digest, Sha256};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use tokio::io::AsyncWrite;

/// Peer identifier (ed25519 public key)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode)]
pub struct PeerId(pub [u8; 32]);

impl PeerId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl FromStr for PeerId {
    type Err = OverlayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| OverlayError::Protocol(format!("bad peer id: {}", e)))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| OverlayError::Protocol("peer id must be 32 bytes".to_string()))?;
        Ok(PeerId(arr))
    }
}

/// content identifier of a rendezvous topic
///
/// sha256 of a domain prefix and the topic name. only ever used as a lookup
/// key, never resolved to content.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Encode, Decode)]
pub struct Topic(pub [u8; 32]);

impl Topic {
    pub fn new(name: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"rps-topic-v1:");
        hasher.update(name.as_bytes());
        Topic(hasher.finalize().into())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// networking collaborator consumed by discovery and the move channel
pub trait Overlay: Send + Sync {
    /// outbound one-shot byte stream
    type Stream: AsyncWrite + Unpin + Send;

    /// our own identity
    fn local_id(&self) -> PeerId;

    /// snapshot of the peer registry, in insertion order
    fn peers(&self) -> impl Future<Output = Vec<PeerId>> + Send;

    /// tell the lookup service we take part in `topic`
    fn announce(&self, topic: Topic) -> impl Future<Output = Result<(), OverlayError>> + Send;

    /// ask the lookup service who else announced `topic`; found peers are
    /// merged into the registry
    fn discover(&self, topic: Topic)
        -> impl Future<Output = Result<Vec<PeerId>, OverlayError>> + Send;

    /// open a fresh stream to `peer` under `protocol`
    fn open_stream(
        &self,
        peer: PeerId,
        protocol: &'static [u8],
    ) -> impl Future<Output = Result<Self::Stream, OverlayError>> + Send;
}

/// overlay errors
#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    #[error("failed to open stream: {0}")]
    Open(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_hex() {
        let id = PeerId([0xab; 32]);
        assert_eq!(id.to_string(), "abababababababab");
        let parsed: PeerId = id.to_hex().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_peer_id_rejects_short() {
        assert!("abcd".parse::<PeerId>().is_err());
        assert!("not-hex".parse::<PeerId>().is_err());
    }

    #[test]
    fn test_topic_deterministic() {
        assert_eq!(Topic::new("rock-paper-scissors-dht"), Topic::new("rock-paper-scissors-dht"));
        assert_ne!(Topic::new("rock-paper-scissors-dht"), Topic::new("other"));
    }
}
