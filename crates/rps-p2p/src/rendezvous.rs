//! rendezvous - topic-based peer discovery
//!
//! players announce themselves to the well-known bootstrap node under a
//! hashed topic and ask it who else did. the bootstrap keeps provider records
//! in memory with a TTL and never plays.
//!
//! [`Discoverer`] then polls the local peer registry until an entry shows up
//! that is neither us nor the bootstrap node. the first such entry is trusted
//! as the opponent without re-validation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::RwLock;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::Timing;
use crate::overlay::{Overlay, OverlayError, PeerId, Topic};
use crate::protocol::{read_frame, write_frame, ProviderRecord, RendezvousRequest, RendezvousResponse};

/// how long a provider record lives without a fresh announce
pub const PROVIDER_TTL: Duration = Duration::from_secs(300);

/// discovery passes between two announces
const REANNOUNCE_EVERY: u32 = 60;

/// in-memory provider records held by the bootstrap node
#[derive(Clone)]
pub struct ProviderStore {
    records: Arc<RwLock<HashMap<Topic, Vec<StoredProvider>>>>,
    ttl: Duration,
}

#[derive(Clone, Debug)]
struct StoredProvider {
    record: ProviderRecord,
    expires: Instant,
}

impl Default for ProviderStore {
    fn default() -> Self {
        Self::new(PROVIDER_TTL)
    }
}

impl ProviderStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// add or refresh `peer` as a provider of `topic`
    pub async fn provide(&self, topic: Topic, peer: PeerId, addrs: Vec<String>) {
        let expires = Instant::now() + self.ttl;
        let mut records = self.records.write().await;
        let providers = records.entry(topic).or_default();
        match providers.iter_mut().find(|p| p.record.peer == peer) {
            Some(existing) => {
                existing.record.addrs = addrs;
                existing.expires = expires;
            }
            None => providers.push(StoredProvider {
                record: ProviderRecord { peer, addrs },
                expires,
            }),
        }
    }

    /// live providers of `topic`, oldest announce first
    pub async fn providers(&self, topic: &Topic) -> Vec<ProviderRecord> {
        let now = Instant::now();
        let mut records = self.records.write().await;
        let Some(providers) = records.get_mut(topic) else {
            return Vec::new();
        };
        providers.retain(|p| p.expires > now);
        let live = providers.iter().map(|p| p.record.clone()).collect();
        if providers.is_empty() {
            records.remove(topic);
        }
        live
    }

    /// answer one request from the authenticated peer `remote`
    ///
    /// the provider identity is always the connection's, never taken from
    /// the payload.
    pub async fn handle(&self, remote: PeerId, request: RendezvousRequest) -> RendezvousResponse {
        match request {
            RendezvousRequest::Provide { topic, addrs } => {
                info!("{} provides topic {}", remote, topic);
                self.provide(topic, remote, addrs).await;
                RendezvousResponse::Ack
            }
            RendezvousRequest::FindProviders { topic } => {
                let providers = self.providers(&topic).await;
                debug!("{} looks up topic {}: {} providers", remote, topic, providers.len());
                RendezvousResponse::Providers(providers)
            }
        }
    }

    /// serve a single request/response exchange on one bi stream
    pub async fn serve<R, W>(&self, remote: PeerId, recv: &mut R, send: &mut W) -> Result<(), RendezvousError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let bytes = read_frame(recv).await?;
        let response = match RendezvousRequest::decode_from_slice(&bytes) {
            Ok(request) => self.handle(remote, request).await,
            Err(e) => {
                warn!("bad rendezvous request from {}: {}", remote, e);
                RendezvousResponse::Error(format!("undecodable request: {}", e))
            }
        };
        write_frame(send, &response.encode_to_vec()).await?;
        send.shutdown().await?;
        Ok(())
    }
}

/// client half of one rendezvous exchange
pub async fn exchange<R, W>(
    send: &mut W,
    recv: &mut R,
    request: &RendezvousRequest,
) -> Result<RendezvousResponse, RendezvousError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    write_frame(send, &request.encode_to_vec()).await?;
    send.shutdown().await?;
    let bytes = read_frame(recv).await?;
    let response = RendezvousResponse::decode_from_slice(&bytes)
        .map_err(|e| RendezvousError::Protocol(e.to_string()))?;
    if let RendezvousResponse::Error(msg) = response {
        return Err(RendezvousError::Protocol(msg));
    }
    Ok(response)
}

/// pick the first registry entry that is neither us nor the bootstrap node
pub fn select_candidate(peers: &[PeerId], local: PeerId, bootstrap: PeerId) -> Option<PeerId> {
    peers.iter().copied().find(|p| *p != local && *p != bootstrap)
}

/// resolves exactly one opponent through an [`Overlay`]
pub struct Discoverer<'a, O> {
    overlay: &'a O,
    bootstrap: PeerId,
    topic: Topic,
    timing: &'a Timing,
}

impl<'a, O: Overlay> Discoverer<'a, O> {
    pub fn new(overlay: &'a O, bootstrap: PeerId, topic: Topic, timing: &'a Timing) -> Self {
        Self {
            overlay,
            bootstrap,
            topic,
            timing,
        }
    }

    /// announce, then poll the registry until a candidate appears
    ///
    /// every pass without a candidate costs one retry, however many
    /// ineligible entries it saw.
    pub async fn resolve_opponent(&self) -> Result<PeerId, RendezvousError> {
        let retries = self.timing.discovery_retries;
        let local = self.overlay.local_id();
        info!("waiting for opponent on topic {}", self.topic);

        self.announce().await;
        for attempt in 1..=retries {
            if attempt > 1 && attempt % REANNOUNCE_EVERY == 0 {
                self.announce().await;
            }
            if let Err(e) = self.overlay.discover(self.topic).await {
                warn!("lookup failed: {}", e);
            }

            let peers = self.overlay.peers().await;
            if let Some(opponent) = select_candidate(&peers, local, self.bootstrap) {
                info!("opponent {} found", opponent);
                return Ok(opponent);
            }

            debug!("no opponent yet ({}/{}, {} known peers)", attempt, retries, peers.len());
            if attempt < retries {
                sleep(self.timing.discovery_interval).await;
            }
        }

        warn!("timeout waiting for an opponent");
        Err(RendezvousError::Timeout { attempts: retries })
    }

    async fn announce(&self) {
        // not fatal: the opponent may still find us through its own lookup
        if let Err(e) = self.overlay.announce(self.topic).await {
            warn!("announce failed: {}", e);
        }
    }
}

/// rendezvous errors
#[derive(Debug, thiserror::Error)]
pub enum RendezvousError {
    #[error("no opponent after {attempts} discovery passes")]
    Timeout { attempts: u32 },
    #[error(transparent)]
    Overlay(#[from] OverlayError),
    #[error("rendezvous protocol error: {0}")]
    Protocol(String),
    #[error("rendezvous stream error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RENDEZVOUS_TOPIC;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::io::DuplexStream;

    const LOCAL: PeerId = PeerId([1u8; 32]);
    const BOOTSTRAP: PeerId = PeerId([2u8; 32]);
    const OPPONENT: PeerId = PeerId([3u8; 32]);

    #[test]
    fn test_select_candidate() {
        assert_eq!(select_candidate(&[LOCAL, BOOTSTRAP], LOCAL, BOOTSTRAP), None);
        assert_eq!(select_candidate(&[LOCAL, BOOTSTRAP, OPPONENT], LOCAL, BOOTSTRAP), Some(OPPONENT));
        let other = PeerId([4u8; 32]);
        assert_eq!(select_candidate(&[other, OPPONENT], LOCAL, BOOTSTRAP), Some(other));
    }

    /// registry that gains the opponent after `appear_after` lookups
    struct ScriptedOverlay {
        appear_after: Option<u32>,
        lookups: AtomicU32,
        announces: AtomicU32,
    }

    impl ScriptedOverlay {
        fn new(appear_after: Option<u32>) -> Self {
            Self {
                appear_after,
                lookups: AtomicU32::new(0),
                announces: AtomicU32::new(0),
            }
        }
    }

    impl Overlay for ScriptedOverlay {
        type Stream = DuplexStream;

        fn local_id(&self) -> PeerId {
            LOCAL
        }

        async fn peers(&self) -> Vec<PeerId> {
            let seen = self.lookups.load(Ordering::SeqCst);
            match self.appear_after {
                Some(n) if seen >= n => vec![LOCAL, BOOTSTRAP, OPPONENT],
                _ => vec![LOCAL, BOOTSTRAP],
            }
        }

        async fn announce(&self, _topic: Topic) -> Result<(), OverlayError> {
            self.announces.fetch_add(1, Ordering::SeqCst);
            Err(OverlayError::Network("bootstrap also serves the topic".to_string()))
        }

        async fn discover(&self, _topic: Topic) -> Result<Vec<PeerId>, OverlayError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(vec![])
        }

        async fn open_stream(&self, peer: PeerId, _protocol: &'static [u8]) -> Result<DuplexStream, OverlayError> {
            Err(OverlayError::UnknownPeer(peer))
        }
    }

    fn fast_timing(retries: u32) -> Timing {
        Timing {
            discovery_retries: retries,
            discovery_interval: Duration::from_millis(1),
            ..Timing::default()
        }
    }

    #[tokio::test]
    async fn test_only_self_and_bootstrap_times_out() {
        let overlay = ScriptedOverlay::new(None);
        let timing = fast_timing(150);
        let discoverer = Discoverer::new(&overlay, BOOTSTRAP, Topic::new(RENDEZVOUS_TOPIC), &timing);

        let err = discoverer.resolve_opponent().await.unwrap_err();
        assert!(matches!(err, RendezvousError::Timeout { attempts: 150 }));
        assert_eq!(overlay.lookups.load(Ordering::SeqCst), 150);
        // announce failures are tolerated
        assert!(overlay.announces.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_opponent_found_after_a_few_passes() {
        let overlay = ScriptedOverlay::new(Some(4));
        let timing = fast_timing(10);
        let discoverer = Discoverer::new(&overlay, BOOTSTRAP, Topic::new(RENDEZVOUS_TOPIC), &timing);

        assert_eq!(discoverer.resolve_opponent().await.unwrap(), OPPONENT);
        assert_eq!(overlay.lookups.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_store_provide_and_find() {
        let store = ProviderStore::default();
        let topic = Topic::new(RENDEZVOUS_TOPIC);
        store.provide(topic, LOCAL, vec!["127.0.0.1:30001".to_string()]).await;
        store.provide(topic, OPPONENT, vec![]).await;
        // re-announce refreshes in place
        store.provide(topic, LOCAL, vec!["127.0.0.1:30005".to_string()]).await;

        let providers = store.providers(&topic).await;
        assert_eq!(providers.len(), 2);
        assert_eq!(providers[0].peer, LOCAL);
        assert_eq!(providers[0].addrs, vec!["127.0.0.1:30005".to_string()]);
        assert!(store.providers(&Topic::new("other")).await.is_empty());
    }

    #[tokio::test]
    async fn test_store_expires_records() {
        let store = ProviderStore::new(Duration::from_millis(20));
        let topic = Topic::new(RENDEZVOUS_TOPIC);
        store.provide(topic, OPPONENT, vec![]).await;
        assert_eq!(store.providers(&topic).await.len(), 1);
        sleep(Duration::from_millis(40)).await;
        assert!(store.providers(&topic).await.is_empty());
    }

    #[tokio::test]
    async fn test_provider_is_connection_identity() {
        let store = ProviderStore::default();
        let topic = Topic::new(RENDEZVOUS_TOPIC);
        let response = store
            .handle(OPPONENT, RendezvousRequest::Provide { topic, addrs: vec![] })
            .await;
        assert_eq!(response, RendezvousResponse::Ack);
        let response = store.handle(LOCAL, RendezvousRequest::FindProviders { topic }).await;
        assert_eq!(
            response,
            RendezvousResponse::Providers(vec![ProviderRecord { peer: OPPONENT, addrs: vec![] }])
        );
    }

    #[tokio::test]
    async fn test_exchange_over_streams() {
        let store = ProviderStore::default();
        let topic = Topic::new(RENDEZVOUS_TOPIC);
        let (mut client_send, mut server_recv) = tokio::io::duplex(1024);
        let (mut server_send, mut client_recv) = tokio::io::duplex(1024);

        let server = {
            let store = store.clone();
            tokio::spawn(async move { store.serve(OPPONENT, &mut server_recv, &mut server_send).await })
        };
        let request = RendezvousRequest::Provide {
            topic,
            addrs: vec!["10.0.0.2:30002".to_string()],
        };
        let response = exchange(&mut client_send, &mut client_recv, &request).await.unwrap();
        assert_eq!(response, RendezvousResponse::Ack);
        server.await.unwrap().unwrap();
        assert_eq!(store.providers(&topic).await[0].peer, OPPONENT);
    }
}
