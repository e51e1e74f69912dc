//! node - iroh QUIC endpoints for both roles
//!
//! a [`PlayerNode`] accepts `/game/rps` connections and implements
//! [`Overlay`]: it keeps a registry of known peers and their direct addresses,
//! talks to the bootstrap node for announce/lookup, and opens one
//! unidirectional stream per move. a [`BootstrapNode`] accepts
//! `/rps/rendezvous/1` connections and answers from a [`ProviderStore`].

use iroh::endpoint::{Connection, SendStream, VarInt};
use iroh::{Endpoint, EndpointAddr, EndpointId, PublicKey, SecretKey};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::channel::{read_moves, MoveSink};
use crate::identity::Identity;
use crate::overlay::{Overlay, OverlayError, PeerId, Topic};
use crate::protocol::{RendezvousRequest, RendezvousResponse, Role, GAME_ALPN, RENDEZVOUS_ALPN};
use crate::rendezvous::{exchange, ProviderStore, RendezvousError};

/// where the well-known bootstrap node lives: `<hex peer id>@<ip:port>`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BootstrapAddr {
    pub id: PeerId,
    pub addr: SocketAddr,
}

impl fmt::Display for BootstrapAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id.to_hex(), self.addr)
    }
}

impl FromStr for BootstrapAddr {
    type Err = OverlayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, addr) = s
            .split_once('@')
            .ok_or_else(|| OverlayError::Protocol("expected <peer id>@<ip:port>".to_string()))?;
        let addr = addr
            .parse()
            .map_err(|e| OverlayError::Protocol(format!("bad bootstrap address: {}", e)))?;
        Ok(Self { id: id.parse()?, addr })
    }
}

/// known peers and their direct addresses, in the order they were learned
#[derive(Clone, Default)]
pub struct PeerRegistry {
    entries: Arc<RwLock<Vec<(PeerId, Vec<SocketAddr>)>>>,
}

impl PeerRegistry {
    /// add `peer`, or merge new addresses into its entry
    pub async fn insert(&self, peer: PeerId, addrs: Vec<SocketAddr>) {
        let mut entries = self.entries.write().await;
        match entries.iter_mut().find(|(id, _)| *id == peer) {
            Some((_, known)) => {
                for addr in addrs {
                    if !known.contains(&addr) {
                        known.push(addr);
                    }
                }
            }
            None => entries.push((peer, addrs)),
        }
    }

    pub async fn ids(&self) -> Vec<PeerId> {
        self.entries.read().await.iter().map(|(id, _)| *id).collect()
    }

    pub async fn addrs(&self, peer: &PeerId) -> Option<Vec<SocketAddr>> {
        self.entries
            .read()
            .await
            .iter()
            .find(|(id, _)| id == peer)
            .map(|(_, addrs)| addrs.clone())
    }
}

fn endpoint_id(peer: PeerId) -> Result<EndpointId, OverlayError> {
    PublicKey::from_bytes(peer.as_bytes())
        .map_err(|e| OverlayError::Protocol(format!("peer id is not an ed25519 key: {}", e)))
}

fn peer_id(id: &EndpointId) -> PeerId {
    PeerId(*id.as_bytes())
}

async fn bind_endpoint(identity: &Identity, role: Role, port: u16) -> Result<Endpoint, OverlayError> {
    Endpoint::builder()
        .secret_key(SecretKey::from_bytes(&identity.secret_bytes()))
        .alpns(vec![role.alpn().to_vec()])
        .bind_addr_v4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))
        .bind()
        .await
        .map_err(|e| OverlayError::Network(e.to_string()))
}

/// a player's endpoint
#[derive(Clone)]
pub struct PlayerNode {
    endpoint: Endpoint,
    local: PeerId,
    bootstrap: BootstrapAddr,
    advertise: Vec<SocketAddr>,
    registry: PeerRegistry,
    connections: Arc<RwLock<ConnectionCache<Connection>>>,
    lookup_timeout: Duration,
}

impl PlayerNode {
    /// bind on `port` and seed the registry with ourselves and the bootstrap node
    pub async fn bind(
        identity: &Identity,
        port: u16,
        bootstrap: BootstrapAddr,
        advertise: Vec<SocketAddr>,
        lookup_timeout: Duration,
    ) -> Result<Self, OverlayError> {
        let endpoint = bind_endpoint(identity, Role::Player, port).await?;
        let local = peer_id(&endpoint.id());

        let registry = PeerRegistry::default();
        registry.insert(local, advertise.clone()).await;
        registry.insert(bootstrap.id, vec![bootstrap.addr]).await;
        info!("player {} listening on port {}", local, port);

        Ok(Self {
            endpoint,
            local,
            bootstrap,
            advertise,
            registry,
            connections: Arc::new(RwLock::new(HashMap::new())),
            lookup_timeout,
        })
    }

    /// accept move streams until the endpoint closes, one read loop per stream
    pub fn serve_moves(&self, sink: MoveSink) -> JoinHandle<()> {
        let endpoint = self.endpoint.clone();
        let registry = self.registry.clone();
        let connections = self.connections.clone();

        tokio::spawn(async move {
            while let Some(incoming) = endpoint.accept().await {
                let conn = match incoming.await {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("inbound connection failed: {}", e);
                        continue;
                    }
                };
                let remote = peer_id(&conn.remote_id());
                debug!("move connection from {}", remote);
                registry.insert(remote, Vec::new()).await;
                // the remote may be unknown to the bootstrap, so answer on
                // its own connection instead of dialing back
                remember_inbound(&mut *connections.write().await, remote, &conn);

                let sink = sink.clone();
                tokio::spawn(async move {
                    loop {
                        match conn.accept_uni().await {
                            Ok(recv) => {
                                let sink = sink.clone();
                                tokio::spawn(async move {
                                    let summary = read_moves(recv, &sink).await;
                                    debug!("move stream from {} done: {:?}", remote, summary);
                                });
                            }
                            Err(e) => {
                                debug!("connection from {} closed: {}", remote, e);
                                break;
                            }
                        }
                    }
                });
            }
        })
    }

    /// cached connection to `peer` under `alpn`, dialing if needed
    async fn connection(&self, peer: PeerId, alpn: &'static [u8]) -> Result<Connection, OverlayError> {
        if let Some(conn) = self.connections.read().await.get(&(peer, alpn)) {
            return Ok(conn.clone());
        }

        let addrs = self.registry.addrs(&peer).await.unwrap_or_default();
        let addr = addrs
            .into_iter()
            .fold(EndpointAddr::from(endpoint_id(peer)?), |addr, ip| addr.with_ip_addr(ip));
        let conn = self
            .endpoint
            .connect(addr, alpn)
            .await
            .map_err(|e| OverlayError::Open(e.to_string()))?;

        self.connections.write().await.insert((peer, alpn), conn.clone());
        Ok(conn)
    }

    async fn forget(&self, peer: PeerId, alpn: &'static [u8]) {
        self.connections.write().await.remove(&(peer, alpn));
    }

    async fn rendezvous(&self, request: RendezvousRequest) -> Result<RendezvousResponse, OverlayError> {
        let peer = self.bootstrap.id;
        let result = timeout(self.lookup_timeout, async {
            let conn = self.connection(peer, RENDEZVOUS_ALPN).await?;
            let (mut send, mut recv) = conn
                .open_bi()
                .await
                .map_err(|e| OverlayError::Open(e.to_string()))?;
            let response = exchange(&mut send, &mut recv, &request).await?;
            Ok::<_, RendezvousError>(response)
        })
        .await;

        match result {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => {
                self.forget(peer, RENDEZVOUS_ALPN).await;
                Err(OverlayError::Network(e.to_string()))
            }
            Err(_) => {
                self.forget(peer, RENDEZVOUS_ALPN).await;
                Err(OverlayError::Network(format!(
                    "bootstrap did not answer within {:?}",
                    self.lookup_timeout
                )))
            }
        }
    }

    /// close the bootstrap connection, give game connections up to `linger`
    /// to be closed by the other side so the last move is not cut off, then
    /// close the endpoint
    pub async fn shutdown(&self, linger: Duration) {
        let cached: Vec<_> = self.connections.write().await.drain().collect();
        let (game, rendezvous) = split_game_connections(cached);
        for conn in &rendezvous {
            conn.close(VarInt::from_u32(0), b"done");
        }

        let mut waiting = JoinSet::new();
        for conn in game {
            waiting.spawn(async move {
                conn.closed().await;
            });
        }
        let pending = waiting.len();
        if timeout(linger, async { while waiting.join_next().await.is_some() {} })
            .await
            .is_err()
        {
            debug!("closing {} game connections after {:?}", pending, linger);
        }
        self.endpoint.close().await;
    }
}

type ConnectionCache<C> = HashMap<(PeerId, &'static [u8]), C>;

/// cache an accepted game connection unless we already dialed that peer
fn remember_inbound<C: Clone>(cache: &mut ConnectionCache<C>, remote: PeerId, conn: &C) -> bool {
    match cache.entry((remote, GAME_ALPN)) {
        Entry::Occupied(_) => false,
        Entry::Vacant(slot) => {
            slot.insert(conn.clone());
            true
        }
    }
}

/// split cached connections into (game, everything else)
fn split_game_connections<C>(cached: Vec<((PeerId, &'static [u8]), C)>) -> (Vec<C>, Vec<C>) {
    let mut game = Vec::new();
    let mut other = Vec::new();
    for ((_, alpn), conn) in cached {
        if alpn == GAME_ALPN {
            game.push(conn);
        } else {
            other.push(conn);
        }
    }
    (game, other)
}

impl Overlay for PlayerNode {
    type Stream = SendStream;

    fn local_id(&self) -> PeerId {
        self.local
    }

    async fn peers(&self) -> Vec<PeerId> {
        self.registry.ids().await
    }

    async fn announce(&self, topic: Topic) -> Result<(), OverlayError> {
        let addrs = self.advertise.iter().map(|a| a.to_string()).collect();
        match self.rendezvous(RendezvousRequest::Provide { topic, addrs }).await? {
            RendezvousResponse::Ack => {
                info!("announced on topic {}", topic);
                Ok(())
            }
            other => Err(OverlayError::Protocol(format!("unexpected reply to announce: {:?}", other))),
        }
    }

    async fn discover(&self, topic: Topic) -> Result<Vec<PeerId>, OverlayError> {
        let providers = match self.rendezvous(RendezvousRequest::FindProviders { topic }).await? {
            RendezvousResponse::Providers(providers) => providers,
            other => return Err(OverlayError::Protocol(format!("unexpected reply to lookup: {:?}", other))),
        };

        let mut found = Vec::with_capacity(providers.len());
        for record in providers {
            let addrs = record
                .addrs
                .iter()
                .filter_map(|a| match a.parse() {
                    Ok(addr) => Some(addr),
                    Err(_) => {
                        debug!("ignoring bad address {:?} of {}", a, record.peer);
                        None
                    }
                })
                .collect();
            self.registry.insert(record.peer, addrs).await;
            found.push(record.peer);
        }
        debug!("lookup on topic {} returned {} providers", topic, found.len());
        Ok(found)
    }

    async fn open_stream(&self, peer: PeerId, protocol: &'static [u8]) -> Result<SendStream, OverlayError> {
        let conn = self.connection(peer, protocol).await?;
        match conn.open_uni().await {
            Ok(send) => Ok(send),
            Err(e) => {
                self.forget(peer, protocol).await;
                Err(OverlayError::Open(e.to_string()))
            }
        }
    }
}

/// the well-known rendezvous responder; never plays
pub struct BootstrapNode {
    endpoint: Endpoint,
    local: PeerId,
    store: ProviderStore,
}

impl BootstrapNode {
    pub async fn bind(identity: &Identity, port: u16) -> Result<Self, OverlayError> {
        let endpoint = bind_endpoint(identity, Role::Bootstrap, port).await?;
        let local = peer_id(&endpoint.id());
        Ok(Self {
            endpoint,
            local,
            store: ProviderStore::default(),
        })
    }

    pub fn id(&self) -> PeerId {
        self.local
    }

    /// answer rendezvous requests until the endpoint closes
    pub async fn run(&self) -> Result<(), OverlayError> {
        info!("bootstrap {} waiting for players", self.local);

        while let Some(incoming) = self.endpoint.accept().await {
            let conn = match incoming.await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("inbound connection failed: {}", e);
                    continue;
                }
            };
            let remote = peer_id(&conn.remote_id());
            debug!("rendezvous connection from {}", remote);

            let store = self.store.clone();
            tokio::spawn(async move {
                loop {
                    let (mut send, mut recv) = match conn.accept_bi().await {
                        Ok(streams) => streams,
                        Err(e) => {
                            debug!("rendezvous connection from {} closed: {}", remote, e);
                            break;
                        }
                    };
                    if let Err(e) = store.serve(remote, &mut recv, &mut send).await {
                        warn!("rendezvous request from {} failed: {}", remote, e);
                    }
                }
            });
        }

        Ok(())
    }

    pub async fn close(&self) {
        self.endpoint.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_addr_parse() {
        let id = PeerId([0x11; 32]);
        let text = format!("{}@127.0.0.1:30000", id.to_hex());
        let addr: BootstrapAddr = text.parse().unwrap();
        assert_eq!(addr.id, id);
        assert_eq!(addr.addr, "127.0.0.1:30000".parse::<SocketAddr>().unwrap());
        assert_eq!(addr.to_string(), text);
    }

    #[test]
    fn test_bootstrap_addr_rejects_garbage() {
        assert!("127.0.0.1:30000".parse::<BootstrapAddr>().is_err());
        assert!("abcd@127.0.0.1:30000".parse::<BootstrapAddr>().is_err());
        let id = PeerId([0x11; 32]).to_hex();
        assert!(format!("{}@localhost", id).parse::<BootstrapAddr>().is_err());
    }

    #[tokio::test]
    async fn test_registry_keeps_order_and_merges() {
        let registry = PeerRegistry::default();
        let a = PeerId([1u8; 32]);
        let b = PeerId([2u8; 32]);
        let addr1: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let addr2: SocketAddr = "127.0.0.1:2".parse().unwrap();

        registry.insert(a, vec![addr1]).await;
        registry.insert(b, vec![]).await;
        registry.insert(a, vec![addr1, addr2]).await;

        assert_eq!(registry.ids().await, vec![a, b]);
        assert_eq!(registry.addrs(&a).await, Some(vec![addr1, addr2]));
        assert_eq!(registry.addrs(&PeerId([9u8; 32])).await, None);
    }

    #[test]
    fn test_split_game_connections() {
        let a = PeerId([1u8; 32]);
        let boot = PeerId([2u8; 32]);
        let cached = vec![
            ((boot, RENDEZVOUS_ALPN), "bootstrap"),
            ((a, GAME_ALPN), "opponent"),
        ];
        let (game, other) = split_game_connections(cached);
        assert_eq!(game, vec!["opponent"]);
        assert_eq!(other, vec!["bootstrap"]);
    }

    #[test]
    fn test_inbound_connection_answers_unknown_peer() {
        let peer = PeerId([3u8; 32]);
        let mut cache = ConnectionCache::new();

        assert!(remember_inbound(&mut cache, peer, &"inbound"));
        assert_eq!(cache.get(&(peer, GAME_ALPN)), Some(&"inbound"));

        // an existing connection to the same peer is kept
        assert!(!remember_inbound(&mut cache, peer, &"second"));
        assert_eq!(cache.get(&(peer, GAME_ALPN)), Some(&"inbound"));
        assert_eq!(cache.get(&(peer, RENDEZVOUS_ALPN)), None);
    }

    #[test]
    fn test_endpoint_id_round_trip() {
        let identity = Identity::from_secret([5u8; 32]);
        let id = endpoint_id(identity.peer_id()).unwrap();
        assert_eq!(peer_id(&id), identity.peer_id());
        assert_eq!(id, SecretKey::from_bytes(&[5u8; 32]).public());
    }
}
