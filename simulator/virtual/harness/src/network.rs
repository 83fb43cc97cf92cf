//! In-memory random-peer-sampling network
//!
//! A [`MockNetwork`] is a hub shared by every simulated peer. Joining the hub
//! yields a [`MockRps`], the peer's base layer, together with the receiving
//! end of its event channel. Links are symmetric: connecting `a` to `b` emits
//! `PeerUp` on both sides, and tearing the link down emits `PeerDown` on both.
//! Envelopes travel on spawned tasks after a sampled latency, so they can be
//! dropped, duplicated and reordered according to [`MockNetworkConfig`].

use async_trait::async_trait;
use foglet_core::{
    Envelope, EventReceiver, EventSender, FogletError, Neighbours, Network, NetworkEvent, PeerId,
    Result, TransportError,
};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::MockNetworkConfig;

// ----------------------------------------------------------------------------
// Statistics
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Counters {
    sent: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    duplicated: AtomicU64,
}

/// Snapshot of the hub's traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockNetworkStats {
    pub sent: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub duplicated: u64,
}

// ----------------------------------------------------------------------------
// Hub
// ----------------------------------------------------------------------------

struct PeerSlot {
    events: EventSender,
    links: BTreeSet<PeerId>,
}

struct Hub {
    config: MockNetworkConfig,
    peers: Mutex<HashMap<PeerId, PeerSlot>>,
    counters: Counters,
}

fn peer_not_found(peer: &PeerId) -> FogletError {
    TransportError::PeerNotFound {
        peer_id: peer.to_string(),
    }
    .into()
}

/// Deliver lifecycle events after the hub lock has been released
async fn notify(events: Vec<(EventSender, NetworkEvent)>) {
    for (sender, event) in events {
        if sender.send(event).await.is_err() {
            debug!("Mock network: event receiver gone, dropping event");
        }
    }
}

impl Hub {
    fn link(&self, a: &PeerId, b: &PeerId) -> Result<Vec<(EventSender, NetworkEvent)>> {
        if a == b {
            return Err(TransportError::ConnectionFailed {
                peer_id: a.to_string(),
                reason: "cannot link a peer to itself".into(),
            }
            .into());
        }

        let mut peers = self.peers.lock();
        if !peers.contains_key(b) {
            return Err(peer_not_found(b));
        }
        let slot_a = peers.get_mut(a).ok_or_else(|| peer_not_found(a))?;
        if !slot_a.links.insert(b.clone()) {
            return Ok(Vec::new());
        }
        let sender_a = slot_a.events.clone();

        let slot_b = peers.get_mut(b).ok_or_else(|| peer_not_found(b))?;
        slot_b.links.insert(a.clone());
        let sender_b = slot_b.events.clone();

        debug!("Mock network: linked {} <-> {}", a, b);
        Ok(vec![
            (sender_a, NetworkEvent::PeerUp { peer: b.clone() }),
            (sender_b, NetworkEvent::PeerUp { peer: a.clone() }),
        ])
    }

    fn unlink(&self, a: &PeerId, b: &PeerId) -> Result<Vec<(EventSender, NetworkEvent)>> {
        let mut peers = self.peers.lock();
        let slot_a = peers.get_mut(a).ok_or_else(|| peer_not_found(a))?;
        if !slot_a.links.remove(b) {
            return Err(peer_not_found(b));
        }
        let mut events = vec![(
            slot_a.events.clone(),
            NetworkEvent::PeerDown { peer: b.clone() },
        )];

        if let Some(slot_b) = peers.get_mut(b) {
            slot_b.links.remove(a);
            let down = NetworkEvent::PeerDown { peer: a.clone() };
            events.push((slot_b.events.clone(), down));
        }

        debug!("Mock network: unlinked {} <-> {}", a, b);
        Ok(events)
    }

    /// Event sender of `to` when the link `from -> to` exists
    fn route(&self, from: &PeerId, to: &PeerId) -> Option<EventSender> {
        let peers = self.peers.lock();
        let linked = peers
            .get(from)
            .map(|slot| slot.links.contains(to))
            .unwrap_or(false);
        if !linked {
            return None;
        }
        peers.get(to).map(|slot| slot.events.clone())
    }

    /// A random joined peer `local` is not linked to yet
    fn pick_candidate(&self, local: &PeerId) -> Option<PeerId> {
        let peers = self.peers.lock();
        let links = peers.get(local).map(|slot| &slot.links);
        let candidates: Vec<&PeerId> = peers
            .keys()
            .filter(|peer| *peer != local)
            .filter(|peer| links.map(|links| !links.contains(*peer)).unwrap_or(true))
            .collect();
        if candidates.is_empty() {
            return None;
        }
        Some(candidates[fastrand::usize(..candidates.len())].clone())
    }

    fn neighbours(&self, local: &PeerId, limit: Option<usize>) -> Neighbours {
        let peers = self.peers.lock();
        match peers.get(local) {
            Some(slot) => slot
                .links
                .iter()
                .take(limit.unwrap_or(usize::MAX))
                .cloned()
                .collect(),
            None => Neighbours::new(),
        }
    }
}

// ----------------------------------------------------------------------------
// Mock Network
// ----------------------------------------------------------------------------

/// Shared hub connecting simulated peers
#[derive(Clone)]
pub struct MockNetwork {
    hub: Arc<Hub>,
}

impl MockNetwork {
    pub fn new(config: MockNetworkConfig) -> Self {
        Self {
            hub: Arc::new(Hub {
                config,
                peers: Mutex::new(HashMap::new()),
                counters: Counters::default(),
            }),
        }
    }

    pub fn ideal() -> Self {
        Self::new(MockNetworkConfig::ideal())
    }

    pub fn jittery() -> Self {
        Self::new(MockNetworkConfig::jittery())
    }

    /// Register a peer and hand out its base layer and event stream
    pub fn join(&self, peer: PeerId) -> Result<(Arc<MockRps>, EventReceiver)> {
        let mut peers = self.hub.peers.lock();
        if peers.contains_key(&peer) {
            return Err(FogletError::AlreadyConnected {
                peer_id: peer.to_string(),
            });
        }
        let (events, receiver) = mpsc::channel(self.hub.config.event_buffer_size.max(1));
        peers.insert(
            peer.clone(),
            PeerSlot {
                events,
                links: BTreeSet::new(),
            },
        );
        debug!("Mock network: {} joined", peer);

        let rps = Arc::new(MockRps {
            local: peer,
            hub: self.hub.clone(),
        });
        Ok((rps, receiver))
    }

    /// Remove a peer, tearing down all of its links
    pub async fn leave(&self, peer: &PeerId) -> Result<()> {
        let events = {
            let mut peers = self.hub.peers.lock();
            let slot = peers.remove(peer).ok_or_else(|| peer_not_found(peer))?;
            let mut events = Vec::new();
            for linked in &slot.links {
                if let Some(other) = peers.get_mut(linked) {
                    other.links.remove(peer);
                    let down = NetworkEvent::PeerDown { peer: peer.clone() };
                    events.push((other.events.clone(), down));
                }
            }
            events
        };
        debug!("Mock network: {} left", peer);
        notify(events).await;
        Ok(())
    }

    /// Link two joined peers
    pub async fn link(&self, a: &PeerId, b: &PeerId) -> Result<()> {
        let events = self.hub.link(a, b)?;
        notify(events).await;
        Ok(())
    }

    /// Link every pair of the given peers
    pub async fn full_mesh(&self, peers: &[PeerId]) -> Result<()> {
        for (index, a) in peers.iter().enumerate() {
            for b in &peers[index + 1..] {
                self.link(a, b).await?;
            }
        }
        Ok(())
    }

    /// Link the given peers into a ring
    pub async fn ring(&self, peers: &[PeerId]) -> Result<()> {
        if peers.len() < 2 {
            return Ok(());
        }
        for (index, a) in peers.iter().enumerate() {
            let b = &peers[(index + 1) % peers.len()];
            self.link(a, b).await?;
        }
        Ok(())
    }

    pub fn is_linked(&self, a: &PeerId, b: &PeerId) -> bool {
        self.hub.route(a, b).is_some()
    }

    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.hub.peers.lock().keys().cloned().collect();
        peers.sort();
        peers
    }

    pub fn config(&self) -> &MockNetworkConfig {
        &self.hub.config
    }

    pub fn stats(&self) -> MockNetworkStats {
        let counters = &self.hub.counters;
        MockNetworkStats {
            sent: counters.sent.load(Ordering::Relaxed),
            delivered: counters.delivered.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            duplicated: counters.duplicated.load(Ordering::Relaxed),
        }
    }
}

// ----------------------------------------------------------------------------
// Mock RPS
// ----------------------------------------------------------------------------

/// Base layer of one simulated peer
pub struct MockRps {
    local: PeerId,
    hub: Arc<Hub>,
}

impl MockRps {
    pub fn local(&self) -> &PeerId {
        &self.local
    }

    fn dispatch_copy(&self, to: PeerId, envelope: Envelope) {
        let latency = self.hub.config.sample_latency();
        let hub = self.hub.clone();
        let from = self.local.clone();

        tokio::spawn(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            // The link may have gone away while the envelope was in flight
            let Some(target) = hub.route(&from, &to) else {
                hub.counters.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            };
            let event = NetworkEvent::Receive { from, envelope };
            if target.send(event).await.is_ok() {
                hub.counters.delivered.fetch_add(1, Ordering::Relaxed);
            } else {
                hub.counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
        });
    }
}

#[async_trait]
impl Network for MockRps {
    fn name(&self) -> &str {
        "mock-rps"
    }

    async fn connect(&self, peer: Option<PeerId>) -> Result<()> {
        let peer = match peer {
            Some(peer) => peer,
            None => self.hub.pick_candidate(&self.local).ok_or_else(|| {
                FogletError::from(TransportError::ConnectionFailed {
                    peer_id: self.local.to_string(),
                    reason: "no unlinked peer left to sample".into(),
                })
            })?,
        };
        let events = self.hub.link(&self.local, &peer)?;
        notify(events).await;
        Ok(())
    }

    async fn disconnect(&self, peer: &PeerId) -> Result<()> {
        let events = self.hub.unlink(&self.local, peer)?;
        notify(events).await;
        Ok(())
    }

    async fn send(&self, peer: &PeerId, envelope: Envelope) -> Result<()> {
        if self.hub.route(&self.local, peer).is_none() {
            return Err(peer_not_found(peer));
        }
        self.hub.counters.sent.fetch_add(1, Ordering::Relaxed);

        if self.hub.config.should_drop() {
            debug!("Mock network: dropped envelope {} -> {}", self.local, peer);
            self.hub.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        if self.hub.config.should_duplicate() {
            debug!("Mock network: duplicated envelope {} -> {}", self.local, peer);
            self.hub.counters.duplicated.fetch_add(1, Ordering::Relaxed);
            self.dispatch_copy(peer.clone(), envelope.clone());
        }
        self.dispatch_copy(peer.clone(), envelope);
        Ok(())
    }

    fn neighbours(&self, limit: Option<usize>) -> Neighbours {
        self.hub.neighbours(&self.local, limit)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
