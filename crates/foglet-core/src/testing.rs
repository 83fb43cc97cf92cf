//! Test utilities
//!
//! A [`RecordingNetwork`] stands in for the base RPS: it keeps a neighbour
//! list, records every envelope handed to it instead of delivering it, and
//! counts disconnect calls. Tests then feed the recorded envelopes to the
//! receiving modules in whatever order they want to exercise.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::OverlayConfig;
use crate::errors::TransportError;
use crate::modules::ModuleContext;
use crate::overlay::{NetworkHandle, OverlayManager};
use crate::transport::{Envelope, Neighbours, Network};
use crate::types::{PeerId, TimeSource, Timestamp};
use crate::Result;

// ----------------------------------------------------------------------------
// Manual Time Source
// ----------------------------------------------------------------------------

/// Time source that only moves when told to
///
/// Clones share the same clock.
#[derive(Debug, Clone, Default)]
pub struct ManualTimeSource {
    millis: Arc<AtomicU64>,
}

impl ManualTimeSource {
    pub fn new(start: Timestamp) -> Self {
        Self {
            millis: Arc::new(AtomicU64::new(start.as_millis())),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.millis.load(Ordering::SeqCst))
    }
}

// ----------------------------------------------------------------------------
// Recording Network
// ----------------------------------------------------------------------------

/// Envelope captured by a [`RecordingNetwork`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEnvelope {
    pub to: PeerId,
    pub envelope: Envelope,
}

/// Network layer that records sends instead of delivering them
#[derive(Debug)]
pub struct RecordingNetwork {
    local: PeerId,
    neighbours: Mutex<Vec<PeerId>>,
    sent: Mutex<Vec<SentEnvelope>>,
    disconnects: AtomicUsize,
}

impl RecordingNetwork {
    pub fn new(local: PeerId) -> Self {
        Self {
            local,
            neighbours: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            disconnects: AtomicUsize::new(0),
        }
    }

    pub fn local(&self) -> &PeerId {
        &self.local
    }

    pub fn add_neighbour(&self, peer: PeerId) {
        let mut neighbours = self.neighbours.lock();
        if !neighbours.contains(&peer) {
            neighbours.push(peer);
        }
    }

    pub fn remove_neighbour(&self, peer: &PeerId) {
        self.neighbours.lock().retain(|known| known != peer);
    }

    /// Everything sent so far
    pub fn sent(&self) -> Vec<SentEnvelope> {
        self.sent.lock().clone()
    }

    /// Drain the recorded sends
    pub fn take_sent(&self) -> Vec<SentEnvelope> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Network for RecordingNetwork {
    fn name(&self) -> &str {
        "recording"
    }

    async fn connect(&self, peer: Option<PeerId>) -> Result<()> {
        match peer {
            Some(peer) => {
                self.add_neighbour(peer);
                Ok(())
            }
            None => Err(TransportError::ConnectionFailed {
                peer_id: "<any>".into(),
                reason: "recording network cannot pick peers".into(),
            }
            .into()),
        }
    }

    async fn disconnect(&self, peer: &PeerId) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.remove_neighbour(peer);
        Ok(())
    }

    async fn send(&self, peer: &PeerId, envelope: Envelope) -> Result<()> {
        if !self.neighbours.lock().contains(peer) {
            return Err(TransportError::PeerNotFound {
                peer_id: peer.to_string(),
            }
            .into());
        }
        self.sent.lock().push(SentEnvelope {
            to: peer.clone(),
            envelope,
        });
        Ok(())
    }

    fn neighbours(&self, limit: Option<usize>) -> Neighbours {
        let neighbours = self.neighbours.lock();
        let take = limit.unwrap_or(neighbours.len());
        neighbours.iter().take(take).cloned().collect()
    }
}

// ----------------------------------------------------------------------------
// Module Fixtures
// ----------------------------------------------------------------------------

/// Handle over a manager whose only layer is `rps`
pub fn network_handle(rps: Arc<dyn Network>) -> NetworkHandle {
    let manager = OverlayManager::new(rps, &OverlayConfig::default());
    NetworkHandle::new(Arc::new(RwLock::new(manager)))
}

/// Construction context for a module running on `rps`
pub fn module_context(name: &str, rps: Arc<RecordingNetwork>) -> ModuleContext {
    let local_id = rps.local().clone();
    ModuleContext {
        name: name.to_string(),
        local_id,
        network: network_handle(rps),
        options: serde_json::Value::Null,
    }
}
