//! Transport abstraction for the Foglet stack
//!
//! The random-peer-sampling service and every overlay layer stacked on top of
//! it implement [`Network`]. Messaging modules never talk to a concrete
//! transport; they resolve the active layer through the overlay manager and
//! call it through this trait.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use smallvec::SmallVec;
use tokio::sync::mpsc;

use crate::config::ChannelConfig;
use crate::types::PeerId;
use crate::Result;

/// Neighbour list returned by network layers (optimized for small views)
pub type Neighbours = SmallVec<[PeerId; 8]>;

// ----------------------------------------------------------------------------
// Envelope
// ----------------------------------------------------------------------------

/// Protocol-multiplexed frame carried by every network layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol name used to route the frame to its module
    pub protocol: String,
    /// Module-specific body
    pub body: Vec<u8>,
}

impl Envelope {
    /// Create an envelope from a raw body
    pub fn new<P: Into<String>>(protocol: P, body: Vec<u8>) -> Self {
        Self {
            protocol: protocol.into(),
            body,
        }
    }

    /// Serialize a module frame into an envelope
    pub fn encode<P: Into<String>, T: Serialize>(protocol: P, frame: &T) -> Result<Self> {
        Ok(Self::new(protocol, bincode::serialize(frame)?))
    }

    /// Deserialize the body as a module frame
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(bincode::deserialize(&self.body)?)
    }
}

// ----------------------------------------------------------------------------
// Network Trait
// ----------------------------------------------------------------------------

/// Capabilities of the base RPS and of every overlay layer
#[async_trait]
pub trait Network: Send + Sync {
    /// Human-readable name of the layer implementation
    fn name(&self) -> &str;

    /// Connect to a given peer, or let the layer pick one
    async fn connect(&self, peer: Option<PeerId>) -> Result<()>;

    /// Tear down the link to a peer
    async fn disconnect(&self, peer: &PeerId) -> Result<()>;

    /// Send an envelope to a direct neighbour
    async fn send(&self, peer: &PeerId, envelope: Envelope) -> Result<()>;

    /// Current neighbours, optionally capped at `limit`
    fn neighbours(&self, limit: Option<usize>) -> Neighbours;
}

// ----------------------------------------------------------------------------
// Network Events (data channel)
// ----------------------------------------------------------------------------

/// Events emitted by the base transport towards the dispatch loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    /// A direct link to `peer` is now usable
    PeerUp { peer: PeerId },
    /// The direct link to `peer` is gone
    PeerDown { peer: PeerId },
    /// An envelope arrived from a neighbour
    Receive { from: PeerId, envelope: Envelope },
}

pub type EventSender = mpsc::Sender<NetworkEvent>;
pub type EventReceiver = mpsc::Receiver<NetworkEvent>;

/// Create the bounded data channel (transport → dispatch loop)
pub fn create_event_channel(config: &ChannelConfig) -> (EventSender, EventReceiver) {
    mpsc::channel(config.event_buffer_size)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
