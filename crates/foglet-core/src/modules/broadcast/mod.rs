//! Ordered broadcast
//!
//! Broadcast modules flood messages over the active layer and hand them to the
//! application in an order fixed by a [`DeliveryOrder`]:
//!
//! - [`FifoBroadcast`]: per-origin send order, stamped with a scalar clock
//! - [`CausalBroadcast`]: happens-before order, stamped with a version vector
//! - [`ReliableBroadcast`]: causal order plus acknowledged re-propagation
//!
//! Messages that arrive before their predecessors are buffered and released
//! as soon as the gap closes. Each message id reaches the application once.

mod causal;
mod engine;
mod fifo;
mod flood;
mod reliable;

use core::fmt;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::types::{MessageId, PeerId};
use crate::Result;

pub use causal::CausalOrder;
pub use engine::{BroadcastCore, Receipt};
pub use fifo::FifoOrder;
pub use flood::Broadcast;
pub use reliable::ReliableBroadcast;

/// Broadcast preserving per-origin send order
pub type FifoBroadcast = Broadcast<FifoOrder>;

/// Broadcast preserving happens-before order
pub type CausalBroadcast = Broadcast<CausalOrder>;

// ----------------------------------------------------------------------------
// Wire Types
// ----------------------------------------------------------------------------

/// A broadcast payload with its ordering stamp
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastMessage<S> {
    pub id: MessageId,
    pub origin: PeerId,
    pub stamp: S,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BroadcastFrame<S> {
    Data(BroadcastMessage<S>),
    /// Acknowledges receipt of a message by its id
    Ack { id: MessageId },
}

// ----------------------------------------------------------------------------
// Delivery Order
// ----------------------------------------------------------------------------

/// Clock discipline deciding when a received message may be delivered
pub trait DeliveryOrder: Send + 'static {
    type Stamp: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static;

    fn new(local: PeerId) -> Self;

    /// Stamp a locally created message, counting it as delivered here
    fn stamp(&mut self) -> Self::Stamp;

    /// Reject stamps that cannot belong to `origin`
    fn validate(&self, _origin: &PeerId, _stamp: &Self::Stamp) -> Result<()> {
        Ok(())
    }

    /// The local clock already covers this message
    fn is_stale(&self, origin: &PeerId, stamp: &Self::Stamp) -> bool;

    /// Every predecessor of this message has been delivered
    fn is_ready(&self, origin: &PeerId, stamp: &Self::Stamp) -> bool;

    /// Advance the local clock past a delivered message
    fn deliver(&mut self, origin: &PeerId, stamp: &Self::Stamp);
}

// ----------------------------------------------------------------------------
// Statistics
// ----------------------------------------------------------------------------

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastStats {
    /// Messages created locally
    pub created: u64,
    /// Remote messages handed to the application
    pub delivered: u64,
    /// Messages currently waiting for a predecessor
    pub buffered: u64,
    /// Repeated or stale arrivals that were dropped
    pub duplicates: u64,
    /// Arrivals dropped because the buffer was full
    pub dropped_overflow: u64,
}
