//! Buffering and release shared by every broadcast variant

use hashbrown::HashSet;
use std::collections::VecDeque;
use tracing::{debug, warn};

use super::{BroadcastMessage, BroadcastStats, DeliveryOrder};
use crate::config::BroadcastConfig;
use crate::types::{MessageId, PeerId};
use crate::Result;

// ----------------------------------------------------------------------------
// Delivered Ids
// ----------------------------------------------------------------------------

/// Bounded set of delivered ids; the oldest ids are forgotten first
#[derive(Debug)]
struct DeliveredIds {
    ids: HashSet<MessageId>,
    order: VecDeque<MessageId>,
    capacity: usize,
}

impl DeliveredIds {
    fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    fn insert(&mut self, id: MessageId) {
        if !self.ids.insert(id) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Receipt
// ----------------------------------------------------------------------------

/// What happened to a received message
#[derive(Debug)]
pub enum Receipt<S> {
    /// Already delivered, already buffered, or covered by the local clock
    Duplicate,
    /// First receipt; carries every message released by it, in delivery order
    ///
    /// The list is empty when the message was buffered.
    Accepted { released: Vec<BroadcastMessage<S>> },
    /// The buffer is full; the message was neither buffered nor marked delivered
    Overflow,
}

impl<S> Receipt<S> {
    /// Whether the message should be forwarded to the neighbours
    pub fn is_first_receipt(&self) -> bool {
        matches!(self, Receipt::Accepted { .. })
    }
}

// ----------------------------------------------------------------------------
// Broadcast Core
// ----------------------------------------------------------------------------

/// Per-module broadcast state: clock, pending buffer and delivered ids
pub struct BroadcastCore<O: DeliveryOrder> {
    local: PeerId,
    order: O,
    pending: Vec<BroadcastMessage<O::Stamp>>,
    delivered: DeliveredIds,
    max_pending: usize,
    stats: BroadcastStats,
}

impl<O: DeliveryOrder> BroadcastCore<O> {
    pub fn new(local: PeerId, config: &BroadcastConfig) -> Self {
        Self {
            order: O::new(local.clone()),
            local,
            pending: Vec::new(),
            delivered: DeliveredIds::new(config.max_delivered_ids),
            max_pending: config.max_pending,
            stats: BroadcastStats::default(),
        }
    }

    /// Stamp a new local message; it counts as delivered at its origin
    pub fn create(&mut self, payload: Vec<u8>) -> BroadcastMessage<O::Stamp> {
        let message = BroadcastMessage {
            id: MessageId::new(),
            origin: self.local.clone(),
            stamp: self.order.stamp(),
            payload,
        };
        self.delivered.insert(message.id);
        self.stats.created += 1;
        message
    }

    /// Run a received message through dedup, readiness and buffering
    pub fn receive(&mut self, message: BroadcastMessage<O::Stamp>) -> Result<Receipt<O::Stamp>> {
        if self.delivered.contains(&message.id) || self.is_buffered(&message.id) {
            debug!("Broadcast: dropping duplicate {}", message.id);
            self.stats.duplicates += 1;
            return Ok(Receipt::Duplicate);
        }
        self.order.validate(&message.origin, &message.stamp)?;
        if self.order.is_stale(&message.origin, &message.stamp) {
            debug!("Broadcast: dropping stale {} from {}", message.id, message.origin);
            self.stats.duplicates += 1;
            return Ok(Receipt::Duplicate);
        }

        if !self.order.is_ready(&message.origin, &message.stamp) {
            if self.pending.len() >= self.max_pending {
                warn!(
                    "Broadcast: buffer full ({} messages), dropping {} from {}",
                    self.pending.len(),
                    message.id,
                    message.origin
                );
                self.stats.dropped_overflow += 1;
                return Ok(Receipt::Overflow);
            }
            debug!("Broadcast: buffering {} from {}", message.id, message.origin);
            self.pending.push(message);
            return Ok(Receipt::Accepted {
                released: Vec::new(),
            });
        }

        let mut released = vec![self.deliver(message)];
        self.release_ready(&mut released);
        Ok(Receipt::Accepted { released })
    }

    /// Deliver buffered messages until none is ready
    ///
    /// A single delivery can unblock several buffered messages, so the scan
    /// restarts after every release.
    fn release_ready(&mut self, released: &mut Vec<BroadcastMessage<O::Stamp>>) {
        loop {
            let order = &self.order;
            let Some(index) = self
                .pending
                .iter()
                .position(|message| order.is_ready(&message.origin, &message.stamp))
            else {
                break;
            };
            let message = self.pending.remove(index);
            released.push(self.deliver(message));
        }
    }

    fn deliver(&mut self, message: BroadcastMessage<O::Stamp>) -> BroadcastMessage<O::Stamp> {
        self.order.deliver(&message.origin, &message.stamp);
        self.delivered.insert(message.id);
        self.stats.delivered += 1;
        message
    }

    fn is_buffered(&self, id: &MessageId) -> bool {
        self.pending.iter().any(|message| &message.id == id)
    }

    pub fn has_delivered(&self, id: &MessageId) -> bool {
        self.delivered.contains(id)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn order(&self) -> &O {
        &self.order
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            buffered: self.pending.len() as u64,
            ..self.stats.clone()
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
