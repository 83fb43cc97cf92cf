//! Causal broadcast with acknowledged re-propagation
//!
//! Every data frame is acknowledged by the neighbour that receives it, even
//! when it is a duplicate. Each (message, neighbour) pair stays in a
//! [`DeliveryTracker`] until acknowledged, and is re-sent with exponential
//! backoff on every tick until the retry budget runs out. Neighbours that
//! arrive later receive the recently seen messages as soon as they come up.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{Broadcast, BroadcastFrame, BroadcastStats, CausalOrder, Receipt};
use crate::clock::VersionVector;
use crate::config::{BroadcastConfig, DeliveryConfig};
use crate::delivery::{DeliveryStats, DeliveryTracker};
use crate::errors::HandlerResult;
use crate::modules::{HandlerId, Module, ModuleContext};
use crate::transport::{Envelope, Network};
use crate::types::{MessageId, PeerId, SystemTimeSource, TimeSource};
use crate::Result;

pub struct ReliableBroadcast<T: TimeSource = SystemTimeSource> {
    inner: Broadcast<CausalOrder>,
    tracker: Mutex<DeliveryTracker<T>>,
    recent: Mutex<VecDeque<(MessageId, Envelope)>>,
    retain_recent: usize,
}

impl ReliableBroadcast<SystemTimeSource> {
    pub fn new(
        context: ModuleContext,
        broadcast: &BroadcastConfig,
        delivery: &DeliveryConfig,
    ) -> Self {
        Self::with_time_source(context, broadcast, delivery, SystemTimeSource)
    }
}

impl<T: TimeSource> ReliableBroadcast<T> {
    pub fn with_time_source(
        context: ModuleContext,
        broadcast: &BroadcastConfig,
        delivery: &DeliveryConfig,
        time_source: T,
    ) -> Self {
        Self {
            inner: Broadcast::new(context, broadcast),
            tracker: Mutex::new(DeliveryTracker::new(delivery.clone(), time_source)),
            recent: Mutex::new(VecDeque::new()),
            retain_recent: delivery.retain_recent,
        }
    }

    pub fn on_receive<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(PeerId, Vec<u8>) -> HandlerResult + Send + Sync + 'static,
    {
        self.inner.on_receive(handler)
    }

    pub fn off(&self, id: HandlerId) -> bool {
        self.inner.off(id)
    }

    /// Stamp `payload`, flood it, and track it towards every neighbour
    pub async fn send(&self, payload: Vec<u8>) -> Result<MessageId> {
        let (message, envelope) = self.inner.create(payload)?;
        self.remember(message.id, &envelope);
        self.propagate(message.id, &envelope, &[]).await;
        Ok(message.id)
    }

    pub fn stats(&self) -> BroadcastStats {
        self.inner.stats()
    }

    pub fn delivery_stats(&self) -> DeliveryStats {
        self.tracker.lock().stats()
    }

    pub fn pending_len(&self) -> usize {
        self.inner.pending_len()
    }

    fn remember(&self, id: MessageId, envelope: &Envelope) {
        if self.retain_recent == 0 {
            return;
        }
        let mut recent = self.recent.lock();
        recent.push_back((id, envelope.clone()));
        while recent.len() > self.retain_recent {
            recent.pop_front();
        }
    }

    async fn propagate(&self, id: MessageId, envelope: &Envelope, exclude: &[&PeerId]) {
        let network = self.inner.network().active();
        for peer in network.neighbours(None) {
            if exclude.iter().any(|excluded| *excluded == &peer) {
                continue;
            }
            self.tracker.lock().track(id, peer.clone(), envelope.clone());
            self.transmit(&network, id, &peer, envelope).await;
        }
    }

    /// One attempt towards one neighbour; failures count as attempts
    async fn transmit(
        &self,
        network: &Arc<dyn Network>,
        id: MessageId,
        peer: &PeerId,
        envelope: &Envelope,
    ) {
        if let Err(e) = network.send(peer, envelope.clone()).await {
            debug!(
                "{}: attempt for {} towards {} failed: {}",
                self.inner.name(),
                id,
                peer,
                e
            );
        }
        self.tracker.lock().mark_sent(&id, peer);
    }

    async fn acknowledge(&self, id: MessageId, peer: &PeerId) {
        let ack = match self.inner.encode(&BroadcastFrame::Ack { id }) {
            Ok(ack) => ack,
            Err(e) => {
                warn!("{}: cannot encode ack for {}: {}", self.inner.name(), id, e);
                return;
            }
        };
        if let Err(e) = self.inner.network().active().send(peer, ack).await {
            debug!(
                "{}: ack for {} towards {} failed: {}",
                self.inner.name(),
                id,
                peer,
                e
            );
        }
    }
}

#[async_trait]
impl<T: TimeSource + 'static> Module for ReliableBroadcast<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn on_envelope(&self, from: &PeerId, envelope: &Envelope) -> Result<()> {
        match envelope.decode::<BroadcastFrame<VersionVector>>()? {
            BroadcastFrame::Data(message) => {
                let id = message.id;
                let origin = message.origin.clone();
                let receipt = self.inner.accept(message)?;
                if matches!(receipt, Receipt::Overflow) {
                    // Left unacknowledged so the sender retries later
                    return Ok(());
                }
                self.acknowledge(id, from).await;
                if receipt.is_first_receipt() {
                    self.remember(id, envelope);
                    self.propagate(id, envelope, &[from, &origin]).await;
                }
            }
            BroadcastFrame::Ack { id } => {
                if !self.tracker.lock().confirm(&id, from) {
                    debug!("{}: untracked ack for {} from {}", self.name(), id, from);
                }
            }
        }
        Ok(())
    }

    async fn on_peer_up(&self, peer: &PeerId) -> Result<()> {
        let recent: Vec<_> = self.recent.lock().iter().cloned().collect();
        if recent.is_empty() {
            return Ok(());
        }
        debug!("{}: re-sending {} message(s) to {}", self.name(), recent.len(), peer);
        let network = self.inner.network().active();
        for (id, envelope) in recent {
            let fresh = self.tracker.lock().track(id, peer.clone(), envelope.clone());
            if fresh {
                self.transmit(&network, id, peer, &envelope).await;
            }
        }
        Ok(())
    }

    async fn on_peer_down(&self, peer: &PeerId) -> Result<()> {
        let dropped = self.tracker.lock().forget_peer(peer);
        if dropped > 0 {
            debug!("{}: dropped {} delivery(ies) towards {}", self.name(), dropped, peer);
        }
        Ok(())
    }

    async fn tick(&self) -> Result<()> {
        let due = self.tracker.lock().ready_for_retry();
        if !due.is_empty() {
            let network = self.inner.network().active();
            for ((id, peer), envelope) in due {
                self.transmit(&network, id, &peer, &envelope).await;
            }
        }

        let sweep = self.tracker.lock().sweep();
        for failed in sweep.failed {
            warn!(
                "{}: giving up on {} towards {} after {} attempt(s)",
                self.name(),
                failed.message_id,
                failed.recipient,
                failed.attempt_count()
            );
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
