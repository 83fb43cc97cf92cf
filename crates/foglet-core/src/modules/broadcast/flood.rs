use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{
    BroadcastCore, BroadcastFrame, BroadcastMessage, BroadcastStats, DeliveryOrder, Receipt,
};
use crate::config::BroadcastConfig;
use crate::errors::HandlerResult;
use crate::modules::{Handler, HandlerId, HandlerSet, Module, ModuleContext};
use crate::overlay::NetworkHandle;
use crate::transport::Envelope;
use crate::types::{MessageId, PeerId};
use crate::Result;

/// Flooding broadcast module ordered by `O`
///
/// A message is forwarded once, on its first receipt, to every neighbour of
/// the active layer except the one it came from and its origin.
pub struct Broadcast<O: DeliveryOrder> {
    name: String,
    local: PeerId,
    network: NetworkHandle,
    core: Mutex<BroadcastCore<O>>,
    handlers: HandlerSet,
}

impl<O: DeliveryOrder> Broadcast<O> {
    pub fn new(context: ModuleContext, config: &BroadcastConfig) -> Self {
        Self {
            core: Mutex::new(BroadcastCore::new(context.local_id.clone(), config)),
            name: context.name,
            local: context.local_id,
            network: context.network,
            handlers: HandlerSet::new(),
        }
    }

    /// Register a handler receiving `(origin, payload)` for delivered messages
    pub fn on_receive<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(PeerId, Vec<u8>) -> HandlerResult + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        self.handlers.add(handler)
    }

    pub fn off(&self, id: HandlerId) -> bool {
        self.handlers.remove(id)
    }

    /// Stamp `payload` and flood it to the current neighbours
    ///
    /// Local handlers are not invoked for the peer's own messages. Send
    /// failures towards single neighbours are logged, not returned.
    pub async fn send(&self, payload: Vec<u8>) -> Result<MessageId> {
        let (message, envelope) = self.create(payload)?;
        self.fan_out(&envelope, &[]).await;
        Ok(message.id)
    }

    pub fn stats(&self) -> BroadcastStats {
        self.core.lock().stats()
    }

    pub fn pending_len(&self) -> usize {
        self.core.lock().pending_len()
    }

    pub fn local_id(&self) -> &PeerId {
        &self.local
    }

    pub(super) fn create(
        &self,
        payload: Vec<u8>,
    ) -> Result<(BroadcastMessage<O::Stamp>, Envelope)> {
        let message = self.core.lock().create(payload);
        let envelope = self.encode(&BroadcastFrame::Data(message.clone()))?;
        Ok((message, envelope))
    }

    pub(super) fn encode(&self, frame: &BroadcastFrame<O::Stamp>) -> Result<Envelope> {
        Envelope::encode(self.name.as_str(), frame)
    }

    /// Send `envelope` to every neighbour not excluded
    async fn fan_out(&self, envelope: &Envelope, exclude: &[&PeerId]) {
        let network = self.network.active();
        for peer in network.neighbours(None) {
            if exclude.iter().any(|excluded| *excluded == &peer) {
                continue;
            }
            if let Err(e) = network.send(&peer, envelope.clone()).await {
                warn!("{}: send to {} failed: {}", self.name, peer, e);
            }
        }
    }

    /// Feed a received message to the engine and notify the application
    pub(super) fn accept(
        &self,
        message: BroadcastMessage<O::Stamp>,
    ) -> Result<Receipt<O::Stamp>> {
        let receipt = self.core.lock().receive(message)?;
        if let Receipt::Accepted { released } = &receipt {
            for delivered in released {
                self.handlers.emit(&self.name, &delivered.origin, &delivered.payload);
            }
        }
        Ok(receipt)
    }

    pub(super) fn network(&self) -> &NetworkHandle {
        &self.network
    }
}

#[async_trait]
impl<O: DeliveryOrder> Module for Broadcast<O> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_envelope(&self, from: &PeerId, envelope: &Envelope) -> Result<()> {
        match envelope.decode::<BroadcastFrame<O::Stamp>>()? {
            BroadcastFrame::Data(message) => {
                let origin = message.origin.clone();
                if self.accept(message)?.is_first_receipt() {
                    self.fan_out(envelope, &[from, &origin]).await;
                }
            }
            BroadcastFrame::Ack { id } => {
                debug!("{}: ignoring ack for {} from {}", self.name, id, from);
            }
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::broadcast::{CausalBroadcast, CausalOrder, FifoBroadcast, FifoOrder};
    use crate::testing::{module_context, RecordingNetwork, SentEnvelope};

    type Log = Arc<Mutex<Vec<(PeerId, Vec<u8>)>>>;

    struct Node<O: DeliveryOrder> {
        id: PeerId,
        module: Broadcast<O>,
        net: Arc<RecordingNetwork>,
        log: Log,
    }

    fn node<O: DeliveryOrder>(id: &str, neighbours: &[&str]) -> Node<O> {
        let net = Arc::new(RecordingNetwork::new(PeerId::new(id)));
        for neighbour in neighbours {
            net.add_neighbour(PeerId::new(*neighbour));
        }
        let module = Broadcast::new(
            module_context("broadcast", net.clone()),
            &BroadcastConfig::default(),
        );
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        module.on_receive(move |origin, payload| {
            sink.lock().push((origin, payload));
            Ok(())
        });
        Node {
            id: PeerId::new(id),
            module,
            net,
            log,
        }
    }

    fn sent_to<'a>(sent: &'a [SentEnvelope], peer: &str) -> Vec<&'a Envelope> {
        sent.iter()
            .filter(|s| s.to.as_str() == peer)
            .map(|s| &s.envelope)
            .collect()
    }

    fn payloads(log: &Log) -> Vec<Vec<u8>> {
        log.lock().iter().map(|(_, payload)| payload.clone()).collect()
    }

    #[tokio::test]
    async fn test_same_origin_reordering_is_repaired() {
        let p0: Node<CausalOrder> = node("p0", &["p1"]);
        let p1: Node<CausalOrder> = node("p1", &["p0"]);

        p0.module.send(b"msg1".to_vec()).await.unwrap();
        p0.module.send(b"msg2".to_vec()).await.unwrap();
        let sent = p0.net.take_sent();
        let to_p1 = sent_to(&sent, "p1");
        assert_eq!(to_p1.len(), 2);

        // msg2 arrives first and waits for msg1
        p1.module.on_envelope(&p0.id, to_p1[1]).await.unwrap();
        assert!(p1.log.lock().is_empty());
        assert_eq!(p1.module.pending_len(), 1);

        p1.module.on_envelope(&p0.id, to_p1[0]).await.unwrap();
        assert_eq!(payloads(&p1.log), vec![b"msg1".to_vec(), b"msg2".to_vec()]);
        assert_eq!(p1.log.lock()[0].0, p0.id);
    }

    #[tokio::test]
    async fn test_causal_order_across_origins() {
        let a: Node<CausalOrder> = node("a", &["b", "c"]);
        let b: Node<CausalOrder> = node("b", &["a", "c"]);
        let c: Node<CausalOrder> = node("c", &["a", "b"]);

        a.module.send(b"question".to_vec()).await.unwrap();
        let from_a = a.net.take_sent();
        b.module
            .on_envelope(&a.id, sent_to(&from_a, "b")[0])
            .await
            .unwrap();
        b.net.take_sent();

        b.module.send(b"answer".to_vec()).await.unwrap();
        let from_b = b.net.take_sent();

        // c gets the answer before the question
        c.module
            .on_envelope(&b.id, sent_to(&from_b, "c")[0])
            .await
            .unwrap();
        assert!(c.log.lock().is_empty());
        c.module
            .on_envelope(&a.id, sent_to(&from_a, "c")[0])
            .await
            .unwrap();
        assert_eq!(
            payloads(&c.log),
            vec![b"question".to_vec(), b"answer".to_vec()]
        );
    }

    #[tokio::test]
    async fn test_fifo_delivers_in_send_order() {
        let a: Node<FifoOrder> = node("a", &["b"]);
        let b: Node<FifoOrder> = node("b", &["a"]);
        for n in 1..=4u8 {
            a.module.send(vec![n]).await.unwrap();
        }
        let sent = a.net.take_sent();
        let to_b = sent_to(&sent, "b");
        for index in [3, 1, 0, 2] {
            b.module.on_envelope(&a.id, to_b[index]).await.unwrap();
        }
        assert_eq!(payloads(&b.log), vec![vec![1], vec![2], vec![3], vec![4]]);
    }

    #[tokio::test]
    async fn test_forwarding_skips_sender_and_origin() {
        let a: Node<FifoOrder> = node("a", &["b"]);
        let b: Node<FifoOrder> = node("b", &["a", "c", "d"]);
        a.module.send(b"hello".to_vec()).await.unwrap();
        let sent = a.net.take_sent();

        b.module.on_envelope(&a.id, sent_to(&sent, "b")[0]).await.unwrap();
        let forwarded = b.net.take_sent();
        let mut targets: Vec<_> = forwarded.iter().map(|s| s.to.as_str().to_string()).collect();
        targets.sort();
        assert_eq!(targets, vec!["c".to_string(), "d".to_string()]);
    }

    #[tokio::test]
    async fn test_duplicates_are_not_delivered_or_forwarded() {
        let a: Node<CausalOrder> = node("a", &["b"]);
        let b: Node<CausalOrder> = node("b", &["a", "c"]);
        a.module.send(b"once".to_vec()).await.unwrap();
        let sent = a.net.take_sent();
        let envelope = sent_to(&sent, "b")[0];

        b.module.on_envelope(&a.id, envelope).await.unwrap();
        b.net.take_sent();
        b.module.on_envelope(&PeerId::new("c"), envelope).await.unwrap();

        assert_eq!(b.log.lock().len(), 1);
        assert!(b.net.sent().is_empty());
        assert_eq!(b.module.pending_len(), 0);
        assert_eq!(b.module.stats().duplicates, 1);
    }

    #[tokio::test]
    async fn test_echo_of_own_message_is_ignored() {
        let a: Node<FifoOrder> = node("a", &["b"]);
        a.module.send(b"mine".to_vec()).await.unwrap();
        let sent = a.net.take_sent();
        a.module
            .on_envelope(&PeerId::new("b"), sent_to(&sent, "b")[0])
            .await
            .unwrap();
        assert!(a.log.lock().is_empty());
        assert_eq!(a.module.stats().created, 1);
    }

    #[tokio::test]
    async fn test_send_without_neighbours_succeeds() {
        let lonely: Node<FifoOrder> = node("lonely", &[]);
        lonely.module.send(vec![1]).await.unwrap();
        assert!(lonely.net.sent().is_empty());
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_stop_delivery() {
        let a: Node<CausalOrder> = node("a", &["b"]);
        let b: Node<CausalOrder> = node("b", &["a"]);
        b.module.on_receive(|_, _| Err("broken".into()));

        a.module.send(vec![1]).await.unwrap();
        a.module.send(vec![2]).await.unwrap();
        for sent in a.net.take_sent() {
            b.module.on_envelope(&a.id, &sent.envelope).await.unwrap();
        }
        assert_eq!(payloads(&b.log), vec![vec![1], vec![2]]);
    }

    #[tokio::test]
    async fn test_off_stops_notifications() {
        let a: Node<FifoOrder> = node("a", &["b"]);
        let b: FifoBroadcast = Broadcast::new(
            module_context("broadcast", Arc::new(RecordingNetwork::new(PeerId::new("b")))),
            &BroadcastConfig::default(),
        );
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let id = b.on_receive(move |origin, payload| {
            sink.lock().push((origin, payload));
            Ok(())
        });
        assert!(b.off(id));

        a.module.send(vec![1]).await.unwrap();
        for sent in a.net.take_sent() {
            b.on_envelope(&a.id, &sent.envelope).await.unwrap();
        }
        assert!(log.lock().is_empty());
        assert_eq!(b.stats().delivered, 1);
    }

    #[tokio::test]
    async fn test_mismatched_origin_is_an_error() {
        let a: CausalBroadcast = Broadcast::new(
            module_context("broadcast", Arc::new(RecordingNetwork::new(PeerId::new("a")))),
            &BroadcastConfig::default(),
        );
        let b: Node<CausalOrder> = node("b", &[]);
        let (mut message, _) = a.create(vec![1]).unwrap();
        message.origin = PeerId::new("mallory");
        let envelope = a.encode(&BroadcastFrame::Data(message)).unwrap();
        assert!(b.module.on_envelope(&a.local, &envelope).await.is_err());
        assert!(b.log.lock().is_empty());
    }
}
