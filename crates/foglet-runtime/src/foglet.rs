//! Foglet peer
//!
//! A [`Foglet`] is one peer of the overlay: it owns the overlay chain built on
//! its random-peer-sampling layer, the peer view, the registered messaging
//! modules (unicast is always present) and the dispatch task feeding them.
//!
//! ## Locking
//!
//! The overlay chain, the view and the registry sit behind `parking_lot`
//! locks. No guard is ever held across an `.await`: every method resolves
//! what it needs, drops the guard, and only then talks to the network.

use foglet_core::{
    Answer, Binding, CausalBroadcast, EventReceiver, FifoBroadcast, FogletConfig, FogletError,
    HandlerId, HandlerResult, Module, ModuleContext, Neighbours, Network, NetworkHandle,
    OverlayBuilder, OverlayManager, PeerId, PeerView, PendingAnswer, ReliableBroadcast, Result,
    SharedView, Unicast, ViewEvent, UNICAST_PROTOCOL,
};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::registry::ModuleRegistry;
use crate::tasks::DispatchTask;

// ----------------------------------------------------------------------------
// Foglet
// ----------------------------------------------------------------------------

/// A running peer
pub struct Foglet {
    id: PeerId,
    config: FogletConfig,
    view: SharedView,
    network: NetworkHandle,
    registry: Arc<RwLock<ModuleRegistry>>,
    unicast: Arc<Unicast>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl Foglet {
    /// Wire the peer together and spawn its dispatch task
    pub(crate) fn start(
        id: PeerId,
        config: FogletConfig,
        rps: Arc<dyn Network>,
        events: EventReceiver,
    ) -> Result<Self> {
        let view: SharedView = Arc::new(Mutex::new(PeerView::new(&config.channels)));
        let manager = OverlayManager::new(rps, &config.overlay);
        let network = NetworkHandle::new(Arc::new(RwLock::new(manager)));

        let unicast = Arc::new(Unicast::new(ModuleContext {
            name: UNICAST_PROTOCOL.to_string(),
            local_id: id.clone(),
            network: network.clone(),
            options: serde_json::Value::Null,
        }));
        let mut registry = ModuleRegistry::new();
        registry.register(unicast.clone())?;
        let registry = Arc::new(RwLock::new(registry));

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = DispatchTask::new(
            id.clone(),
            events,
            view.clone(),
            registry.clone(),
            config.dispatch.tick_interval,
            shutdown_rx,
        );
        let dispatch = tokio::spawn(task.run());

        info!("Foglet peer {} started", id);
        Ok(Self {
            id,
            config,
            view,
            network,
            registry,
            unicast,
            shutdown: Mutex::new(Some(shutdown_tx)),
            dispatch: Mutex::new(Some(dispatch)),
        })
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn config(&self) -> &FogletConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Links
    // ------------------------------------------------------------------------

    /// Ask the base layer for a link; it picks a peer when `peer` is `None`
    ///
    /// The peer enters the view once the base layer reports it up.
    pub async fn connect(&self, peer: Option<PeerId>) -> Result<()> {
        self.network.base().connect(peer).await
    }

    /// Release the physical binding of `peer`
    ///
    /// The base link is torn down only when no overlay still holds the peer.
    pub async fn disconnect(&self, peer: &PeerId) -> Result<()> {
        self.release(peer, &Binding::Physical).await.map(|_| ())
    }

    /// Drop one binding of `peer`
    ///
    /// Every binding removal goes through here: when the peer's last binding
    /// goes away, the base link is disconnected exactly once.
    pub async fn release(&self, peer: &PeerId, binding: &Binding) -> Result<ViewEvent> {
        let event = self.view.lock().remove(peer, binding)?;
        if event.requires_disconnect() {
            debug!("Foglet {}: releasing base link to {}", self.id, peer);
            self.network.base().disconnect(peer).await?;
        }
        Ok(event)
    }

    /// Neighbours of the active layer
    pub fn neighbours(&self, limit: Option<usize>) -> Neighbours {
        self.network.active().neighbours(limit)
    }

    /// The peer view; drop bindings through [`Foglet::release`] so the base
    /// link follows the view
    pub fn view(&self) -> &SharedView {
        &self.view
    }

    /// Subscribe to structural changes of the peer view
    pub fn subscribe_view(&self) -> broadcast::Receiver<ViewEvent> {
        self.view.lock().subscribe()
    }

    /// Hand a peer over to the overlay layer `layer`
    pub fn bind_peer_to_network(&self, peer: &PeerId, layer: &str) -> Result<ViewEvent> {
        if self.network.manager().read().get(layer).is_none() {
            return Err(FogletError::not_found("layer", layer));
        }
        self.view.lock().bind_peer_to_network(peer, layer)
    }

    // ------------------------------------------------------------------------
    // Unicast
    // ------------------------------------------------------------------------

    pub fn unicast(&self) -> &Arc<Unicast> {
        &self.unicast
    }

    /// Register a handler for unicast messages of `protocol`
    pub fn on_unicast<F>(&self, protocol: &str, handler: F) -> HandlerId
    where
        F: Fn(PeerId, Vec<u8>) -> HandlerResult + Send + Sync + 'static,
    {
        self.unicast.on(protocol, handler)
    }

    pub fn off_unicast(&self, protocol: &str, id: HandlerId) -> bool {
        self.unicast.off(protocol, id)
    }

    pub async fn send_unicast(
        &self,
        protocol: &str,
        peer: &PeerId,
        message: Vec<u8>,
    ) -> Result<()> {
        self.unicast.send(protocol, peer, message).await
    }

    /// Install the responder answering requests of `protocol`
    pub fn on_request<F>(&self, protocol: &str, responder: F)
    where
        F: Fn(PeerId, Vec<u8>) -> Answer<Vec<u8>> + Send + Sync + 'static,
    {
        self.unicast.on_request(protocol, responder)
    }

    /// Send a request; the returned future resolves with the peer's answer
    pub async fn request(
        &self,
        protocol: &str,
        peer: &PeerId,
        body: Vec<u8>,
    ) -> Result<PendingAnswer<Vec<u8>>> {
        self.unicast.request(protocol, peer, body).await
    }

    // ------------------------------------------------------------------------
    // Modules
    // ------------------------------------------------------------------------

    /// Construction context for a module named `name`
    pub fn module_context(&self, name: &str, options: serde_json::Value) -> ModuleContext {
        ModuleContext {
            name: name.to_string(),
            local_id: self.id.clone(),
            network: self.network.clone(),
            options,
        }
    }

    /// Build a module from its context and register it
    pub fn add_module<M, F>(
        &self,
        name: &str,
        options: serde_json::Value,
        build: F,
    ) -> Result<Arc<M>>
    where
        M: Module + 'static,
        F: FnOnce(ModuleContext) -> Result<M>,
    {
        if self.registry.read().contains(name) {
            return Err(FogletError::config_error(format!(
                "a module named {} is already registered",
                name
            )));
        }
        let module = Arc::new(build(self.module_context(name, options))?);
        if module.name() != name {
            return Err(FogletError::config_error(format!(
                "module built for {} reports the name {}",
                name,
                module.name()
            )));
        }
        self.registry.write().register(module.clone())?;
        Ok(module)
    }

    pub fn add_fifo_broadcast(&self, name: &str) -> Result<Arc<FifoBroadcast>> {
        let config = self.config.broadcast.clone();
        self.add_module(name, serde_json::Value::Null, |context| {
            Ok(FifoBroadcast::new(context, &config))
        })
    }

    pub fn add_causal_broadcast(&self, name: &str) -> Result<Arc<CausalBroadcast>> {
        let config = self.config.broadcast.clone();
        self.add_module(name, serde_json::Value::Null, |context| {
            Ok(CausalBroadcast::new(context, &config))
        })
    }

    pub fn add_reliable_broadcast(&self, name: &str) -> Result<Arc<ReliableBroadcast>> {
        let broadcast_config = self.config.broadcast.clone();
        let delivery_config = self.config.delivery.clone();
        self.add_module(name, serde_json::Value::Null, |context| {
            Ok(ReliableBroadcast::new(
                context,
                &broadcast_config,
                &delivery_config,
            ))
        })
    }

    /// The module registered under `name`, as its concrete type
    pub fn module<M: Module + 'static>(&self, name: &str) -> Option<Arc<M>> {
        self.registry.read().get(name)
    }

    /// Detach a module; the built-in unicast module cannot be removed
    pub fn remove_module(&self, name: &str) -> Result<bool> {
        if name == UNICAST_PROTOCOL {
            return Err(FogletError::config_error("the unicast module is built in"));
        }
        Ok(self.registry.write().remove(name))
    }

    pub fn module_names(&self) -> Vec<String> {
        self.registry.read().names()
    }

    // ------------------------------------------------------------------------
    // Overlays
    // ------------------------------------------------------------------------

    /// Stack a new overlay on top of the chain; returns its layer id
    pub fn add_overlay(
        &self,
        builder: Arc<dyn OverlayBuilder>,
        options: serde_json::Value,
    ) -> Result<String> {
        self.network.manager().write().add(builder, options)
    }

    /// Remove an overlay layer; false when `id` is unknown
    pub fn remove_overlay(&self, id: &str) -> Result<bool> {
        self.network.manager().write().delete(id)
    }

    /// Layer ids from the base upwards
    pub fn overlay_ids(&self) -> Vec<String> {
        self.network.manager().read().ids()
    }

    /// The layer messaging modules currently use
    pub fn active_network(&self) -> Arc<dyn Network> {
        self.network.active()
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Stop the dispatch task and wait for it to finish
    pub async fn shutdown(&self) {
        if let Some(shutdown) = self.shutdown.lock().take() {
            // The task may already be gone if its event channel closed
            let _ = shutdown.send(());
        }
        let handle = self.dispatch.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Foglet {}: dispatch task ended abnormally: {}", self.id, e);
            }
        }
        info!("Foglet peer {} shut down", self.id);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use foglet_core::overlay::{CappedOverlayBuilder, PassthroughOverlayBuilder};
    use foglet_core::testing::RecordingNetwork;
    use foglet_core::{create_event_channel, ChannelConfig, EventSender, NetworkEvent};
    use std::time::Duration;
    use tokio::time::timeout;

    use crate::FogletBuilder;

    async fn recording_peer(name: &str) -> (Foglet, Arc<RecordingNetwork>, EventSender) {
        let rps = Arc::new(RecordingNetwork::new(PeerId::new(name)));
        let (tx, rx) = create_event_channel(&ChannelConfig::default());
        let foglet = FogletBuilder::new(PeerId::new(name))
            .with_config(FogletConfig::testing())
            .rps(rps.clone(), rx)
            .build_and_start()
            .await
            .unwrap();
        (foglet, rps, tx)
    }

    async fn next_view_event(events: &mut broadcast::Receiver<ViewEvent>) -> ViewEvent {
        timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("timed out waiting for view event")
            .expect("view channel closed")
    }

    #[tokio::test]
    async fn test_disconnect_releases_base_link_once() {
        let (foglet, rps, tx) = recording_peer("a").await;
        let peer = PeerId::new("b");
        let mut view_events = foglet.subscribe_view();

        rps.add_neighbour(peer.clone());
        tx.send(NetworkEvent::PeerUp { peer: peer.clone() })
            .await
            .unwrap();
        assert_eq!(
            next_view_event(&mut view_events).await,
            ViewEvent::AddPhysical { peer: peer.clone() }
        );

        foglet.disconnect(&peer).await.unwrap();
        assert_eq!(rps.disconnect_calls(), 1);
        assert!(matches!(
            foglet.disconnect(&peer).await,
            Err(FogletError::NotFound { .. })
        ));
        assert_eq!(rps.disconnect_calls(), 1);
        foglet.shutdown().await;
    }

    #[tokio::test]
    async fn test_disconnect_keeps_link_held_by_overlay() {
        let (foglet, rps, tx) = recording_peer("a").await;
        let peer = PeerId::new("b");
        let mut view_events = foglet.subscribe_view();
        let layer = foglet
            .add_overlay(Arc::new(PassthroughOverlayBuilder), serde_json::Value::Null)
            .unwrap();

        tx.send(NetworkEvent::PeerUp { peer: peer.clone() })
            .await
            .unwrap();
        next_view_event(&mut view_events).await;
        foglet
            .view()
            .lock()
            .add(peer.clone(), Binding::layer(layer.clone()))
            .unwrap();

        foglet.disconnect(&peer).await.unwrap();
        assert_eq!(rps.disconnect_calls(), 0);
        assert_eq!(
            foglet.view().lock().get(&peer),
            Some(&[Binding::layer(layer)][..])
        );
        foglet.shutdown().await;
    }

    #[tokio::test]
    async fn test_release_layer_binding_disconnects_base_link() {
        let (foglet, rps, tx) = recording_peer("a").await;
        let peer = PeerId::new("b");
        let mut view_events = foglet.subscribe_view();
        let layer = foglet
            .add_overlay(Arc::new(PassthroughOverlayBuilder), serde_json::Value::Null)
            .unwrap();

        rps.add_neighbour(peer.clone());
        tx.send(NetworkEvent::PeerUp { peer: peer.clone() })
            .await
            .unwrap();
        next_view_event(&mut view_events).await;
        foglet.bind_peer_to_network(&peer, &layer).unwrap();

        assert!(matches!(
            foglet.disconnect(&peer).await,
            Err(FogletError::NotOwned { .. })
        ));
        assert_eq!(rps.disconnect_calls(), 0);

        let event = foglet
            .release(&peer, &Binding::layer(layer.clone()))
            .await
            .unwrap();
        assert_eq!(event, ViewEvent::RemovePhysical { peer: peer.clone() });
        assert!(!foglet.view().lock().contains(&peer));
        assert_eq!(rps.disconnect_calls(), 1);

        assert!(matches!(
            foglet.release(&peer, &Binding::layer(layer)).await,
            Err(FogletError::NotFound { .. })
        ));
        assert_eq!(rps.disconnect_calls(), 1);
        foglet.shutdown().await;
    }

    #[tokio::test]
    async fn test_peer_down_evicts_from_view() {
        let (foglet, _rps, tx) = recording_peer("a").await;
        let peer = PeerId::new("b");
        let mut view_events = foglet.subscribe_view();

        tx.send(NetworkEvent::PeerUp { peer: peer.clone() })
            .await
            .unwrap();
        next_view_event(&mut view_events).await;
        tx.send(NetworkEvent::PeerDown { peer: peer.clone() })
            .await
            .unwrap();
        assert_eq!(
            next_view_event(&mut view_events).await,
            ViewEvent::RemovePhysical { peer: peer.clone() }
        );
        assert!(!foglet.view().lock().contains(&peer));
        foglet.shutdown().await;
    }

    #[tokio::test]
    async fn test_overlay_management() {
        let (foglet, rps, _tx) = recording_peer("a").await;
        for name in ["b", "c", "d"] {
            rps.add_neighbour(PeerId::new(name));
        }
        assert_eq!(foglet.neighbours(None).len(), 3);

        let capped = foglet
            .add_overlay(
                Arc::new(CappedOverlayBuilder),
                serde_json::json!({ "max_neighbours": 2 }),
            )
            .unwrap();
        assert_eq!(foglet.overlay_ids(), vec!["rps".to_string(), capped.clone()]);
        assert_eq!(foglet.neighbours(None).len(), 2);

        assert!(foglet.remove_overlay(&capped).unwrap());
        assert!(!foglet.remove_overlay(&capped).unwrap());
        assert_eq!(foglet.neighbours(None).len(), 3);
        foglet.shutdown().await;
    }

    #[tokio::test]
    async fn test_bind_peer_to_unknown_layer() {
        let (foglet, _rps, tx) = recording_peer("a").await;
        let peer = PeerId::new("b");
        let mut view_events = foglet.subscribe_view();
        tx.send(NetworkEvent::PeerUp { peer: peer.clone() })
            .await
            .unwrap();
        next_view_event(&mut view_events).await;

        assert!(matches!(
            foglet.bind_peer_to_network(&peer, "tree-9"),
            Err(FogletError::NotFound { .. })
        ));
        let layer = foglet
            .add_overlay(Arc::new(PassthroughOverlayBuilder), serde_json::Value::Null)
            .unwrap();
        foglet.bind_peer_to_network(&peer, &layer).unwrap();
        assert_eq!(
            foglet.view().lock().get(&peer),
            Some(&[Binding::layer(layer)][..])
        );
        foglet.shutdown().await;
    }

    #[tokio::test]
    async fn test_module_management() {
        let (foglet, _rps, _tx) = recording_peer("a").await;
        let chat = foglet.add_causal_broadcast("chat").unwrap();
        assert!(foglet.add_fifo_broadcast("chat").is_err());

        let found: Arc<CausalBroadcast> = foglet.module("chat").unwrap();
        assert!(Arc::ptr_eq(&found, &chat));
        assert!(foglet.module::<FifoBroadcast>("chat").is_none());

        assert!(foglet.remove_module(UNICAST_PROTOCOL).is_err());
        assert!(foglet.remove_module("chat").unwrap());
        assert_eq!(foglet.module_names(), vec![UNICAST_PROTOCOL.to_string()]);
        foglet.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let (foglet, _rps, tx) = recording_peer("a").await;
        foglet.shutdown().await;
        foglet.shutdown().await;
        assert!(tx.is_closed());
    }
}
