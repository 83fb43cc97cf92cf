//! Event dispatch task
//!
//! One task per peer drains the base transport's event channel and drives the
//! peer view and the registered modules. Events are handled one at a time, so
//! module state only ever changes from this task. A periodic tick lets
//! modules retransmit and sweep.

use foglet_core::{
    Binding, EventReceiver, FogletError, Module, NetworkEvent, PeerId, SharedView,
};
use futures::future::join_all;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::registry::ModuleRegistry;

/// Drains network events into the peer view and the modules
pub struct DispatchTask {
    local: PeerId,
    events: EventReceiver,
    view: SharedView,
    registry: Arc<RwLock<ModuleRegistry>>,
    tick_interval: Duration,
    shutdown: oneshot::Receiver<()>,
}

impl DispatchTask {
    pub fn new(
        local: PeerId,
        events: EventReceiver,
        view: SharedView,
        registry: Arc<RwLock<ModuleRegistry>>,
        tick_interval: Duration,
        shutdown: oneshot::Receiver<()>,
    ) -> Self {
        Self {
            local,
            events,
            view,
            registry,
            tick_interval,
            shutdown,
        }
    }

    /// Run until shutdown is requested or the event channel closes
    pub async fn run(mut self) {
        info!("Dispatch task started for {}", self.local);
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut self.shutdown => {
                    debug!("Dispatch task for {}: shutdown requested", self.local);
                    break;
                }
                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        debug!("Dispatch task for {}: event channel closed", self.local);
                        break;
                    }
                },
                _ = ticker.tick() => self.tick().await,
            }
        }

        info!("Dispatch task stopped for {}", self.local);
    }

    async fn handle_event(&self, event: NetworkEvent) {
        match event {
            NetworkEvent::PeerUp { peer } => self.peer_up(peer).await,
            NetworkEvent::PeerDown { peer } => self.peer_down(peer).await,
            NetworkEvent::Receive { from, envelope } => {
                let Some(module) = self.registry.read().route(&envelope.protocol) else {
                    debug!(
                        "Dispatch task for {}: no module for protocol {} (from {})",
                        self.local, envelope.protocol, from
                    );
                    return;
                };
                if let Err(e) = module.on_envelope(&from, &envelope).await {
                    warn!(
                        "{}: failed to handle envelope from {}: {}",
                        module.name(),
                        from,
                        e
                    );
                }
            }
        }
    }

    async fn peer_up(&self, peer: PeerId) {
        let added = self.view.lock().add(peer.clone(), Binding::Physical);
        match added {
            Ok(_) => {}
            Err(FogletError::AlreadyConnected { .. }) => {
                debug!("Dispatch task for {}: {} already in view", self.local, peer);
            }
            Err(e) => warn!("Dispatch task for {}: cannot add {}: {}", self.local, peer, e),
        }

        for module in self.modules() {
            if let Err(e) = module.on_peer_up(&peer).await {
                warn!("{}: peer-up handling for {} failed: {}", module.name(), peer, e);
            }
        }
    }

    async fn peer_down(&self, peer: PeerId) {
        // Absent when the peer was already released through `disconnect`
        self.view.lock().evict(&peer);

        for module in self.modules() {
            if let Err(e) = module.on_peer_down(&peer).await {
                warn!("{}: peer-down handling for {} failed: {}", module.name(), peer, e);
            }
        }
    }

    async fn tick(&self) {
        let modules = self.modules();
        let results = join_all(modules.iter().map(|module| module.tick())).await;
        for (module, result) in modules.iter().zip(results) {
            if let Err(e) = result {
                warn!("{}: tick failed: {}", module.name(), e);
            }
        }
    }

    fn modules(&self) -> Vec<Arc<dyn Module>> {
        self.registry.read().modules()
    }
}
