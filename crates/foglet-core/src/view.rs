//! Peer view bookkeeping
//!
//! Every known peer carries an ordered list of bindings: the `physical` link
//! owned by the base transport, plus zero or more overlay layers that use the
//! peer. A peer entry exists exactly as long as it holds at least one binding.
//! Structural changes are published on a control channel, separate from the
//! data path that carries application messages.

use core::fmt;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::config::ChannelConfig;
use crate::types::PeerId;
use crate::{FogletError, Result};

// ----------------------------------------------------------------------------
// Bindings
// ----------------------------------------------------------------------------

/// Reason a peer is held in the view
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Binding {
    /// Direct link owned by the base transport
    Physical,
    /// Use of the peer by a named overlay layer
    Virtual(String),
}

impl Binding {
    pub fn layer<T: Into<String>>(name: T) -> Self {
        Binding::Virtual(name.into())
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Physical => f.write_str("physical"),
            Binding::Virtual(name) => f.write_str(name),
        }
    }
}

// ----------------------------------------------------------------------------
// View Events (control channel)
// ----------------------------------------------------------------------------

/// Structural notifications published by the peer view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEvent {
    /// A previously unknown peer entered the view
    AddPhysical { peer: PeerId },
    /// A known peer gained a further binding
    AddVirtual { peer: PeerId, binding: Binding },
    /// A peer lost its last binding and left the view
    RemovePhysical { peer: PeerId },
    /// A peer lost a binding but is still held by others
    RemoveVirtual { peer: PeerId, binding: Binding },
}

impl ViewEvent {
    /// True when the change requires the base transport to drop the link
    pub fn requires_disconnect(&self) -> bool {
        matches!(self, ViewEvent::RemovePhysical { .. })
    }
}

// ----------------------------------------------------------------------------
// Peer View
// ----------------------------------------------------------------------------

/// Per-peer binding lists with change notifications
#[derive(Debug)]
pub struct PeerView {
    entries: HashMap<PeerId, Vec<Binding>>,
    events: broadcast::Sender<ViewEvent>,
}

impl PeerView {
    pub fn new(config: &ChannelConfig) -> Self {
        let (events, _) = broadcast::channel(config.control_buffer_size);
        Self {
            entries: HashMap::new(),
            events,
        }
    }

    /// Subscribe to structural changes
    pub fn subscribe(&self) -> broadcast::Receiver<ViewEvent> {
        self.events.subscribe()
    }

    /// Add a binding to a peer, creating the entry when the peer is unknown
    pub fn add(&mut self, peer: PeerId, binding: Binding) -> Result<ViewEvent> {
        let event = match self.entries.get_mut(&peer) {
            None => {
                self.entries.insert(peer.clone(), vec![binding]);
                ViewEvent::AddPhysical { peer }
            }
            Some(_) if binding == Binding::Physical => {
                return Err(FogletError::AlreadyConnected {
                    peer_id: peer.to_string(),
                });
            }
            Some(bindings) => {
                bindings.push(binding.clone());
                ViewEvent::AddVirtual { peer, binding }
            }
        };
        debug!("Peer view: {:?}", event);
        self.publish(event.clone());
        Ok(event)
    }

    /// Remove one binding from a peer
    ///
    /// Returns [`ViewEvent::RemovePhysical`] when the peer's last binding went
    /// away; the owner must then disconnect the peer at the base transport.
    pub fn remove(&mut self, peer: &PeerId, binding: &Binding) -> Result<ViewEvent> {
        let bindings = self
            .entries
            .get_mut(peer)
            .ok_or_else(|| FogletError::not_found("peer", peer.as_str()))?;
        let position = bindings
            .iter()
            .position(|held| held == binding)
            .ok_or_else(|| FogletError::NotOwned {
                peer_id: peer.to_string(),
                binding: binding.to_string(),
            })?;
        bindings.remove(position);

        let event = if bindings.is_empty() {
            self.entries.remove(peer);
            ViewEvent::RemovePhysical { peer: peer.clone() }
        } else {
            ViewEvent::RemoveVirtual {
                peer: peer.clone(),
                binding: binding.clone(),
            }
        };
        debug!("Peer view: {:?}", event);
        self.publish(event.clone());
        Ok(event)
    }

    /// Drop a peer whose link is already gone, whatever its bindings
    pub fn evict(&mut self, peer: &PeerId) -> Option<Vec<Binding>> {
        let bindings = self.entries.remove(peer)?;
        debug!("Peer view: evicted {} with {} binding(s)", peer, bindings.len());
        self.publish(ViewEvent::RemovePhysical { peer: peer.clone() });
        Some(bindings)
    }

    /// Bindings held by `peer`, if it is known
    pub fn get(&self, peer: &PeerId) -> Option<&[Binding]> {
        self.entries.get(peer).map(Vec::as_slice)
    }

    /// All entries, ordered by peer id
    pub fn all(&self) -> Vec<(PeerId, Vec<Binding>)> {
        let mut all: Vec<_> = self
            .entries
            .iter()
            .map(|(peer, bindings)| (peer.clone(), bindings.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Entries whose binding list is exactly `[binding]`
    pub fn filtered(&self, binding: &Binding) -> Vec<(PeerId, Vec<Binding>)> {
        self.all()
            .into_iter()
            .filter(|(_, bindings)| bindings.len() == 1 && &bindings[0] == binding)
            .collect()
    }

    /// Hand a peer over to an overlay layer
    ///
    /// A peer held only by its physical link is re-bound to the layer; a peer
    /// with other bindings gains the layer as an extra binding. Either way the
    /// change is published as [`ViewEvent::AddVirtual`].
    pub fn bind_peer_to_network(&mut self, peer: &PeerId, layer: &str) -> Result<ViewEvent> {
        let bindings = self
            .entries
            .get_mut(peer)
            .ok_or_else(|| FogletError::not_found("peer", peer.as_str()))?;
        if bindings.as_slice() == [Binding::Physical] {
            bindings[0] = Binding::layer(layer);
        } else {
            bindings.push(Binding::layer(layer));
        }
        let event = ViewEvent::AddVirtual {
            peer: peer.clone(),
            binding: Binding::layer(layer),
        };
        debug!("Peer view: bound {} to {}", peer, layer);
        self.publish(event.clone());
        Ok(event)
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.entries.contains_key(peer)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all entries (teardown)
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn publish(&self, event: ViewEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
