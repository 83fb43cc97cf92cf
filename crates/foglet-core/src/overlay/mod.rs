//! Overlay composition
//!
//! Overlays are stacked on top of the base random-peer-sampling layer. Each
//! overlay is built from an [`OverlayBuilder`] with a handle on the layer below
//! it, to which it delegates whatever it does not implement itself. The
//! [`OverlayManager`] keeps the ordered chain and resolves the layer that
//! messaging modules should use.

mod layers;
mod manager;

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

use crate::transport::Network;
use crate::view::PeerView;
use crate::Result;

pub use layers::{CappedOverlay, CappedOverlayBuilder, PassthroughOverlay, PassthroughOverlayBuilder};
pub use manager::{LayerRecord, OverlayManager, BASE_LAYER_ID};

/// Peer view shared between the runtime and the overlays
pub type SharedView = Arc<Mutex<PeerView>>;

// ----------------------------------------------------------------------------
// Overlay Builder Contract
// ----------------------------------------------------------------------------

/// Everything an overlay receives when it is (re)built
#[derive(Clone)]
pub struct OverlayContext {
    /// Identifier assigned by the manager
    pub id: String,
    /// Layer directly below this one
    pub previous: Arc<dyn Network>,
    /// Free-form options given at `add` time
    pub options: serde_json::Value,
}

/// Constructor of an overlay layer
///
/// Builders are kept by the manager so a layer can be rebuilt against a new
/// predecessor when a layer below it is removed.
pub trait OverlayBuilder: Send + Sync {
    /// Name used as the prefix of layer ids
    fn name(&self) -> &str;

    /// Build a layer on top of `context.previous`
    fn build(&self, context: OverlayContext) -> Result<Arc<dyn Network>>;
}

// ----------------------------------------------------------------------------
// Network Handle
// ----------------------------------------------------------------------------

/// Cloneable handle through which modules resolve the active layer
///
/// The layer is resolved on every call, so modules follow overlay additions
/// and removals without being rebuilt.
#[derive(Clone)]
pub struct NetworkHandle {
    manager: Arc<RwLock<OverlayManager>>,
}

impl NetworkHandle {
    pub fn new(manager: Arc<RwLock<OverlayManager>>) -> Self {
        Self { manager }
    }

    /// The layer currently in effect
    pub fn active(&self) -> Arc<dyn Network> {
        self.manager.read().active()
    }

    /// The base RPS layer, regardless of configuration
    pub fn base(&self) -> Arc<dyn Network> {
        self.manager.read().base()
    }

    pub fn manager(&self) -> &Arc<RwLock<OverlayManager>> {
        &self.manager
    }
}
