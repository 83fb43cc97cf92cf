use std::sync::Arc;
use tracing::{info, warn};

use super::{OverlayBuilder, OverlayContext};
use crate::config::OverlayConfig;
use crate::transport::Network;
use crate::{FogletError, Result};

/// Fixed id of the base random-peer-sampling layer
pub const BASE_LAYER_ID: &str = "rps";

// ----------------------------------------------------------------------------
// Layer Record
// ----------------------------------------------------------------------------

#[derive(Clone)]
struct LayerOrigin {
    builder: Arc<dyn OverlayBuilder>,
    options: serde_json::Value,
}

/// One entry of the overlay chain
#[derive(Clone)]
pub struct LayerRecord {
    id: String,
    origin: Option<LayerOrigin>,
    instance: Arc<dyn Network>,
}

impl LayerRecord {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The live layer
    pub fn instance(&self) -> &Arc<dyn Network> {
        &self.instance
    }

    /// Options the layer was added with; `None` for the base layer
    pub fn options(&self) -> Option<&serde_json::Value> {
        self.origin.as_ref().map(|origin| &origin.options)
    }

    pub fn is_base(&self) -> bool {
        self.origin.is_none()
    }
}

// ----------------------------------------------------------------------------
// Overlay Manager
// ----------------------------------------------------------------------------

/// Ordered chain of overlay layers over the base RPS
///
/// Index 0 always holds the base layer with id [`BASE_LAYER_ID`] and is never
/// removed.
pub struct OverlayManager {
    layers: Vec<LayerRecord>,
    enabled: bool,
    next_id: u64,
}

impl OverlayManager {
    pub fn new(rps: Arc<dyn Network>, config: &OverlayConfig) -> Self {
        Self {
            layers: vec![LayerRecord {
                id: BASE_LAYER_ID.to_string(),
                origin: None,
                instance: rps,
            }],
            enabled: config.enabled,
            next_id: 1,
        }
    }

    /// Build a layer on top of the current last one and make it active
    pub fn add(
        &mut self,
        builder: Arc<dyn OverlayBuilder>,
        options: serde_json::Value,
    ) -> Result<String> {
        let id = format!("{}-{}", builder.name(), self.next_id);
        let previous = self.last().instance.clone();
        let instance = builder.build(OverlayContext {
            id: id.clone(),
            previous,
            options: options.clone(),
        })?;
        self.next_id += 1;

        info!("Overlay manager: added layer {} at depth {}", id, self.layers.len());
        self.layers.push(LayerRecord {
            id: id.clone(),
            origin: Some(LayerOrigin { builder, options }),
            instance,
        });
        Ok(id)
    }

    /// The layer messaging modules should use
    pub fn active(&self) -> Arc<dyn Network> {
        if self.enabled {
            self.last().instance.clone()
        } else {
            self.base()
        }
    }

    pub fn base(&self) -> Arc<dyn Network> {
        self.layers[0].instance.clone()
    }

    pub fn get(&self, id: &str) -> Option<&LayerRecord> {
        self.layers.iter().find(|layer| layer.id == id)
    }

    /// Layer ids from the base upwards
    pub fn ids(&self) -> Vec<String> {
        self.layers.iter().map(|layer| layer.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        // The base layer is always present
        false
    }

    pub fn overlays_enabled(&self) -> bool {
        self.enabled
    }

    /// Remove a layer
    ///
    /// Deleting the base layer or an unknown id is a logged no-op and returns
    /// `Ok(false)`. Removing an interior layer rebuilds only its immediate
    /// successor against the removed layer's predecessor; layers further up
    /// keep the instance they were built on.
    pub fn delete(&mut self, id: &str) -> Result<bool> {
        let Some(index) = self.layers.iter().position(|layer| layer.id == id) else {
            warn!("Overlay manager: cannot delete unknown layer {}", id);
            return Ok(false);
        };
        if index == 0 {
            warn!("Overlay manager: the base layer cannot be deleted");
            return Ok(false);
        }

        if index + 1 < self.layers.len() {
            let successor = &self.layers[index + 1];
            let origin = successor.origin.clone().ok_or_else(|| {
                FogletError::structure(format!("layer {} has no origin", successor.id))
            })?;
            let rebuilt = origin.builder.build(OverlayContext {
                id: successor.id.clone(),
                previous: self.layers[index - 1].instance.clone(),
                options: origin.options.clone(),
            })?;
            info!(
                "Overlay manager: rebuilt layer {} on top of {}",
                successor.id,
                self.layers[index - 1].id
            );
            self.layers[index + 1].instance = rebuilt;
        }

        self.layers.remove(index);
        info!("Overlay manager: deleted layer {}", id);
        Ok(true)
    }

    fn last(&self) -> &LayerRecord {
        // Never empty: index 0 is the base layer
        &self.layers[self.layers.len() - 1]
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
