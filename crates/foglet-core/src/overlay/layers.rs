//! Overlay layers shipped with the crate

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use super::{OverlayBuilder, OverlayContext};
use crate::transport::{Envelope, Neighbours, Network};
use crate::types::PeerId;
use crate::{FogletError, Result};

// ----------------------------------------------------------------------------
// Passthrough Overlay
// ----------------------------------------------------------------------------

/// Layer that delegates every capability to the layer below
pub struct PassthroughOverlay {
    id: String,
    previous: Arc<dyn Network>,
}

impl PassthroughOverlay {
    pub fn new(id: String, previous: Arc<dyn Network>) -> Self {
        Self { id, previous }
    }
}

#[async_trait]
impl Network for PassthroughOverlay {
    fn name(&self) -> &str {
        &self.id
    }

    async fn connect(&self, peer: Option<PeerId>) -> Result<()> {
        self.previous.connect(peer).await
    }

    async fn disconnect(&self, peer: &PeerId) -> Result<()> {
        self.previous.disconnect(peer).await
    }

    async fn send(&self, peer: &PeerId, envelope: Envelope) -> Result<()> {
        self.previous.send(peer, envelope).await
    }

    fn neighbours(&self, limit: Option<usize>) -> Neighbours {
        self.previous.neighbours(limit)
    }
}

#[derive(Debug, Default)]
pub struct PassthroughOverlayBuilder;

impl OverlayBuilder for PassthroughOverlayBuilder {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn build(&self, context: OverlayContext) -> Result<Arc<dyn Network>> {
        Ok(Arc::new(PassthroughOverlay::new(context.id, context.previous)))
    }
}

// ----------------------------------------------------------------------------
// Capped Overlay
// ----------------------------------------------------------------------------

/// Layer exposing a bounded, stable subset of the neighbours below it
///
/// The subset is the `max_neighbours` smallest peer ids, so every peer
/// computing it over the same view agrees on it. Link management and sends
/// are delegated unchanged.
pub struct CappedOverlay {
    id: String,
    previous: Arc<dyn Network>,
    max_neighbours: usize,
}

impl CappedOverlay {
    pub fn new(id: String, previous: Arc<dyn Network>, max_neighbours: usize) -> Self {
        Self {
            id,
            previous,
            max_neighbours,
        }
    }
}

#[async_trait]
impl Network for CappedOverlay {
    fn name(&self) -> &str {
        &self.id
    }

    async fn connect(&self, peer: Option<PeerId>) -> Result<()> {
        self.previous.connect(peer).await
    }

    async fn disconnect(&self, peer: &PeerId) -> Result<()> {
        self.previous.disconnect(peer).await
    }

    async fn send(&self, peer: &PeerId, envelope: Envelope) -> Result<()> {
        self.previous.send(peer, envelope).await
    }

    fn neighbours(&self, limit: Option<usize>) -> Neighbours {
        let mut neighbours = self.previous.neighbours(None);
        neighbours.sort();
        let cap = limit.map_or(self.max_neighbours, |limit| limit.min(self.max_neighbours));
        neighbours.truncate(cap);
        neighbours
    }
}

#[derive(Debug, Deserialize)]
struct CappedOptions {
    max_neighbours: usize,
}

/// Builds a [`CappedOverlay`] from `{"max_neighbours": n}`
#[derive(Debug, Default)]
pub struct CappedOverlayBuilder;

impl OverlayBuilder for CappedOverlayBuilder {
    fn name(&self) -> &str {
        "capped"
    }

    fn build(&self, context: OverlayContext) -> Result<Arc<dyn Network>> {
        let options: CappedOptions = serde_json::from_value(context.options.clone())
            .map_err(|e| FogletError::config_error(format!("capped overlay options: {e}")))?;
        Ok(Arc::new(CappedOverlay::new(
            context.id,
            context.previous,
            options.max_neighbours,
        )))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingNetwork;

    fn context(previous: Arc<dyn Network>, options: serde_json::Value) -> OverlayContext {
        OverlayContext {
            id: "capped-1".into(),
            previous,
            options,
        }
    }

    #[test]
    fn test_capped_overlay_bounds_neighbours() {
        let rps = Arc::new(RecordingNetwork::new(PeerId::new("me")));
        for id in ["d", "b", "a", "c"] {
            rps.add_neighbour(PeerId::new(id));
        }
        let layer = CappedOverlayBuilder
            .build(context(rps, serde_json::json!({"max_neighbours": 2})))
            .unwrap();

        let neighbours = layer.neighbours(None);
        assert_eq!(neighbours.as_slice(), &[PeerId::new("a"), PeerId::new("b")]);
        assert_eq!(layer.neighbours(Some(1)).len(), 1);
    }

    #[test]
    fn test_capped_overlay_requires_options() {
        let rps = Arc::new(RecordingNetwork::new(PeerId::new("me")));
        let result = CappedOverlayBuilder.build(context(rps, serde_json::Value::Null));
        assert!(matches!(result, Err(FogletError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_passthrough_delegates_send() {
        let rps = Arc::new(RecordingNetwork::new(PeerId::new("me")));
        rps.add_neighbour(PeerId::new("x"));
        let layer = PassthroughOverlayBuilder
            .build(context(rps.clone(), serde_json::Value::Null))
            .unwrap();

        layer
            .send(&PeerId::new("x"), Envelope::new("p", vec![1]))
            .await
            .unwrap();
        assert_eq!(rps.sent().len(), 1);
        assert!(layer
            .send(&PeerId::new("y"), Envelope::new("p", vec![]))
            .await
            .is_err());
    }
}
