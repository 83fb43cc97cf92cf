//! Messaging modules
//!
//! A module owns one protocol name on the active network layer. The runtime
//! routes every received [`Envelope`] whose `protocol` equals a module's name to
//! that module, and forwards neighbour arrivals, departures and periodic ticks
//! to every module.

pub mod broadcast;
pub mod unicast;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

use crate::errors::HandlerResult;
use crate::overlay::NetworkHandle;
use crate::transport::Envelope;
use crate::types::PeerId;
use crate::Result;

// ----------------------------------------------------------------------------
// Module Contract
// ----------------------------------------------------------------------------

/// Everything a module receives at construction
#[derive(Clone)]
pub struct ModuleContext {
    /// Registry name, also used as the envelope protocol
    pub name: String,
    /// Id of the peer owning the module
    pub local_id: PeerId,
    /// Resolves the active overlay layer on every use
    pub network: NetworkHandle,
    pub options: serde_json::Value,
}

/// A protocol handler attached to a peer
///
/// Callbacks run on the dispatch task, one event at a time. Errors returned
/// here are logged by the caller and never stop the dispatch loop.
#[async_trait]
pub trait Module: Send + Sync {
    fn name(&self) -> &str;

    /// Handle an envelope addressed to this module's protocol
    async fn on_envelope(&self, from: &PeerId, envelope: &Envelope) -> Result<()>;

    /// A direct neighbour became reachable
    async fn on_peer_up(&self, _peer: &PeerId) -> Result<()> {
        Ok(())
    }

    /// A direct neighbour went away
    async fn on_peer_down(&self, _peer: &PeerId) -> Result<()> {
        Ok(())
    }

    /// Periodic housekeeping (retransmission, sweeping)
    async fn tick(&self) -> Result<()> {
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Application Handlers
// ----------------------------------------------------------------------------

/// Application callback receiving `(peer, payload)`
pub type Handler = Arc<dyn Fn(PeerId, Vec<u8>) -> HandlerResult + Send + Sync>;

/// Registration token returned when a handler is attached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandlerId(u64);

/// Ordered set of handlers for one event
#[derive(Default)]
pub struct HandlerSet {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(HandlerId, Handler)>>,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, handler: Handler) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.lock().push((id, handler));
        id
    }

    pub fn remove(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|(held, _)| *held != id);
        handlers.len() != before
    }

    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.lock().is_empty()
    }

    /// Call every handler; returns how many completed without error
    ///
    /// The handler list is snapshotted first, so handlers may register or
    /// remove handlers, or send messages, without deadlocking.
    pub fn emit(&self, context: &str, from: &PeerId, payload: &[u8]) -> usize {
        let handlers: Vec<Handler> = self
            .handlers
            .lock()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        handlers
            .iter()
            .filter(|handler| invoke_handler(context, handler, from.clone(), payload.to_vec()))
            .count()
    }
}

/// Run one handler, containing its errors and panics
fn invoke_handler(context: &str, handler: &Handler, from: PeerId, payload: Vec<u8>) -> bool {
    let source = from.clone();
    match catch_unwind(AssertUnwindSafe(|| handler(from, payload))) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!("{}: handler failed on message from {}: {}", context, source, e);
            false
        }
        Err(_) => {
            warn!("{}: handler panicked on message from {}", context, source);
            false
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn handler<F>(f: F) -> Handler
    where
        F: Fn(PeerId, Vec<u8>) -> HandlerResult + Send + Sync + 'static,
    {
        Arc::new(f)
    }

    #[test]
    fn test_failing_handlers_do_not_block_others() {
        let set = HandlerSet::new();
        let calls = Arc::new(AtomicUsize::new(0));

        set.add(handler(|_, _| Err("boom".into())));
        set.add(handler(|_, _| panic!("handler bug")));
        let counter = calls.clone();
        set.add(handler(move |_, payload| {
            assert_eq!(payload, b"hi".to_vec());
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        assert_eq!(set.emit("test", &PeerId::new("a"), b"hi"), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_handler() {
        let set = HandlerSet::new();
        let id = set.add(handler(|_, _| Ok(())));
        let other = set.add(handler(|_, _| Ok(())));
        assert_ne!(id, other);

        assert!(set.remove(id));
        assert!(!set.remove(id));
        assert_eq!(set.len(), 1);
        assert_eq!(set.emit("test", &PeerId::new("a"), b""), 1);
    }
}
