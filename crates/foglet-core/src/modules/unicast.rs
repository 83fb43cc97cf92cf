//! Point-to-point messaging
//!
//! Every unicast frame travels inside an envelope carrying the module name;
//! the frame itself carries the application protocol. Handlers only see frames
//! for the protocol they registered for.

use async_trait::async_trait;
use hashbrown::HashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

use super::{Handler, HandlerId, HandlerSet, Module, ModuleContext};
use crate::answer::{Answer, AnswerId, AnswerQueue, PendingAnswer};
use crate::errors::HandlerResult;
use crate::overlay::NetworkHandle;
use crate::transport::Envelope;
use crate::types::PeerId;
use crate::Result;

/// Default registry name of the built-in unicast module
pub const UNICAST_PROTOCOL: &str = "unicast";

/// Callback answering a request: `Ok` resolves at the requester, `Err` rejects
pub type Responder = Arc<dyn Fn(PeerId, Vec<u8>) -> Answer<Vec<u8>> + Send + Sync>;

// ----------------------------------------------------------------------------
// Wire Frames
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnicastFrame {
    /// Fire-and-forget message
    Message { protocol: String, body: Vec<u8> },
    /// Message expecting an [`UnicastFrame::Answer`]
    Request {
        protocol: String,
        answer_id: AnswerId,
        body: Vec<u8>,
    },
    Answer {
        answer_id: AnswerId,
        outcome: Answer<Vec<u8>>,
    },
}

// ----------------------------------------------------------------------------
// Unicast Module
// ----------------------------------------------------------------------------

pub struct Unicast {
    name: String,
    network: NetworkHandle,
    handlers: Mutex<HashMap<String, Arc<HandlerSet>>>,
    responders: Mutex<HashMap<String, Responder>>,
    answers: AnswerQueue<Vec<u8>>,
}

impl Unicast {
    pub fn new(context: ModuleContext) -> Self {
        Self {
            name: context.name,
            network: context.network,
            handlers: Mutex::new(HashMap::new()),
            responders: Mutex::new(HashMap::new()),
            answers: AnswerQueue::new(),
        }
    }

    /// Register a handler for messages of `protocol`
    pub fn on<F>(&self, protocol: &str, handler: F) -> HandlerId
    where
        F: Fn(PeerId, Vec<u8>) -> HandlerResult + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        self.handlers
            .lock()
            .entry(protocol.to_string())
            .or_default()
            .add(handler)
    }

    /// Unregister a handler; false if it was not registered for `protocol`
    pub fn off(&self, protocol: &str, id: HandlerId) -> bool {
        let mut handlers = self.handlers.lock();
        let Some(set) = handlers.get(protocol) else {
            return false;
        };
        let removed = set.remove(id);
        if set.is_empty() {
            handlers.remove(protocol);
        }
        removed
    }

    /// Install the responder for requests of `protocol`, replacing any previous one
    pub fn on_request<F>(&self, protocol: &str, responder: F)
    where
        F: Fn(PeerId, Vec<u8>) -> Answer<Vec<u8>> + Send + Sync + 'static,
    {
        self.responders
            .lock()
            .insert(protocol.to_string(), Arc::new(responder));
    }

    /// Send a message to a direct neighbour of the active layer
    pub async fn send(&self, protocol: &str, peer: &PeerId, message: Vec<u8>) -> Result<()> {
        let frame = UnicastFrame::Message {
            protocol: protocol.to_string(),
            body: message,
        };
        self.transmit(peer, &frame).await
    }

    /// Send a request and return its pending answer
    ///
    /// The answer waits indefinitely; callers impose their own timeout and
    /// call [`abandon`](Self::abandon) when it fires.
    pub async fn request(
        &self,
        protocol: &str,
        peer: &PeerId,
        body: Vec<u8>,
    ) -> Result<PendingAnswer<Vec<u8>>> {
        let (stamped, pending) = self.answers.stamp(body);
        let frame = UnicastFrame::Request {
            protocol: protocol.to_string(),
            answer_id: stamped.answer_id,
            body: stamped.message,
        };
        if let Err(e) = self.transmit(peer, &frame).await {
            self.answers.reject(&stamped.answer_id, Vec::new());
            return Err(e);
        }
        Ok(pending)
    }

    /// Give up on a request; its awaiter is rejected with an empty payload
    pub fn abandon(&self, answer_id: &AnswerId) -> bool {
        self.answers.reject(answer_id, Vec::new())
    }

    pub fn pending_requests(&self) -> usize {
        self.answers.pending_count()
    }

    async fn transmit(&self, peer: &PeerId, frame: &UnicastFrame) -> Result<()> {
        let envelope = Envelope::encode(self.name.as_str(), frame)?;
        self.network.active().send(peer, envelope).await
    }

    fn respond(&self, protocol: &str, from: &PeerId, body: Vec<u8>) -> Answer<Vec<u8>> {
        let responder = self.responders.lock().get(protocol).cloned();
        let Some(responder) = responder else {
            debug!("{}: no responder for protocol {}", self.name, protocol);
            return Err(format!("no responder for protocol {protocol}").into_bytes());
        };
        let source = from.clone();
        catch_unwind(AssertUnwindSafe(|| responder(source, body))).unwrap_or_else(|_| {
            warn!("{}: responder for {} panicked on request from {}", self.name, protocol, from);
            Err(b"responder failed".to_vec())
        })
    }
}

#[async_trait]
impl Module for Unicast {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_envelope(&self, from: &PeerId, envelope: &Envelope) -> Result<()> {
        match envelope.decode::<UnicastFrame>()? {
            UnicastFrame::Message { protocol, body } => {
                let set = self.handlers.lock().get(&protocol).cloned();
                match set {
                    Some(set) => {
                        set.emit(&self.name, from, &body);
                    }
                    None => debug!("{}: no handler for protocol {}", self.name, protocol),
                }
                Ok(())
            }
            UnicastFrame::Request {
                protocol,
                answer_id,
                body,
            } => {
                let outcome = self.respond(&protocol, from, body);
                self.transmit(from, &UnicastFrame::Answer { answer_id, outcome })
                    .await
            }
            UnicastFrame::Answer { answer_id, outcome } => {
                match outcome {
                    Ok(payload) => self.answers.resolve(&answer_id, payload),
                    Err(payload) => self.answers.reject(&answer_id, payload),
                };
                Ok(())
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
