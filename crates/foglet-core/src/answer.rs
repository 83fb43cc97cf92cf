//! Request/reply correlation
//!
//! An [`AnswerQueue`] stamps outgoing requests with a fresh answer id and
//! keeps the completion side until a correlated reply resolves or rejects it.
//! Resolving an unknown id is a no-op: late or duplicate answers are expected
//! in a gossiping overlay and never raise.

use core::fmt;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};
use hashbrown::HashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use crate::{FogletError, Result};

// ----------------------------------------------------------------------------
// Answer Identifiers
// ----------------------------------------------------------------------------

/// Unique id correlating a request with its reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnswerId(Uuid);

impl AnswerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AnswerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AnswerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message carrying the answer id it expects a reply for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamped<T> {
    pub answer_id: AnswerId,
    pub message: T,
}

/// Outcome of a request: `Ok` when resolved, `Err` when rejected
pub type Answer<P> = core::result::Result<P, P>;

// ----------------------------------------------------------------------------
// Pending Answer
// ----------------------------------------------------------------------------

/// Awaitable completion of a stamped request
///
/// Resolves to the answer, or to a channel error if the queue was cleared
/// before an answer arrived. There is no built-in timeout; wrap it in
/// `tokio::time::timeout` when one is needed.
#[derive(Debug)]
pub struct PendingAnswer<P> {
    answer_id: AnswerId,
    receiver: oneshot::Receiver<Answer<P>>,
}

impl<P> PendingAnswer<P> {
    pub fn answer_id(&self) -> AnswerId {
        self.answer_id
    }
}

impl<P> Future for PendingAnswer<P> {
    type Output = Result<Answer<P>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.receiver).poll(cx).map(|outcome| {
            outcome.map_err(|_| {
                FogletError::channel_error(format!(
                    "answer {} dropped without a reply",
                    this.answer_id
                ))
            })
        })
    }
}

// ----------------------------------------------------------------------------
// Answer Queue
// ----------------------------------------------------------------------------

/// Pending requests keyed by answer id
#[derive(Debug)]
pub struct AnswerQueue<P> {
    pending: Mutex<HashMap<AnswerId, oneshot::Sender<Answer<P>>>>,
}

impl<P> Default for AnswerQueue<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> AnswerQueue<P> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Stamp `message` with a fresh answer id and register its completion
    ///
    /// The caller transmits the stamped message and, once a correlated reply
    /// arrives, calls [`resolve`](Self::resolve) or [`reject`](Self::reject).
    pub fn stamp<T>(&self, message: T) -> (Stamped<T>, PendingAnswer<P>) {
        let answer_id = AnswerId::new();
        let (sender, receiver) = oneshot::channel();
        self.pending.lock().insert(answer_id, sender);
        (
            Stamped { answer_id, message },
            PendingAnswer {
                answer_id,
                receiver,
            },
        )
    }

    /// Complete a request successfully; returns false if the id is unknown
    pub fn resolve(&self, answer_id: &AnswerId, payload: P) -> bool {
        self.complete(answer_id, Ok(payload))
    }

    /// Complete a request with a failure; returns false if the id is unknown
    pub fn reject(&self, answer_id: &AnswerId, payload: P) -> bool {
        self.complete(answer_id, Err(payload))
    }

    pub fn is_pending(&self, answer_id: &AnswerId) -> bool {
        self.pending.lock().contains_key(answer_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Drop every pending request; their awaiters observe a channel error
    pub fn clear(&self) {
        self.pending.lock().clear();
    }

    fn complete(&self, answer_id: &AnswerId, answer: Answer<P>) -> bool {
        let Some(sender) = self.pending.lock().remove(answer_id) else {
            debug!("Answer queue: ignoring answer for unknown id {}", answer_id);
            return false;
        };
        // The awaiter may have given up already; the entry is gone either way
        let _ = sender.send(answer);
        true
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_completes_once() {
        let queue: AnswerQueue<String> = AnswerQueue::new();
        let (stamped, pending) = queue.stamp("ping");
        assert_eq!(stamped.message, "ping");
        assert_eq!(stamped.answer_id, pending.answer_id());
        assert!(queue.is_pending(&stamped.answer_id));

        assert!(queue.resolve(&stamped.answer_id, "pong".to_string()));
        assert!(!queue.resolve(&stamped.answer_id, "again".to_string()));
        assert!(!queue.reject(&stamped.answer_id, "late".to_string()));

        assert_eq!(pending.await.unwrap(), Ok("pong".to_string()));
        assert_eq!(queue.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_reject_delivers_error_payload() {
        let queue: AnswerQueue<u32> = AnswerQueue::new();
        let (stamped, pending) = queue.stamp(());
        assert!(queue.reject(&stamped.answer_id, 404));
        assert_eq!(pending.await.unwrap(), Err(404));
    }

    #[test]
    fn test_unknown_id_is_noop() {
        let queue: AnswerQueue<u32> = AnswerQueue::new();
        assert!(!queue.resolve(&AnswerId::new(), 1));
        assert!(!queue.reject(&AnswerId::new(), 1));
    }

    #[test]
    fn test_answer_ids_are_unique() {
        let queue: AnswerQueue<u32> = AnswerQueue::new();
        let (a, _pa) = queue.stamp(1);
        let (b, _pb) = queue.stamp(2);
        assert_ne!(a.answer_id, b.answer_id);
        assert_eq!(queue.pending_count(), 2);
    }

    #[tokio::test]
    async fn test_clear_fails_waiters() {
        let queue: AnswerQueue<u32> = AnswerQueue::new();
        let (_stamped, pending) = queue.stamp(());
        queue.clear();
        assert!(matches!(pending.await, Err(FogletError::Channel { .. })));
    }

    #[tokio::test]
    async fn test_resolve_after_waiter_dropped() {
        let queue: AnswerQueue<u32> = AnswerQueue::new();
        let (stamped, pending) = queue.stamp(());
        drop(pending);
        assert!(queue.resolve(&stamped.answer_id, 1));
        assert_eq!(queue.pending_count(), 0);
    }
}
