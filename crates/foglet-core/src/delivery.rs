//! Per-neighbour delivery tracking for reliable broadcast
//!
//! Every (message, neighbour) pair handed to the network is tracked until the
//! neighbour acknowledges it. Unacknowledged pairs are retried with exponential
//! backoff and given up once the retry budget or the confirmation timeout is
//! exhausted.

use core::time::Duration;
use std::collections::BTreeMap;

use crate::config::DeliveryConfig;
use crate::transport::Envelope;
use crate::types::{MessageId, PeerId, TimeSource, Timestamp};

/// Tracking key: one message towards one neighbour
pub type DeliveryKey = (MessageId, PeerId);

// ----------------------------------------------------------------------------
// Delivery Status
// ----------------------------------------------------------------------------

/// Status of a message towards one neighbour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Tracked but not yet handed to the network
    Pending,
    /// Sent, awaiting acknowledgment
    Sent,
    /// Acknowledged by the neighbour
    Confirmed,
    /// Retry budget or timeout exhausted
    Failed,
}

// ----------------------------------------------------------------------------
// Delivery Attempt
// ----------------------------------------------------------------------------

/// Information about a single send
#[derive(Debug, Clone)]
pub struct DeliveryAttempt {
    /// Attempt number (1-based)
    pub attempt_number: u32,
    pub timestamp: Timestamp,
    /// Delay before this attempt may be followed by another
    pub next_retry_delay: Duration,
}

// ----------------------------------------------------------------------------
// Tracked Delivery
// ----------------------------------------------------------------------------

/// One message being delivered to one neighbour
#[derive(Debug, Clone)]
pub struct TrackedDelivery {
    pub message_id: MessageId,
    pub recipient: PeerId,
    pub status: DeliveryStatus,
    /// Frame re-sent on every retry
    pub envelope: Envelope,
    pub attempts: Vec<DeliveryAttempt>,
    pub created_at: Timestamp,
    pub max_retries: u32,
}

impl TrackedDelivery {
    fn new(
        message_id: MessageId,
        recipient: PeerId,
        envelope: Envelope,
        max_retries: u32,
        created_at: Timestamp,
    ) -> Self {
        Self {
            message_id,
            recipient,
            status: DeliveryStatus::Pending,
            envelope,
            attempts: Vec::new(),
            created_at,
            max_retries,
        }
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }

    /// Whether another send is allowed
    pub fn can_retry(&self) -> bool {
        self.attempt_count() < self.max_retries
            && matches!(self.status, DeliveryStatus::Pending | DeliveryStatus::Sent)
    }

    /// Backoff before the attempt following the current one
    pub fn next_retry_delay(&self, config: &DeliveryConfig) -> Duration {
        let base_delay = config.initial_retry_delay.as_millis() as f32;
        let exponent = self.attempt_count() as i32;
        let delay_ms = (base_delay * config.backoff_multiplier.powi(exponent)) as u64;
        Duration::from_millis(delay_ms).min(config.max_retry_delay)
    }

    /// Record a send; an acknowledgment that arrived first stays in effect
    fn mark_sent(&mut self, next_retry_delay: Duration, now: Timestamp) {
        self.attempts.push(DeliveryAttempt {
            attempt_number: self.attempt_count() + 1,
            timestamp: now,
            next_retry_delay,
        });
        if self.status == DeliveryStatus::Pending {
            self.status = DeliveryStatus::Sent;
        }
    }

    /// The backoff of the last attempt has elapsed
    fn backoff_elapsed(&self, now: Timestamp) -> bool {
        self.attempts
            .last()
            .map_or(false, |last| now.duration_since(last.timestamp) >= last.next_retry_delay)
    }

    pub fn is_ready_for_retry(&self, now: Timestamp) -> bool {
        self.status == DeliveryStatus::Sent && self.can_retry() && self.backoff_elapsed(now)
    }

    pub fn is_timed_out(&self, config: &DeliveryConfig, now: Timestamp) -> bool {
        now.duration_since(self.created_at) > config.confirmation_timeout
    }

    /// No further send will happen and the last one went unanswered
    fn is_exhausted(&self, now: Timestamp) -> bool {
        self.status == DeliveryStatus::Sent && !self.can_retry() && self.backoff_elapsed(now)
    }
}

// ----------------------------------------------------------------------------
// Delivery Tracker
// ----------------------------------------------------------------------------

/// Outcome of a [`DeliveryTracker::sweep`]
#[derive(Debug, Default)]
pub struct DeliverySweep {
    /// Acknowledged entries released from tracking
    pub confirmed: Vec<TrackedDelivery>,
    /// Entries given up on
    pub failed: Vec<TrackedDelivery>,
}

/// Tracks outstanding deliveries and schedules retries
pub struct DeliveryTracker<T: TimeSource> {
    config: DeliveryConfig,
    tracked: BTreeMap<DeliveryKey, TrackedDelivery>,
    time_source: T,
}

impl<T: TimeSource> DeliveryTracker<T> {
    pub fn new(config: DeliveryConfig, time_source: T) -> Self {
        Self {
            config,
            tracked: BTreeMap::new(),
            time_source,
        }
    }

    /// Start tracking; returns false if the pair is already tracked
    pub fn track(&mut self, message_id: MessageId, recipient: PeerId, envelope: Envelope) -> bool {
        let key = (message_id, recipient.clone());
        if self.tracked.contains_key(&key) {
            return false;
        }
        let tracked = TrackedDelivery::new(
            message_id,
            recipient,
            envelope,
            self.config.max_retries,
            self.time_source.now(),
        );
        self.tracked.insert(key, tracked);
        true
    }

    /// Record a send of a tracked pair
    pub fn mark_sent(&mut self, message_id: &MessageId, recipient: &PeerId) -> bool {
        let now = self.time_source.now();
        let Some(tracked) = self.tracked.get_mut(&(*message_id, recipient.clone())) else {
            return false;
        };
        let next_delay = tracked.next_retry_delay(&self.config);
        tracked.mark_sent(next_delay, now);
        true
    }

    /// Record an acknowledgment; false for pairs that are not tracked
    pub fn confirm(&mut self, message_id: &MessageId, recipient: &PeerId) -> bool {
        match self.tracked.get_mut(&(*message_id, recipient.clone())) {
            Some(tracked) => {
                tracked.status = DeliveryStatus::Confirmed;
                true
            }
            None => false,
        }
    }

    /// Stop tracking everything towards a neighbour that went away
    pub fn forget_peer(&mut self, recipient: &PeerId) -> usize {
        let before = self.tracked.len();
        self.tracked.retain(|(_, peer), _| peer != recipient);
        before - self.tracked.len()
    }

    pub fn get(&self, message_id: &MessageId, recipient: &PeerId) -> Option<&TrackedDelivery> {
        self.tracked.get(&(*message_id, recipient.clone()))
    }

    /// Pairs whose backoff elapsed and that still have retries left
    pub fn ready_for_retry(&self) -> Vec<(DeliveryKey, Envelope)> {
        let now = self.time_source.now();
        self.tracked
            .iter()
            .filter(|(_, tracked)| tracked.is_ready_for_retry(now))
            .map(|(key, tracked)| (key.clone(), tracked.envelope.clone()))
            .collect()
    }

    /// Release confirmed entries and give up on exhausted or timed out ones
    pub fn sweep(&mut self) -> DeliverySweep {
        let now = self.time_source.now();
        let mut sweep = DeliverySweep::default();
        let config = &self.config;
        self.tracked.retain(|_, tracked| {
            if tracked.status == DeliveryStatus::Confirmed {
                sweep.confirmed.push(tracked.clone());
                false
            } else if tracked.is_exhausted(now) || tracked.is_timed_out(config, now) {
                let mut failed = tracked.clone();
                failed.status = DeliveryStatus::Failed;
                sweep.failed.push(failed);
                false
            } else {
                true
            }
        });
        sweep
    }

    pub fn stats(&self) -> DeliveryStats {
        let mut stats = DeliveryStats::default();
        for tracked in self.tracked.values() {
            stats.total += 1;
            match tracked.status {
                DeliveryStatus::Pending => stats.pending += 1,
                DeliveryStatus::Sent => stats.sent += 1,
                DeliveryStatus::Confirmed => stats.confirmed += 1,
                DeliveryStatus::Failed => stats.failed += 1,
            }
            stats.total_attempts += tracked.attempt_count();
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }
}

// ----------------------------------------------------------------------------
// Delivery Statistics
// ----------------------------------------------------------------------------

/// Snapshot of the tracker's entries by status
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryStats {
    pub total: u32,
    pub pending: u32,
    pub sent: u32,
    pub confirmed: u32,
    pub failed: u32,
    pub total_attempts: u32,
}

impl DeliveryStats {
    /// Average sends per tracked pair
    pub fn average_attempts(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            self.total_attempts as f32 / self.total as f32
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
