use core::cmp::Ordering;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::Stamp;
use crate::types::PeerId;
use crate::{FogletError, Result};

// ----------------------------------------------------------------------------
// Vector Time
// ----------------------------------------------------------------------------

/// Mapping from peer id to counter; absent entries read as zero
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorTime(BTreeMap<PeerId, u64>);

impl VectorTime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(peer, counter)` pairs; a peer listed twice is malformed
    pub fn from_entries<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (PeerId, u64)>,
    {
        let mut map = BTreeMap::new();
        for (peer, counter) in entries {
            if map.insert(peer.clone(), counter).is_some() {
                return Err(FogletError::structure(format!(
                    "duplicate entry for peer {peer}"
                )));
            }
        }
        Ok(Self(map))
    }

    /// Counter recorded for `peer`, if any
    pub fn entry(&self, peer: &PeerId) -> Option<u64> {
        self.0.get(peer).copied()
    }

    /// Counter recorded for `peer`, zero if absent
    pub fn get(&self, peer: &PeerId) -> u64 {
        self.entry(peer).unwrap_or(0)
    }

    pub fn set(&mut self, peer: PeerId, counter: u64) {
        self.0.insert(peer, counter);
    }

    pub fn entries(&self) -> impl Iterator<Item = (&PeerId, u64)> {
        self.0.iter().map(|(peer, counter)| (peer, *counter))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entrywise maximum of both operands
    pub fn merge(&self, other: &VectorTime) -> VectorTime {
        let mut merged = self.0.clone();
        for (peer, counter) in other.entries() {
            let slot = merged.entry(peer.clone()).or_insert(0);
            *slot = (*slot).max(counter);
        }
        VectorTime(merged)
    }

    /// Structural equality (same entries, same counters)
    pub fn equals(&self, other: &VectorTime) -> bool {
        self == other
    }

    /// Happens-before comparison; `None` when the two are concurrent
    pub fn causal_cmp(&self, other: &VectorTime) -> Option<Ordering> {
        let mut less = false;
        let mut greater = false;
        for peer in self.0.keys().chain(other.0.keys()) {
            match self.get(peer).cmp(&other.get(peer)) {
                Ordering::Less => less = true,
                Ordering::Greater => greater = true,
                Ordering::Equal => {}
            }
        }
        match (less, greater) {
            (false, false) => Some(Ordering::Equal),
            (true, false) => Some(Ordering::Less),
            (false, true) => Some(Ordering::Greater),
            (true, true) => None,
        }
    }
}

impl TryFrom<&serde_json::Value> for VectorTime {
    type Error = FogletError;

    fn try_from(value: &serde_json::Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| FogletError::structure("vector time must be a JSON object"))?;
        let entries = object
            .iter()
            .map(|(peer, counter)| {
                counter
                    .as_u64()
                    .map(|counter| (PeerId::new(peer.as_str()), counter))
                    .ok_or_else(|| {
                        FogletError::structure(format!(
                            "counter for peer {peer} is not a non-negative integer"
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_entries(entries)
    }
}

// ----------------------------------------------------------------------------
// Version Vector
// ----------------------------------------------------------------------------

/// Vector clock owned by a peer, with the causal-readiness test used for delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionVector {
    local: PeerId,
    time: VectorTime,
}

impl VersionVector {
    pub fn new(local: PeerId) -> Self {
        let mut time = VectorTime::new();
        time.set(local.clone(), 0);
        Self { local, time }
    }

    /// Rebuild a vector owned by `local` from an existing time
    pub fn from_time(local: PeerId, mut time: VectorTime) -> Self {
        if time.entry(&local).is_none() {
            time.set(local.clone(), 0);
        }
        Self { local, time }
    }

    pub fn local(&self) -> &PeerId {
        &self.local
    }

    pub fn time(&self) -> &VectorTime {
        &self.time
    }

    pub fn get(&self, peer: &PeerId) -> u64 {
        self.time.get(peer)
    }

    /// Tick the owner's entry
    pub fn increment(&mut self) -> Stamp {
        let next = self.time.get(&self.local) + 1;
        self.time.set(self.local.clone(), next);
        Stamp::new(self.local.clone(), next)
    }

    /// Record `stamp` as the latest delivered message of its peer
    ///
    /// This is an assignment, not a max-merge: callers only invoke it after the
    /// stamp passed a readiness check, so no gap can be skipped silently.
    pub fn increment_from(&mut self, stamp: &Stamp) {
        self.time.set(stamp.id.clone(), stamp.counter);
    }

    /// True if the stamp's peer is known here and already at or past its counter
    pub fn is_lower(&self, stamp: &Stamp) -> bool {
        self.time
            .entry(&stamp.id)
            .map_or(false, |counter| counter >= stamp.counter)
    }

    /// Causal readiness of a message stamped with `other`
    ///
    /// The emitter's counter must be exactly the next one expected from it, and
    /// every other entry of `other` must already be covered locally.
    pub fn is_ready(&self, other: &VersionVector) -> bool {
        let origin = other.local();
        if other.get(origin) != self.get(origin) + 1 {
            return false;
        }
        other
            .time
            .entries()
            .filter(|(peer, _)| *peer != origin)
            .all(|(peer, counter)| counter <= self.get(peer))
    }

    /// Entrywise maximum; the result keeps this vector's owner
    pub fn merge(&self, other: &VersionVector) -> VersionVector {
        VersionVector {
            local: self.local.clone(),
            time: self.time.merge(&other.time),
        }
    }

    /// Structural comparison of the recorded counters
    pub fn equals(&self, other: &VersionVector) -> bool {
        self.time.equals(&other.time)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
