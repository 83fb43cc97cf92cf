use serde::{Deserialize, Serialize};

use super::Stamp;
use crate::types::PeerId;

/// Lamport-style counter owned by a single peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalarClock {
    id: PeerId,
    counter: u64,
}

impl ScalarClock {
    pub fn new(id: PeerId) -> Self {
        Self { id, counter: 0 }
    }

    /// Current reading without ticking
    pub fn time(&self) -> Stamp {
        Stamp::new(self.id.clone(), self.counter)
    }

    /// Tick the local counter and return the new reading
    pub fn increment(&mut self) -> Stamp {
        self.counter += 1;
        self.time()
    }

    /// True if `stamp` has already been seen (its counter is not ahead of ours)
    pub fn is_lower(&self, stamp: &Stamp) -> bool {
        stamp.counter <= self.counter
    }

    /// Monotone join with a remote reading
    pub fn update(&mut self, stamp: &Stamp) {
        self.counter = self.counter.max(stamp.counter);
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }
}
