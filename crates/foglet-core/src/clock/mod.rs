//! Logical clocks
//!
//! Scalar clocks stamp per-origin sequence numbers for FIFO broadcast. Vector
//! time and version vectors capture causal position for causal and reliable
//! broadcast. Every clock here is a join-semilattice: merging takes the
//! entrywise maximum.

mod scalar;
mod vector;

use serde::{Deserialize, Serialize};

use crate::types::PeerId;

pub use scalar::ScalarClock;
pub use vector::{VectorTime, VersionVector};

/// A single clock reading: the counter of one peer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stamp {
    pub id: PeerId,
    pub counter: u64,
}

impl Stamp {
    pub fn new(id: PeerId, counter: u64) -> Self {
        Self { id, counter }
    }
}
