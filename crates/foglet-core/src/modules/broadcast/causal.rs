use super::DeliveryOrder;
use crate::clock::{Stamp, VersionVector};
use crate::types::PeerId;
use crate::{FogletError, Result};

/// Happens-before order tracked by a version vector
///
/// Each message carries its origin's vector right after the origin ticked
/// for it. A message is ready once it is the next one expected from its
/// origin and everything it had seen from other peers is delivered here.
#[derive(Debug)]
pub struct CausalOrder {
    vector: VersionVector,
}

impl CausalOrder {
    pub fn vector(&self) -> &VersionVector {
        &self.vector
    }
}

fn origin_stamp(origin: &PeerId, stamp: &VersionVector) -> Stamp {
    Stamp::new(origin.clone(), stamp.get(origin))
}

impl DeliveryOrder for CausalOrder {
    type Stamp = VersionVector;

    fn new(local: PeerId) -> Self {
        Self {
            vector: VersionVector::new(local),
        }
    }

    fn stamp(&mut self) -> VersionVector {
        self.vector.increment();
        self.vector.clone()
    }

    fn validate(&self, origin: &PeerId, stamp: &VersionVector) -> Result<()> {
        if stamp.local() != origin {
            return Err(FogletError::structure(format!(
                "vector owned by {} attached to a message from {}",
                stamp.local(),
                origin
            )));
        }
        Ok(())
    }

    fn is_stale(&self, origin: &PeerId, stamp: &VersionVector) -> bool {
        self.vector.is_lower(&origin_stamp(origin, stamp))
    }

    fn is_ready(&self, _origin: &PeerId, stamp: &VersionVector) -> bool {
        self.vector.is_ready(stamp)
    }

    fn deliver(&mut self, origin: &PeerId, stamp: &VersionVector) {
        self.vector.increment_from(&origin_stamp(origin, stamp));
    }
}
