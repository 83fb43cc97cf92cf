use hashbrown::HashMap;

use super::DeliveryOrder;
use crate::clock::{ScalarClock, Stamp};
use crate::types::PeerId;
use crate::{FogletError, Result};

/// Per-origin sequence numbers
///
/// The local scalar clock numbers outgoing messages; one scalar clock per
/// remote origin records the last sequence number delivered from it.
#[derive(Debug)]
pub struct FifoOrder {
    local: ScalarClock,
    origins: HashMap<PeerId, ScalarClock>,
}

impl FifoOrder {
    /// Last sequence number delivered from `origin`
    pub fn delivered_from(&self, origin: &PeerId) -> u64 {
        if origin == self.local.id() {
            return self.local.counter();
        }
        self.origins.get(origin).map_or(0, ScalarClock::counter)
    }
}

impl DeliveryOrder for FifoOrder {
    type Stamp = Stamp;

    fn new(local: PeerId) -> Self {
        Self {
            local: ScalarClock::new(local),
            origins: HashMap::new(),
        }
    }

    fn stamp(&mut self) -> Stamp {
        self.local.increment()
    }

    fn validate(&self, origin: &PeerId, stamp: &Stamp) -> Result<()> {
        if &stamp.id != origin {
            return Err(FogletError::structure(format!(
                "stamp of {} attached to a message from {}",
                stamp.id, origin
            )));
        }
        Ok(())
    }

    fn is_stale(&self, origin: &PeerId, stamp: &Stamp) -> bool {
        if origin == self.local.id() {
            return self.local.is_lower(stamp);
        }
        self.origins
            .get(origin)
            .map_or(stamp.counter == 0, |clock| clock.is_lower(stamp))
    }

    fn is_ready(&self, origin: &PeerId, stamp: &Stamp) -> bool {
        stamp.counter == self.delivered_from(origin) + 1
    }

    fn deliver(&mut self, origin: &PeerId, stamp: &Stamp) {
        self.origins
            .entry(origin.clone())
            .or_insert_with(|| ScalarClock::new(origin.clone()))
            .update(stamp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp(origin: &str, counter: u64) -> Stamp {
        Stamp::new(PeerId::new(origin), counter)
    }

    #[test]
    fn test_next_in_sequence_is_ready() {
        let mut order = FifoOrder::new(PeerId::new("me"));
        let origin = PeerId::new("o");

        assert!(order.is_ready(&origin, &stamp("o", 1)));
        assert!(!order.is_ready(&origin, &stamp("o", 2)));

        order.deliver(&origin, &stamp("o", 1));
        assert!(order.is_stale(&origin, &stamp("o", 1)));
        assert!(order.is_ready(&origin, &stamp("o", 2)));
        assert_eq!(order.delivered_from(&origin), 1);
    }

    #[test]
    fn test_origins_are_independent() {
        let mut order = FifoOrder::new(PeerId::new("me"));
        order.deliver(&PeerId::new("a"), &stamp("a", 1));
        assert!(order.is_ready(&PeerId::new("b"), &stamp("b", 1)));
        assert!(!order.is_stale(&PeerId::new("b"), &stamp("b", 1)));
    }

    #[test]
    fn test_local_stamps_increase() {
        let mut order = FifoOrder::new(PeerId::new("me"));
        assert_eq!(order.stamp(), stamp("me", 1));
        assert_eq!(order.stamp(), stamp("me", 2));
        assert!(order.is_stale(&PeerId::new("me"), &stamp("me", 2)));
    }

    #[test]
    fn test_mismatched_origin_is_rejected() {
        let order = FifoOrder::new(PeerId::new("me"));
        assert!(order.validate(&PeerId::new("a"), &stamp("b", 1)).is_err());
        assert!(order.validate(&PeerId::new("a"), &stamp("a", 1)).is_ok());
    }
}
