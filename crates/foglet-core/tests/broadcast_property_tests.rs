//! Property-based tests for broadcast delivery order
//!
//! Histories are built by a few origins that sometimes catch up on everything
//! created so far before creating a message of their own. A fresh receiver
//! then gets every message in an arbitrary order, with duplicates.

use foglet_core::modules::broadcast::{
    BroadcastCore, BroadcastMessage, CausalOrder, DeliveryOrder, FifoOrder, Receipt,
};
use foglet_core::{BroadcastConfig, PeerId, VersionVector};
use proptest::prelude::*;

const ORIGINS: usize = 3;

/// One step: an origin, and whether it catches up before creating
fn arb_schedule() -> impl Strategy<Value = Vec<(usize, bool)>> {
    prop::collection::vec((0..ORIGINS, any::<bool>()), 1..16)
}

fn cores<O: DeliveryOrder>() -> Vec<BroadcastCore<O>> {
    (0..ORIGINS)
        .map(|i| BroadcastCore::new(PeerId::new(format!("o{i}")), &BroadcastConfig::default()))
        .collect()
}

fn history<O: DeliveryOrder>(
    schedule: &[(usize, bool)],
) -> Vec<BroadcastMessage<O::Stamp>> {
    let mut origins = cores::<O>();
    let mut created: Vec<BroadcastMessage<O::Stamp>> = Vec::new();
    for (step, (origin, catch_up)) in schedule.iter().enumerate() {
        if *catch_up {
            for message in &created {
                origins[*origin]
                    .receive(message.clone())
                    .expect("history is well formed");
            }
        }
        created.push(origins[*origin].create(vec![step as u8]));
    }
    created
}

fn deliver_all<O: DeliveryOrder>(
    arrivals: Vec<BroadcastMessage<O::Stamp>>,
) -> Vec<BroadcastMessage<O::Stamp>> {
    let mut receiver =
        BroadcastCore::<O>::new(PeerId::new("receiver"), &BroadcastConfig::default());
    let mut delivered = Vec::new();
    for message in arrivals {
        if let Receipt::Accepted { released } = receiver.receive(message).expect("valid message") {
            delivered.extend(released);
        }
    }
    delivered
}

fn with_duplicates<T: Clone>(messages: &[T], repeat: &[bool]) -> Vec<T> {
    let mut arrivals = messages.to_vec();
    arrivals.extend(
        messages
            .iter()
            .zip(repeat.iter().cycle())
            .filter(|(_, repeat)| **repeat)
            .map(|(message, _)| message.clone()),
    );
    arrivals
}

proptest! {
    /// Property: causal delivery never delivers a message before one it depends on
    #[test]
    fn causal_delivery_respects_happens_before(
        (created, arrivals) in arb_schedule()
            .prop_map(|schedule| history::<CausalOrder>(&schedule))
            .prop_flat_map(|created| (Just(created.clone()), Just(created).prop_shuffle())),
        repeat in prop::collection::vec(any::<bool>(), 1..8),
    ) {
        let delivered = deliver_all::<CausalOrder>(with_duplicates(&arrivals, &repeat));
        prop_assert_eq!(delivered.len(), created.len());

        let stamps: Vec<&VersionVector> = delivered.iter().map(|m| &m.stamp).collect();
        for (i, earlier) in stamps.iter().enumerate() {
            for later in &stamps[i + 1..] {
                prop_assert_ne!(
                    later.time().causal_cmp(earlier.time()),
                    Some(core::cmp::Ordering::Less)
                );
            }
        }
    }

    /// Property: FIFO delivery preserves each origin's creation order
    #[test]
    fn fifo_delivery_preserves_origin_order(
        (created, arrivals) in arb_schedule()
            .prop_map(|schedule| history::<FifoOrder>(&schedule))
            .prop_flat_map(|created| (Just(created.clone()), Just(created).prop_shuffle())),
        repeat in prop::collection::vec(any::<bool>(), 1..8),
    ) {
        let delivered = deliver_all::<FifoOrder>(with_duplicates(&arrivals, &repeat));
        prop_assert_eq!(delivered.len(), created.len());

        for origin in 0..ORIGINS {
            let origin = PeerId::new(format!("o{origin}"));
            let counters: Vec<u64> = delivered
                .iter()
                .filter(|m| m.origin == origin)
                .map(|m| m.stamp.counter)
                .collect();
            let expected: Vec<u64> = (1..=counters.len() as u64).collect();
            prop_assert_eq!(counters, expected);
        }
    }
}
