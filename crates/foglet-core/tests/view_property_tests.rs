//! Property-based tests for peer view bookkeeping

use foglet_core::{Binding, ChannelConfig, PeerId, PeerView, ViewEvent};
use proptest::prelude::*;
use std::collections::HashMap;

#[derive(Debug, Clone)]
enum Op {
    Add(u8, Option<u8>),
    Remove(u8, Option<u8>),
    Bind(u8, u8),
}

fn binding(layer: Option<u8>) -> Binding {
    match layer {
        None => Binding::Physical,
        Some(layer) => Binding::layer(format!("layer-{layer}")),
    }
}

fn arb_op() -> impl Strategy<Value = Op> {
    let layer = prop::option::of(0u8..3);
    prop_oneof![
        (0u8..4, layer.clone()).prop_map(|(peer, layer)| Op::Add(peer, layer)),
        (0u8..4, layer).prop_map(|(peer, layer)| Op::Remove(peer, layer)),
        (0u8..4, 0u8..3).prop_map(|(peer, layer)| Op::Bind(peer, layer)),
    ]
}

proptest! {
    /// Property: a peer is listed iff it holds at least one binding, and every
    /// removal of a last binding asks for exactly one disconnect
    #[test]
    fn entries_exist_iff_bound(ops in prop::collection::vec(arb_op(), 0..60)) {
        let mut view = PeerView::new(&ChannelConfig::default());
        let mut model: HashMap<PeerId, Vec<Binding>> = HashMap::new();
        let mut disconnects = 0usize;
        let mut expected_disconnects = 0usize;

        for op in ops {
            match op {
                Op::Add(peer, layer) => {
                    let peer = PeerId::new(format!("p{peer}"));
                    let binding = binding(layer);
                    let known = model.contains_key(&peer);
                    let result = view.add(peer.clone(), binding.clone());
                    if known && binding == Binding::Physical {
                        prop_assert!(result.is_err());
                    } else {
                        prop_assert!(result.is_ok());
                        model.entry(peer).or_default().push(binding);
                    }
                }
                Op::Remove(peer, layer) => {
                    let peer = PeerId::new(format!("p{peer}"));
                    let binding = binding(layer);
                    let held = model
                        .get(&peer)
                        .and_then(|bindings| bindings.iter().position(|b| b == &binding));
                    let result = view.remove(&peer, &binding);
                    match held {
                        None => prop_assert!(result.is_err()),
                        Some(index) => {
                            let event = result.expect("binding is held");
                            if event.requires_disconnect() {
                                disconnects += 1;
                            }
                            let bindings = model.get_mut(&peer).expect("peer is known");
                            bindings.remove(index);
                            if bindings.is_empty() {
                                model.remove(&peer);
                                expected_disconnects += 1;
                                prop_assert_eq!(event, ViewEvent::RemovePhysical { peer });
                            }
                        }
                    }
                }
                Op::Bind(peer, layer) => {
                    let peer = PeerId::new(format!("p{peer}"));
                    let layer_name = format!("layer-{layer}");
                    let result = view.bind_peer_to_network(&peer, &layer_name);
                    match model.get_mut(&peer) {
                        None => prop_assert!(result.is_err()),
                        Some(bindings) => {
                            prop_assert!(result.is_ok());
                            if bindings.as_slice() == [Binding::Physical] {
                                bindings[0] = Binding::layer(layer_name);
                            } else {
                                bindings.push(Binding::layer(layer_name));
                            }
                        }
                    }
                }
            }

            for (peer, bindings) in view.all() {
                prop_assert!(!bindings.is_empty());
                prop_assert_eq!(Some(&bindings), model.get(&peer));
            }
            prop_assert_eq!(view.len(), model.len());
        }
        prop_assert_eq!(disconnects, expected_disconnects);
    }
}
