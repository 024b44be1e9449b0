//! Property-based tests for the connection graph and drive resolution.

mod mocks;

use proptest::prelude::*;
use rusty_board::bus::{resolve_drivers, ConflictPolicy, Driver, NetPolicy, Resolution};
use rusty_board::connection::ConnectionSystem;
use rusty_board::pin::{PinSpec, PinValue, SignalClass};
use rusty_board::types::{width_mask, ComponentId, PinId};
use std::collections::{BTreeMap, BTreeSet};

const POOL: usize = 8;

#[derive(Debug, Clone, Copy)]
enum Op {
    Connect(usize, usize),
    Disconnect(usize, usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..POOL, 0..POOL).prop_map(|(a, b)| Op::Connect(a, b)),
        1 => (0..POOL, 0..POOL).prop_map(|(a, b)| Op::Disconnect(a, b)),
    ]
}

fn arb_driver(width: u8) -> impl Strategy<Value = (u64, u64)> {
    (0..=width_mask(width), 0u64..1000)
}

fn pool() -> (ConnectionSystem, Vec<PinId>) {
    let mut cs = ConnectionSystem::new();
    let specs: Vec<PinSpec> = (0..POOL)
        .map(|i| PinSpec::bidirectional(&format!("P{}", i), 4, SignalClass::Wire))
        .collect();
    let pins = cs.register_pins(ComponentId::new(0), &specs);
    (cs, pins)
}

/// Connected components of the explicit edge graph, two pins or more.
fn edge_components(cs: &ConnectionSystem, pins: &[PinId]) -> BTreeSet<BTreeSet<PinId>> {
    let mut parent: BTreeMap<PinId, PinId> = pins.iter().map(|p| (*p, *p)).collect();
    fn find(parent: &mut BTreeMap<PinId, PinId>, pin: PinId) -> PinId {
        let up = parent[&pin];
        if up == pin {
            return pin;
        }
        let root = find(parent, up);
        parent.insert(pin, root);
        root
    }
    for edge in cs.edges() {
        let a = find(&mut parent, edge.wide);
        let b = find(&mut parent, edge.narrow);
        parent.insert(a, b);
    }

    let mut groups: BTreeMap<PinId, BTreeSet<PinId>> = BTreeMap::new();
    for pin in pins {
        let root = find(&mut parent, *pin);
        groups.entry(root).or_default().insert(*pin);
    }
    groups.into_values().filter(|g| g.len() >= 2).collect()
}

mod graph_properties {
    use super::*;

    proptest! {
        #[test]
        fn test_nets_match_edge_closure(ops in prop::collection::vec(arb_op(), 0..40)) {
            let (mut cs, pins) = pool();
            for op in ops {
                // Rejected edits must leave the graph untouched, which the
                // checks below cover.
                let _ = match op {
                    Op::Connect(a, b) => cs.connect(pins[a], pins[b], None).map(|_| ()),
                    Op::Disconnect(a, b) => cs.disconnect(pins[a], pins[b]),
                };
            }

            let nets: BTreeSet<BTreeSet<PinId>> = cs.nets().map(|n| n.pins().collect()).collect();
            prop_assert_eq!(&nets, &edge_components(&cs, &pins));

            let mut seen = BTreeSet::new();
            for net in cs.nets() {
                prop_assert!(net.len() >= 2);
                for pin in net.pins() {
                    prop_assert!(seen.insert(pin), "pin {} in two nets", pin);
                    prop_assert_eq!(cs.net_of(pin), Some(net.id));
                }
            }
            for pin in &pins {
                if !seen.contains(pin) {
                    prop_assert_eq!(cs.net_of(*pin), None);
                }
            }
        }

        #[test]
        fn test_connectivity_is_symmetric(ops in prop::collection::vec(arb_op(), 0..30)) {
            let (mut cs, pins) = pool();
            for op in ops {
                if let Op::Connect(a, b) = op {
                    let _ = cs.connect(pins[a], pins[b], None);
                }
            }
            for a in &pins {
                for b in &pins {
                    prop_assert_eq!(cs.is_connected(*a, *b), cs.is_connected(*b, *a));
                }
            }
        }

        #[test]
        fn test_self_connection_rejected(index in 0..POOL) {
            let (mut cs, pins) = pool();
            prop_assert!(cs.connect(pins[index], pins[index], None).is_err());
            prop_assert_eq!(cs.nets().count(), 0);
        }
    }
}

mod resolution_properties {
    use super::*;

    fn drivers(values: &[(u64, u64)], width: u8) -> Vec<Driver> {
        values
            .iter()
            .enumerate()
            .map(|(i, (value, seq))| Driver {
                pin: PinId::new(i as u32),
                offset: 0,
                width,
                value: *value,
                seq: *seq,
            })
            .collect()
    }

    proptest! {
        #[test]
        fn test_single_driver_resolves_to_its_value(
            (value, seq) in arb_driver(8),
            policy in prop_oneof![
                Just(ConflictPolicy::LastWriter),
                Just(ConflictPolicy::WiredOr),
                Just(ConflictPolicy::ErrorOnConflict),
            ],
        ) {
            let resolved = resolve_drivers(8, policy, &drivers(&[(value, seq)], 8));
            prop_assert_eq!(resolved, Resolution::Resolved(PinValue::Driven(value)));
        }

        #[test]
        fn test_wired_or_is_bitwise_or(values in prop::collection::vec(arb_driver(8), 1..6)) {
            let expected = values.iter().fold(0, |acc, (v, _)| acc | v);
            let resolved = resolve_drivers(8, ConflictPolicy::WiredOr, &drivers(&values, 8));
            prop_assert_eq!(resolved, Resolution::Resolved(PinValue::Driven(expected)));
        }

        #[test]
        fn test_error_on_conflict_flags_disagreement(values in prop::collection::vec(arb_driver(4), 2..5)) {
            let distinct: BTreeSet<u64> = values.iter().map(|(v, _)| *v).collect();
            let resolved = resolve_drivers(4, ConflictPolicy::ErrorOnConflict, &drivers(&values, 4));
            match resolved {
                Resolution::Resolved(value) => {
                    prop_assert_eq!(distinct.len(), 1);
                    prop_assert_eq!(value, PinValue::Driven(values[0].0));
                }
                Resolution::Conflict { pins, .. } => {
                    prop_assert!(distinct.len() > 1);
                    prop_assert!(pins.len() >= 2);
                }
            }
        }

        #[test]
        fn test_last_writer_takes_highest_sequence(values in prop::collection::vec(arb_driver(8), 1..6)) {
            let winner = values
                .iter()
                .enumerate()
                .max_by_key(|(i, (_, seq))| (*seq, *i))
                .map(|(_, (v, _))| *v)
                .unwrap();
            let resolved = resolve_drivers(8, ConflictPolicy::LastWriter, &drivers(&values, 8));
            prop_assert_eq!(resolved, Resolution::Resolved(PinValue::Driven(winner)));
        }

        #[test]
        fn test_no_drivers_float(policy in prop_oneof![
            Just(ConflictPolicy::LastWriter),
            Just(ConflictPolicy::WiredOr),
            Just(ConflictPolicy::ErrorOnConflict),
        ]) {
            prop_assert_eq!(resolve_drivers(8, policy, &[]), Resolution::Resolved(PinValue::HighZ));
        }
    }
}

mod commit_properties {
    use super::*;

    proptest! {
        #[test]
        fn test_committed_net_value_matches_policy(
            a in 0u64..16,
            b in 0u64..16,
        ) {
            let mut cs = ConnectionSystem::new();
            let specs = [
                PinSpec::output("A", 4, SignalClass::Wire),
                PinSpec::output("B", 4, SignalClass::Wire),
                PinSpec::input("IN", 4, SignalClass::Wire),
            ];
            let pins = cs.register_pins(ComponentId::new(0), &specs);
            cs.connect(pins[0], pins[1], Some(NetPolicy::error_on_conflict().as_warning())).unwrap();
            cs.connect(pins[1], pins[2], None).unwrap();

            cs.write(pins[0], PinValue::Driven(a)).unwrap();
            cs.write(pins[1], PinValue::Driven(b)).unwrap();
            let report = cs.commit().unwrap();

            prop_assert_eq!(report.warnings.is_empty(), a == b);
            // Later writes win when the conflict is only a warning.
            prop_assert_eq!(cs.read_pin(pins[2]).unwrap(), PinValue::Driven(b));
        }

        #[test]
        fn test_fatal_conflict_keeps_previous_values(a in 0u64..16, b in 0u64..16) {
            prop_assume!(a != b);
            let mut cs = ConnectionSystem::new();
            let specs = [
                PinSpec::output("A", 4, SignalClass::Wire),
                PinSpec::output("B", 4, SignalClass::Wire),
            ];
            let pins = cs.register_pins(ComponentId::new(0), &specs);
            cs.connect(pins[0], pins[1], Some(NetPolicy::error_on_conflict())).unwrap();

            cs.write(pins[0], PinValue::Driven(a)).unwrap();
            cs.commit().unwrap();
            cs.write(pins[1], PinValue::Driven(b)).unwrap();
            let conflicts = cs.commit().unwrap_err();

            prop_assert_eq!(conflicts.len(), 1);
            prop_assert!(conflicts[0].fatal);
            prop_assert_eq!(cs.read_pin(pins[1]).unwrap(), PinValue::Driven(a));
            prop_assert!(!cs.has_pending());
        }
    }
}

mod determinism {
    use super::mocks::*;
    use super::*;
    use rusty_board::engine::Engine;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn test_same_stimulus_same_snapshots(script in prop::collection::vec(prop::option::of(0u64..256), 1..24)) {
            let run = || {
                let mut engine = Engine::default();
                let source = add(&mut engine, "SRC", ScriptedSource {
                    width: 8,
                    script: script
                        .iter()
                        .map(|v| v.map_or(PinValue::HighZ, PinValue::Driven))
                        .collect(),
                });
                let buffer = add(&mut engine, "BUF", MockBuffer);
                engine.connect_by_name((source, "OUT"), (buffer, "A")).unwrap();
                let mut snapshots = Vec::new();
                for _ in 0..script.len() {
                    engine.step(1).unwrap();
                    snapshots.push(engine.snapshot());
                }
                snapshots
            };
            prop_assert_eq!(run(), run());
        }
    }
}
