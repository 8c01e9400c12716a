#![cfg(test)]

// Model-checked property tests for HashTable. They live inside the crate so
// every step can run the structural invariant check.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use proptest::prelude::*;

use crate::hash_table::HashTable;
use crate::hashing::CastHasher;
use crate::memory::Tracked;
use crate::node::CachedNode;
use crate::node::Node;
use crate::node::PlainNode;

#[derive(Clone, Debug)]
enum Op {
    Insert(u32, u16),
    Remove(u32),
    Lookup(u32),
    Mutate(u32, u16),
    Minimize,
    Prealloc(usize),
    Iterate,
    Clear,
}

// Keys come from a small range, and half of them are multiples of 16, so
// identity hashing piles many keys onto the same home slots.
fn arb_key() -> impl Strategy<Value = u32> {
    prop_oneof![0u32..48, (0u32..24).prop_map(|k| k * 16)]
}

fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
    let op = prop_oneof![
        6 => (arb_key(), any::<u16>()).prop_map(|(k, v)| Op::Insert(k, v)),
        4 => arb_key().prop_map(Op::Remove),
        2 => arb_key().prop_map(Op::Lookup),
        1 => (arb_key(), any::<u16>()).prop_map(|(k, v)| Op::Mutate(k, v)),
        1 => Just(Op::Minimize),
        1 => (0usize..80).prop_map(Op::Prealloc),
        1 => Just(Op::Iterate),
        1 => Just(Op::Clear),
    ];
    proptest::collection::vec(op, 1..200)
}

fn run_ops<N: Node<u32, u16>>(ops: Vec<Op>) -> Result<(), TestCaseError> {
    let mut mem = Tracked::new();
    let mut sut: HashTable<u32, u16, CastHasher, N> = HashTable::new();
    let mut model: BTreeMap<u32, u16> = BTreeMap::new();

    for op in ops {
        match op {
            Op::Insert(k, v) => {
                let full = sut.len() == sut.capacity();
                let before = sut.capacity();
                let stored = *sut.insert(&mut mem, k, v);
                let expected = *model.entry(k).or_insert(v);
                prop_assert_eq!(stored, expected, "insert must not overwrite");

                if sut.capacity() != before {
                    prop_assert!(full, "table grew before it was full");
                    prop_assert_eq!(sut.capacity(), (before * 2).max(4));
                }
            }
            Op::Remove(k) => {
                prop_assert_eq!(sut.remove_entry(&k), model.remove(&k).map(|v| (k, v)));
            }
            Op::Lookup(k) => {
                prop_assert_eq!(sut.lookup(&k), model.get(&k));
                prop_assert_eq!(sut.contains_key(&k), model.contains_key(&k));
            }
            Op::Mutate(k, v) => {
                if let Some(value) = sut.lookup_mut(&k) {
                    *value = v;
                }
                if let Some(value) = model.get_mut(&k) {
                    *value = v;
                }
            }
            Op::Minimize => {
                sut.minimize(&mut mem);
                let expected = match model.len() {
                    0 => 0,
                    n => n.max(4).next_power_of_two(),
                };
                prop_assert_eq!(sut.capacity(), expected);
            }
            Op::Prealloc(n) => {
                let before = sut.capacity();
                sut.prealloc(&mut mem, n);
                prop_assert!(sut.capacity() >= n);
                prop_assert!(sut.capacity() >= before);
            }
            Op::Iterate => {
                let mut cursor = 0;
                let mut seen = BTreeMap::new();
                while let Some((k, v)) = sut.next(&mut cursor) {
                    prop_assert!(seen.insert(*k, *v).is_none(), "entry yielded twice");
                }
                prop_assert_eq!(&seen, &model);
            }
            Op::Clear => {
                sut.clear(&mut mem);
                model.clear();
                prop_assert_eq!(mem.live_bytes(), 0);
            }
        }

        sut.check_invariants();
        prop_assert_eq!(sut.len(), model.len());
        prop_assert!(sut.len() <= sut.capacity());
    }

    let collected: BTreeMap<u32, u16> = sut.iter().map(|(k, v)| (*k, *v)).collect();
    prop_assert_eq!(collected, model);

    sut.clear(&mut mem);
    prop_assert_eq!(mem.live_bytes(), 0);
    prop_assert_eq!(mem.allocations(), mem.releases());
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]

    #[test]
    fn prop_plain_nodes_match_model(ops in arb_ops()) {
        run_ops::<PlainNode<u32, u16>>(ops)?;
    }

    #[test]
    fn prop_cached_nodes_match_model(ops in arb_ops()) {
        run_ops::<CachedNode<u32, u16>>(ops)?;
    }
}
