#![cfg(test)]

// Property tests for RehashMap kept inside the crate so they can check
// structural invariants the public surface does not expose.

use std::cell::Cell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use proptest::prelude::*;

use crate::behavior::MapBehavior;
use crate::error::MapError;
use crate::hashing;
use crate::map::{RehashMap, Upsert};

// Behavior that counts every key/value teardown so the state machine can
// assert hooks run exactly once per removed binding.
#[derive(Clone)]
struct CountingBehavior {
    seed: u32,
    key_drops: Rc<Cell<usize>>,
    value_drops: Rc<Cell<usize>>,
}

impl MapBehavior for CountingBehavior {
    type Key = String;
    type Value = i64;

    fn hash(&self, key: &String) -> u32 {
        hashing::murmur2(key.as_bytes(), self.seed)
    }

    fn keys_equal(&self, a: &String, b: &String) -> bool {
        a == b
    }

    fn drop_key(&self, key: String) {
        self.key_drops.set(self.key_drops.get() + 1);
        drop(key);
    }

    fn drop_value(&self, _value: i64) {
        self.value_drops.set(self.value_drops.get() + 1);
    }
}

// Pool-indexed operations to improve shrinking: indices shrink to earlier
// keys, pool length shrinks, and op lists shrink in length.
#[derive(Clone, Debug)]
enum OpI {
    Add(usize, i64),
    Replace(usize, i64),
    Delete(usize),
    Take(usize),
    Find(usize),
    Rehash(usize),
    Expand(usize),
    ResizeToFit,
    SetResize(bool),
    Iterate,
}

fn arb_scenario() -> impl Strategy<Value = (Vec<String>, Vec<OpI>)> {
    proptest::collection::vec("[a-c]{0,4}", 1..=8).prop_flat_map(|pool| {
        let idxs: Vec<usize> = (0..pool.len()).collect();
        let idx = proptest::sample::select(idxs);
        let op = prop_oneof![
            (idx.clone(), any::<i64>()).prop_map(|(i, v)| OpI::Add(i, v)),
            (idx.clone(), any::<i64>()).prop_map(|(i, v)| OpI::Replace(i, v)),
            idx.clone().prop_map(OpI::Delete),
            idx.clone().prop_map(OpI::Take),
            idx.clone().prop_map(OpI::Find),
            (0usize..6).prop_map(OpI::Rehash),
            (0usize..48).prop_map(OpI::Expand),
            Just(OpI::ResizeToFit),
            any::<bool>().prop_map(OpI::SetResize),
            Just(OpI::Iterate),
        ];
        proptest::collection::vec(op, 1..80).prop_map(move |ops| (pool.clone(), ops))
    })
}

// Property: state-machine equivalence against std::collections::HashMap.
// Invariants exercised across random operation sequences:
// - Add rejects duplicates; replace reports Created/Replaced correctly.
// - find/fetch parity with the model at every step, idle or migrating.
// - len() equals the model size and the arena holds exactly that many
//   entries; the secondary table is allocated iff a migration is running.
// - Teardown hooks fire exactly once per removed binding; take bypasses
//   them; dropping the map tears down exactly the survivors.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine((pool, ops) in arb_scenario()) {
        let key_drops = Rc::new(Cell::new(0));
        let value_drops = Rc::new(Cell::new(0));
        let behavior = CountingBehavior {
            seed: 0xadd5_ca1e,
            key_drops: key_drops.clone(),
            value_drops: value_drops.clone(),
        };
        let mut expected_key_drops = 0usize;
        let mut expected_value_drops = 0usize;

        let mut sut = RehashMap::new(behavior);
        let mut model: HashMap<String, i64> = HashMap::new();

        for op in ops {
            match op {
                OpI::Add(i, v) => {
                    let k = pool[i].clone();
                    match sut.add(k.clone(), v) {
                        Ok(_) => {
                            prop_assert!(!model.contains_key(&k), "add must fail on duplicate");
                            model.insert(k, v);
                        }
                        Err(MapError::KeyExists) => {
                            prop_assert!(model.contains_key(&k), "duplicate error only when present");
                        }
                        Err(e) => prop_assert!(false, "unexpected add error: {e}"),
                    }
                }
                OpI::Replace(i, v) => {
                    let k = pool[i].clone();
                    match sut.replace(k.clone(), v) {
                        Ok(Upsert::Created) => {
                            prop_assert!(!model.contains_key(&k));
                            model.insert(k, v);
                        }
                        Ok(Upsert::Replaced) => {
                            prop_assert!(model.contains_key(&k));
                            expected_value_drops += 1;
                            model.insert(k, v);
                        }
                        Err(e) => prop_assert!(false, "unexpected replace error: {e}"),
                    }
                }
                OpI::Delete(i) => {
                    let k = pool[i].clone();
                    match sut.delete(&k) {
                        Ok(()) => {
                            prop_assert!(model.remove(&k).is_some());
                            expected_key_drops += 1;
                            expected_value_drops += 1;
                        }
                        Err(MapError::KeyNotFound) => {
                            prop_assert!(!model.contains_key(&k));
                        }
                        Err(e) => prop_assert!(false, "unexpected delete error: {e}"),
                    }
                }
                OpI::Take(i) => {
                    let k = pool[i].clone();
                    match (sut.take(&k), model.remove(&k)) {
                        (Some((tk, tv)), Some(mv)) => {
                            prop_assert_eq!(&tk, &k);
                            prop_assert_eq!(tv, mv);
                            // Ownership went back to the caller: no hooks.
                        }
                        (None, None) => {}
                        (got, want) => {
                            prop_assert!(false, "take mismatch: got {:?} want {:?}", got, want)
                        }
                    }
                }
                OpI::Find(i) => {
                    let k = pool[i].clone();
                    let found = sut.find(&k);
                    match (found, model.get(&k)) {
                        (Some(h), Some(v)) => prop_assert_eq!(h.value(&sut), Some(v)),
                        (None, None) => {}
                        (found, want) => prop_assert!(
                            false,
                            "find mismatch: found={} want={}",
                            found.is_some(),
                            want.is_some()
                        ),
                    }
                }
                OpI::Rehash(n) => {
                    sut.rehash(n);
                }
                OpI::Expand(extra) => {
                    match sut.expand(model.len() + extra) {
                        Ok(()) | Err(MapError::RehashInProgress) => {}
                        Err(e) => prop_assert!(false, "unexpected expand error: {e}"),
                    }
                }
                OpI::ResizeToFit => {
                    match sut.resize_to_fit() {
                        Ok(())
                        | Err(MapError::RehashInProgress)
                        | Err(MapError::ResizeDisabled) => {}
                        Err(e) => prop_assert!(false, "unexpected resize error: {e}"),
                    }
                }
                OpI::SetResize(enabled) => {
                    if enabled {
                        sut.enable_resize();
                    } else {
                        sut.disable_resize();
                    }
                }
                OpI::Iterate => {
                    let seen: BTreeMap<String, i64> =
                        sut.iter().map(|(k, v)| (k.clone(), *v)).collect();
                    let want: BTreeMap<String, i64> =
                        model.iter().map(|(k, v)| (k.clone(), *v)).collect();
                    prop_assert_eq!(seen, want);
                }
            }

            // Structural invariants after every operation.
            prop_assert_eq!(sut.len(), model.len());
            prop_assert_eq!(sut.entries.len(), model.len());
            prop_assert_eq!(sut.secondary.is_unallocated(), !sut.is_rehashing());
            if !sut.primary.is_unallocated() {
                prop_assert!(sut.primary.capacity().is_power_of_two());
                prop_assert_eq!(sut.primary.mask, sut.primary.capacity() - 1);
            }
            prop_assert_eq!(key_drops.get(), expected_key_drops);
            prop_assert_eq!(value_drops.get(), expected_value_drops);
        }

        // Full-scan equivalence, then teardown accounting on drop.
        let seen: BTreeMap<String, i64> = sut.iter().map(|(k, v)| (k.clone(), *v)).collect();
        let want: BTreeMap<String, i64> = model.iter().map(|(k, v)| (k.clone(), *v)).collect();
        prop_assert_eq!(seen, want);

        let survivors = model.len();
        drop(sut);
        prop_assert_eq!(key_drops.get(), expected_key_drops + survivors);
        prop_assert_eq!(value_drops.get(), expected_value_drops + survivors);
    }
}
