//! Property tests for AttributeStore lock and snapshot semantics

use proptest::prelude::*;
use quarry_core::{AttributeStore, JsonPath, StoreError};
use serde_json::json;

const KEYS: [&str; 3] = ["a", "b", "c"];

fn arb_path() -> impl Strategy<Value = JsonPath> {
    prop::collection::vec(prop::sample::select(KEYS.to_vec()), 1..4).prop_map(|keys| {
        keys.into_iter()
            .fold(JsonPath::root(), |path, key| path.key(key))
    })
}

fn seeded() -> AttributeStore {
    AttributeStore::from_json(json!({
        "a": {"a": {"a": 1, "b": 2}, "b": 3, "c": {"a": 4}},
        "b": {"a": 5},
        "c": 6
    }))
    .unwrap()
}

proptest! {
    #[test]
    fn writes_overlapping_a_lock_always_fail(lock in arb_path(), write in arb_path(), n in any::<i64>()) {
        let store = seeded();
        prop_assume!(store.has_path(&lock));
        store.lock_path(&lock).unwrap();

        let before = store.all();
        let result = store.set_path(&write, json!(n));

        if lock.overlaps(&write) {
            let is_locked = matches!(result, Err(StoreError::LockedPath { .. }));
            prop_assert!(is_locked);
            prop_assert_eq!(store.all(), before);
        } else if result.is_ok() {
            prop_assert_eq!(store.get_path(&write), Some(json!(n)));
        }
    }

    #[test]
    fn snapshots_never_observe_later_writes(path in arb_path(), n in any::<i64>()) {
        let store = seeded();
        let snapshot = store.snapshot();
        let frozen = snapshot.to_json();

        let _ = store.set_path(&path, json!(n));
        let _ = store.delete_path(&path);

        prop_assert_eq!(snapshot.to_json(), frozen);
    }

    #[test]
    fn overlap_is_symmetric(a in arb_path(), b in arb_path()) {
        prop_assert_eq!(a.overlaps(&b), b.overlaps(&a));
    }
}
