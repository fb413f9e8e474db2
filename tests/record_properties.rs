//! Property tests for the record codec and index ordering contracts.

use bitterroot::{Engine, IndexType, IteratorOptions, Options};
use bytes::Bytes;
use proptest::prelude::*;
use tempfile::tempdir;

proptest! {
    #[test]
    fn put_get_round_trips_any_byte_string(
        key in prop::collection::vec(any::<u8>(), 1..64),
        value in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        let dir = tempdir().unwrap();
        let engine = Engine::open(Options {
            dir_path: dir.path().to_path_buf(),
            ..Options::default()
        }).unwrap();
        engine.put(Bytes::from(key.clone()), Bytes::from(value.clone())).unwrap();
        prop_assert_eq!(engine.get(&key).unwrap(), Bytes::from(value));
    }

    #[test]
    fn forward_iterator_is_strictly_increasing(
        mut keys in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..16), 1..64),
    ) {
        keys.sort();
        keys.dedup();
        let dir = tempdir().unwrap();
        let engine = Engine::open(Options {
            dir_path: dir.path().to_path_buf(),
            index_type: IndexType::BTree,
            ..Options::default()
        }).unwrap();
        for (i, k) in keys.iter().enumerate() {
            engine.put(Bytes::from(k.clone()), Bytes::from(i.to_string())).unwrap();
        }

        let mut it = engine.iterator(IteratorOptions::default());
        let mut seen = Vec::new();
        while it.valid() {
            seen.push(it.key().to_vec());
            it.next();
        }
        for w in seen.windows(2) {
            prop_assert!(w[0] < w[1]);
        }
        prop_assert_eq!(seen, keys);
    }
}
