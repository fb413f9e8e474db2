//! `bitterroot` is an embeddable Bitcask-style key-value store: an
//! append-only log of records plus a pluggable in-memory or on-disk
//! index. Writes append to the tail of the active data file and update
//! the index in one step; reads resolve a key through the index
//! straight to its byte offset. Startup replays the log (or a merge's
//! hint file) to rebuild the index.
//!
//! # Quick start
//!
//! ```no_run
//! use bitterroot::{Engine, Options};
//!
//! # fn main() -> bitterroot::Result<()> {
//! let options = Options {
//!     dir_path: "/tmp/bitterroot-demo".into(),
//!     ..Options::default()
//! };
//! let engine = Engine::open(options)?;
//! engine.put("name", "sakura")?;
//! assert_eq!(engine.get("name")?, "sakura");
//! engine.delete("name")?;
//! # Ok(())
//! # }
//! ```

mod batch;
mod engine;
mod error;
mod file;
mod index;
mod io;
mod merge;
mod options;
mod record;
mod recovery;
#[cfg(test)]
mod testutil;

pub use batch::WriteBatch;
pub use engine::{Engine, Iterator, Stats};
pub use error::{Error, Result};
pub use index::{Index, IndexIterator};
pub use options::{IndexType, IteratorOptions, Options, WriteBatchOptions};
pub use record::PositionalIndex;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn put_get_delete_round_trip() {
        let dir = tempdir().unwrap();
        let options = Options {
            dir_path: dir.path().to_path_buf(),
            ..Options::default()
        };
        let engine = Engine::open(options).unwrap();
        engine.put("name", "sakura").unwrap();
        assert_eq!(engine.get("name").unwrap(), "sakura");
        engine.delete("name").unwrap();
        assert!(matches!(engine.get("name"), Err(Error::KeyNotFound)));
    }

    #[test]
    fn empty_key_rejected() {
        let dir = tempdir().unwrap();
        let options = Options {
            dir_path: dir.path().to_path_buf(),
            ..Options::default()
        };
        let engine = Engine::open(options).unwrap();
        assert!(matches!(engine.put("", "x"), Err(Error::KeyIsEmpty)));
    }

    #[test]
    fn second_open_of_same_directory_fails() {
        let dir = tempdir().unwrap();
        let options = Options {
            dir_path: dir.path().to_path_buf(),
            ..Options::default()
        };
        let _engine = Engine::open(options.clone()).unwrap();
        assert!(matches!(Engine::open(options), Err(Error::DatabaseInUse)));
    }

    #[test]
    fn rotation_across_small_data_files() {
        let dir = tempdir().unwrap();
        let options = Options {
            dir_path: dir.path().to_path_buf(),
            data_file_size: 64,
            ..Options::default()
        };
        let engine = Engine::open(options).unwrap();
        for i in 0..50 {
            engine.put(format!("key-{i}"), format!("value-{i}")).unwrap();
        }
        let stats = engine.stat().unwrap();
        assert!(stats.data_file_count > 1);
        for i in 0..50 {
            assert_eq!(
                engine.get(format!("key-{i}")).unwrap(),
                bytes::Bytes::from(format!("value-{i}"))
            );
        }
    }

    #[test]
    fn stress_put_and_read_back_all_keys() {
        let dir = tempdir().unwrap();
        let options = Options {
            dir_path: dir.path().to_path_buf(),
            data_file_size: 4096,
            ..Options::default()
        };
        let engine = Engine::open(options).unwrap();
        for i in 0..500 {
            let key = testutil::random_key(i);
            let value = testutil::random_value(i, 40);
            engine.put(key, value).unwrap();
        }
        for i in 0..500 {
            let key = testutil::random_key(i);
            let expected = testutil::random_value(i, 40);
            assert_eq!(engine.get(key).unwrap(), expected);
        }
    }

    #[test]
    fn iterator_with_prefix_and_reverse() {
        let dir = tempdir().unwrap();
        let options = Options {
            dir_path: dir.path().to_path_buf(),
            ..Options::default()
        };
        let engine = Engine::open(options).unwrap();
        engine.put("a-1", "1").unwrap();
        engine.put("a-2", "2").unwrap();
        engine.put("b-1", "3").unwrap();

        let mut it = engine.iterator(IteratorOptions {
            prefix: b"a-".to_vec(),
            reverse: true,
        });
        let mut keys = Vec::new();
        while it.valid() {
            keys.push(it.key().to_vec());
            it.next();
        }
        assert_eq!(keys, vec![b"a-2".to_vec(), b"a-1".to_vec()]);
    }

    #[test]
    fn list_keys_and_fold_cover_all_entries() {
        let dir = tempdir().unwrap();
        let options = Options {
            dir_path: dir.path().to_path_buf(),
            ..Options::default()
        };
        let engine = Engine::open(options).unwrap();
        engine.put("a", "1").unwrap();
        engine.put("b", "2").unwrap();

        assert_eq!(engine.list_keys().len(), 2);

        let mut seen = Vec::new();
        engine
            .fold(|k, v| {
                seen.push((k.to_vec(), v.to_vec()));
                true
            })
            .unwrap();
        assert_eq!(seen.len(), 2);
    }
}
