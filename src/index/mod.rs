//! The pluggable ordered-map index abstraction (spec §4.4).
//!
//! Three interchangeable implementations exist: [`btree::BTreeIndex`]
//! (in-memory, rebuilt from the log on open), [`art::ArtIndex`]
//! (in-memory radix tree, rebuilt from the log on open), and
//! [`bptree::BPlusTreeIndex`] (on-disk, persists across restarts). All
//! three respect the same ordering, return values, and concurrency
//! contract.

pub mod art;
pub mod btree;
pub mod bptree;

use bytes::Bytes;

use crate::error::Result;
use crate::options::IndexType;
use crate::record::PositionalIndex;

/// Ordered map from user key to [`PositionalIndex`].
pub trait Index: Send + Sync {
    /// Inserts or replaces `key`, returning its previous position, if
    /// any.
    fn put(&self, key: Bytes, pos: PositionalIndex) -> Option<PositionalIndex>;
    /// Looks up `key`.
    fn get(&self, key: &[u8]) -> Option<PositionalIndex>;
    /// Removes `key`. Returns the position it held (if any) and whether
    /// the index mutation itself succeeded.
    fn delete(&self, key: &[u8]) -> (Option<PositionalIndex>, bool);
    /// Number of keys currently indexed.
    fn size(&self) -> usize;
    /// Returns an iterator over a snapshot of the index in ascending
    /// (or, if `reverse`, descending) key order.
    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator>;
    /// Persists and releases any resources held by the index.
    fn close(&self) -> Result<()>;
}

/// A positioned cursor over an index snapshot.
pub trait IndexIterator: Send {
    /// Resets the cursor to the first position.
    fn rewind(&mut self);
    /// Positions at the first key `>= k` (ascending) or `<= k`
    /// (descending).
    fn seek(&mut self, k: &[u8]);
    /// Whether the cursor currently points at an entry.
    fn valid(&self) -> bool;
    /// Advances the cursor.
    fn next(&mut self);
    /// The key at the current cursor position.
    fn key(&self) -> &[u8];
    /// The position at the current cursor position.
    fn value(&self) -> PositionalIndex;
    /// Releases any resources held by the iterator.
    fn close(&mut self) {}
}

/// A snapshot-backed iterator shared by the two in-memory
/// implementations: a sorted `Vec` materialized at construction time,
/// walked forward with a cursor index.
pub(crate) struct MaterializedIterator {
    items: Vec<(Bytes, PositionalIndex)>,
    cursor: usize,
    reverse: bool,
}

impl MaterializedIterator {
    pub(crate) fn new(mut items: Vec<(Bytes, PositionalIndex)>, reverse: bool) -> Self {
        items.sort_by(|a, b| a.0.cmp(&b.0));
        if reverse {
            items.reverse();
        }
        Self {
            items,
            cursor: 0,
            reverse,
        }
    }
}

impl IndexIterator for MaterializedIterator {
    fn rewind(&mut self) {
        self.cursor = 0;
    }

    fn seek(&mut self, k: &[u8]) {
        // `items` is sorted ascending in storage order, then reversed in
        // presentation order when `self.reverse`; `partition_point`
        // needs the presentation order's comparator, which the stored
        // `reverse` flag gives directly (inferring it from adjacent
        // items breaks on a single-element iterator).
        self.cursor = if self.reverse {
            self.items.partition_point(|(key, _)| key.as_ref() > k)
        } else {
            self.items.partition_point(|(key, _)| key.as_ref() < k)
        };
    }

    fn valid(&self) -> bool {
        self.cursor < self.items.len()
    }

    fn next(&mut self) {
        self.cursor += 1;
    }

    fn key(&self) -> &[u8] {
        &self.items[self.cursor].0
    }

    fn value(&self) -> PositionalIndex {
        self.items[self.cursor].1
    }
}

/// Constructs the index implementation named by `index_type`. `dir_path`
/// is only consulted for [`IndexType::BPlusTree`].
pub fn open(index_type: IndexType, dir_path: &std::path::Path) -> Result<Box<dyn Index>> {
    match index_type {
        IndexType::BTree => Ok(Box::new(btree::BTreeIndex::new())),
        IndexType::Art => Ok(Box::new(art::ArtIndex::new())),
        IndexType::BPlusTree => Ok(Box::new(bptree::BPlusTreeIndex::open(dir_path)?)),
    }
}
