//! In-memory `BTreeMap`-backed index. Rebuilt from the log on every
//! open; never persists.

use std::collections::BTreeMap;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::error::Result;
use crate::record::PositionalIndex;

use super::{Index, IndexIterator, MaterializedIterator};

/// Ordered in-memory index backed by `std::collections::BTreeMap`,
/// guarded by a `parking_lot::RwLock`.
pub struct BTreeIndex {
    tree: RwLock<BTreeMap<Bytes, PositionalIndex>>,
}

impl BTreeIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Default for BTreeIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl Index for BTreeIndex {
    fn put(&self, key: Bytes, pos: PositionalIndex) -> Option<PositionalIndex> {
        self.tree.write().insert(key, pos)
    }

    fn get(&self, key: &[u8]) -> Option<PositionalIndex> {
        self.tree.read().get(key).copied()
    }

    fn delete(&self, key: &[u8]) -> (Option<PositionalIndex>, bool) {
        let prev = self.tree.write().remove(key);
        (prev, true)
    }

    fn size(&self) -> usize {
        self.tree.read().len()
    }

    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator> {
        let items: Vec<_> = self
            .tree
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        Box::new(MaterializedIterator::new(items, reverse))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
