//! In-memory radix-tree (ART-style) index. Rebuilt from the log on
//! every open; never persists.
//!
//! No crate in this codebase's dependency ecosystem offers an
//! adaptive radix tree, so this is a small hand-rolled byte-keyed trie:
//! each node holds an optional value and a sparse, key-ordered map of
//! child bytes. It is not node-compressed (no ART node4/16/48/256
//! layout), but it gives the same ordering and point-lookup contract
//! as the other two implementations.

use std::collections::BTreeMap;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::error::Result;
use crate::record::PositionalIndex;

use super::{Index, IndexIterator, MaterializedIterator};

#[derive(Default)]
struct Node {
    value: Option<PositionalIndex>,
    children: BTreeMap<u8, Box<Node>>,
}

impl Node {
    fn get(&self, key: &[u8]) -> Option<PositionalIndex> {
        match key.split_first() {
            None => self.value,
            Some((b, rest)) => self.children.get(b).and_then(|child| child.get(rest)),
        }
    }

    fn put(&mut self, key: &[u8], pos: PositionalIndex) -> Option<PositionalIndex> {
        match key.split_first() {
            None => self.value.replace(pos),
            Some((b, rest)) => self
                .children
                .entry(*b)
                .or_default()
                .put(rest, pos),
        }
    }

    fn delete(&mut self, key: &[u8]) -> Option<PositionalIndex> {
        match key.split_first() {
            None => self.value.take(),
            Some((b, rest)) => self.children.get_mut(b).and_then(|child| child.delete(rest)),
        }
    }

    fn collect(&self, prefix: &mut Vec<u8>, out: &mut Vec<(Bytes, PositionalIndex)>) {
        if let Some(pos) = self.value {
            out.push((Bytes::copy_from_slice(prefix), pos));
        }
        for (b, child) in &self.children {
            prefix.push(*b);
            child.collect(prefix, out);
            prefix.pop();
        }
    }
}

/// Radix-tree-backed index, guarded by a single `parking_lot::RwLock`
/// over the whole tree (point operations are cheap; the tree is
/// shallow relative to key length, not wide).
pub struct ArtIndex {
    root: RwLock<Node>,
    len: std::sync::atomic::AtomicUsize,
}

impl ArtIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: RwLock::new(Node::default()),
            len: std::sync::atomic::AtomicUsize::new(0),
        }
    }
}

impl Default for ArtIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl Index for ArtIndex {
    fn put(&self, key: Bytes, pos: PositionalIndex) -> Option<PositionalIndex> {
        let prev = self.root.write().put(&key, pos);
        if prev.is_none() {
            self.len.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
        prev
    }

    fn get(&self, key: &[u8]) -> Option<PositionalIndex> {
        self.root.read().get(key)
    }

    fn delete(&self, key: &[u8]) -> (Option<PositionalIndex>, bool) {
        let prev = self.root.write().delete(key);
        if prev.is_some() {
            self.len.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
        }
        (prev, true)
    }

    fn size(&self) -> usize {
        self.len.load(std::sync::atomic::Ordering::Relaxed)
    }

    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator> {
        let mut items = Vec::new();
        self.root.read().collect(&mut Vec::new(), &mut items);
        Box::new(MaterializedIterator::new(items, reverse))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
