//! On-disk B+-tree index, backed by `jammdb`. Persists across restarts;
//! with this variant the engine skips log-based index reconstruction
//! (spec §4.8) and instead reloads `transaction_seq` from the `seq-no`
//! sidecar.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use jammdb::DB;

use crate::error::{Error, Result};
use crate::record::PositionalIndex;

use super::{Index, IndexIterator, MaterializedIterator};

const BUCKET_NAME: &str = "bitterroot-index";
const INDEX_FILE_NAME: &str = "index.jammdb";

fn jammdb_err(e: jammdb::Error) -> Error {
    Error::IndexBackend(e.to_string())
}

fn encode_pos(pos: PositionalIndex) -> [u8; 16] {
    let mut buf = [0u8; 16];
    buf[0..4].copy_from_slice(&pos.file_id.to_le_bytes());
    buf[4..12].copy_from_slice(&pos.offset.to_le_bytes());
    buf[12..16].copy_from_slice(&(pos.size as u32).to_le_bytes());
    buf
}

fn decode_pos(bytes: &[u8]) -> Option<PositionalIndex> {
    if bytes.len() != 16 {
        return None;
    }
    Some(PositionalIndex {
        file_id: u32::from_le_bytes(bytes[0..4].try_into().ok()?),
        offset: u64::from_le_bytes(bytes[4..12].try_into().ok()?),
        size: u64::from(u32::from_le_bytes(bytes[12..16].try_into().ok()?)),
    })
}

/// Persistent index implementation. A single `jammdb` database file
/// (`index.jammdb`) inside the engine's directory holds one bucket
/// mapping user key to the 16-byte encoded [`PositionalIndex`].
pub struct BPlusTreeIndex {
    db: Arc<DB>,
}

impl BPlusTreeIndex {
    /// Opens (creating if absent) the persistent index file inside
    /// `dir_path`.
    pub fn open(dir_path: &Path) -> Result<Self> {
        let db = DB::open(dir_path.join(INDEX_FILE_NAME)).map_err(jammdb_err)?;
        {
            let tx = db.tx(true).map_err(jammdb_err)?;
            tx.get_or_create_bucket(BUCKET_NAME).map_err(jammdb_err)?;
            tx.commit().map_err(jammdb_err)?;
        }
        Ok(Self { db: Arc::new(db) })
    }
}

impl Index for BPlusTreeIndex {
    fn put(&self, key: Bytes, pos: PositionalIndex) -> Option<PositionalIndex> {
        let tx = self.db.tx(true).ok()?;
        let bucket = tx.get_bucket(BUCKET_NAME).ok()?;
        let prev = bucket.get(&key[..]).and_then(|d| d.kv().map(|kv| decode_pos(kv.value()))).flatten();
        bucket.put(key.to_vec(), encode_pos(pos).to_vec()).ok()?;
        tx.commit().ok()?;
        prev
    }

    fn get(&self, key: &[u8]) -> Option<PositionalIndex> {
        let tx = self.db.tx(false).ok()?;
        let bucket = tx.get_bucket(BUCKET_NAME).ok()?;
        bucket
            .get(key)
            .and_then(|d| d.kv().map(|kv| decode_pos(kv.value())))
            .flatten()
    }

    fn delete(&self, key: &[u8]) -> (Option<PositionalIndex>, bool) {
        let Ok(tx) = self.db.tx(true) else {
            return (None, false);
        };
        let Ok(bucket) = tx.get_bucket(BUCKET_NAME) else {
            return (None, false);
        };
        let prev = bucket
            .get(key)
            .and_then(|d| d.kv().map(|kv| decode_pos(kv.value())))
            .flatten();
        let removed = bucket.delete(key).is_ok();
        let _ = tx.commit();
        (prev, removed)
    }

    fn size(&self) -> usize {
        let Ok(tx) = self.db.tx(false) else {
            return 0;
        };
        let Ok(bucket) = tx.get_bucket(BUCKET_NAME) else {
            return 0;
        };
        bucket.cursor().count()
    }

    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator> {
        let mut items = Vec::new();
        if let Ok(tx) = self.db.tx(false) {
            if let Ok(bucket) = tx.get_bucket(BUCKET_NAME) {
                for data in bucket.cursor() {
                    if let Some(kv) = data.kv() {
                        if let Some(pos) = decode_pos(kv.value()) {
                            items.push((Bytes::copy_from_slice(kv.key()), pos));
                        }
                    }
                }
            }
        }
        Box::new(MaterializedIterator::new(items, reverse))
    }

    fn close(&self) -> Result<()> {
        // jammdb flushes and closes on drop; nothing additional needed.
        Ok(())
    }
}
