//! Atomic batch writes: stages buffered records, then flushes them as a
//! sequence-number-tagged group plus a terminating marker.

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use bytes::Bytes;
use integer_encoding::{VarInt, VarIntWriter};
use parking_lot::Mutex;

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::options::WriteBatchOptions;
use crate::record::{LogRecord, LogRecordType, PositionalIndex};

/// Sequence number reserved for non-transactional writes.
pub(crate) const NON_TRANSACTION_SEQ: u64 = 0;
/// Sentinel key (after its sequence prefix is stripped) marking a
/// committed transaction group.
pub(crate) const TXN_FIN_KEY: &[u8] = b"txn-fin";

/// Prefixes `key` with `seq` encoded as an unsigned varint.
pub(crate) fn encode_key_with_seq(key: &[u8], seq: u64) -> Bytes {
    let mut buf = Vec::with_capacity(key.len() + 10);
    buf.write_varint(seq).expect("writing to a Vec<u8> never fails");
    buf.extend_from_slice(key);
    Bytes::from(buf)
}

/// Splits a disk key into `(real_key, seq)`.
pub(crate) fn parse_key_seq(disk_key: &[u8]) -> (Bytes, u64) {
    let (seq, n) = u64::decode_var(disk_key).unwrap_or((0, 0));
    (Bytes::copy_from_slice(&disk_key[n..]), seq)
}

impl Engine {
    /// Creates a [`WriteBatch`] bound to this engine.
    ///
    /// Rejected when the persistent B+-tree index is in use, no
    /// sequence-number sidecar exists yet, and this is not a freshly
    /// initialized directory: sequence-number monotonicity cannot be
    /// recovered in that state.
    pub fn new_write_batch(&self, options: WriteBatchOptions) -> Result<WriteBatch<'_>> {
        if self.options.index_type == crate::options::IndexType::BPlusTree
            && !self.seq_no_file_exists
            && !self.is_initial
        {
            return Err(Error::SeqNoFileMissing);
        }
        Ok(WriteBatch {
            engine: self,
            options,
            lock: Mutex::new(()),
            pending: Mutex::new(HashMap::new()),
        })
    }
}

/// Buffers a mapping from key to pending record, then commits the
/// group atomically.
pub struct WriteBatch<'e> {
    engine: &'e Engine,
    options: WriteBatchOptions,
    lock: Mutex<()>,
    pending: Mutex<HashMap<Bytes, LogRecord>>,
}

impl<'e> WriteBatch<'e> {
    /// Stages a put.
    pub fn put(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<()> {
        let key = key.into();
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        let _guard = self.lock.lock();
        self.pending.lock().insert(
            key.clone(),
            LogRecord {
                key,
                value: value.into(),
                record_type: LogRecordType::Normal,
            },
        );
        Ok(())
    }

    /// Stages a delete. Short-circuits (and drops any buffered entry)
    /// when the key is absent from both the index and the buffer.
    pub fn delete(&self, key: impl AsRef<[u8]>) -> Result<()> {
        let key = key.as_ref();
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        let _guard = self.lock.lock();
        let mut pending = self.pending.lock();
        if self.engine.index.get(key).is_none() {
            pending.remove(key);
            return Ok(());
        }
        let key = Bytes::copy_from_slice(key);
        pending.insert(
            key.clone(),
            LogRecord {
                key,
                value: Bytes::new(),
                record_type: LogRecordType::Deleted,
            },
        );
        Ok(())
    }

    /// Commits the buffered writes atomically: readers observe either
    /// all of the batch's effects or none.
    pub fn commit(&self) -> Result<()> {
        let _guard = self.lock.lock();
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            return Ok(());
        }
        if pending.len() as u32 > self.options.max_batch_size {
            return Err(Error::ExceedMaxBatch);
        }

        let _batch_guard = self.engine.batch_commit_lock.lock();
        let mut state = self.engine.state.write();

        let seq = self.engine.transaction_seq.fetch_add(1, Ordering::SeqCst) + 1;

        let mut positions: HashMap<Bytes, PositionalIndex> = HashMap::with_capacity(pending.len());
        for (key, record) in pending.iter() {
            let tagged = LogRecord {
                key: encode_key_with_seq(key, seq),
                value: record.value.clone(),
                record_type: record.record_type,
            };
            let pos = self.engine.append_record_locked(&mut state, &tagged)?;
            positions.insert(key.clone(), pos);
        }

        let finish = LogRecord {
            key: encode_key_with_seq(TXN_FIN_KEY, seq),
            value: Bytes::new(),
            record_type: LogRecordType::TxnFinished,
        };
        self.engine.append_record_locked(&mut state, &finish)?;

        if self.options.sync_writes {
            state.active_file.sync()?;
        }

        for (key, record) in pending.iter() {
            let pos = positions[key];
            match record.record_type {
                LogRecordType::Normal => {
                    if let Some(prev) = self.engine.index.put(key.clone(), pos) {
                        self.engine.add_reclaim(prev.size);
                    }
                }
                LogRecordType::Deleted => {
                    let (prev, _) = self.engine.index.delete(key);
                    if let Some(prev) = prev {
                        self.engine.add_reclaim(prev.size);
                    }
                }
                LogRecordType::TxnFinished => unreachable!("never staged by put/delete"),
            }
        }

        drop(state);
        pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_seq_round_trip() {
        let encoded = encode_key_with_seq(b"name", 42);
        let (key, seq) = parse_key_seq(&encoded);
        assert_eq!(key, Bytes::from_static(b"name"));
        assert_eq!(seq, 42);
    }

    #[test]
    fn non_transactional_seq_is_zero() {
        let encoded = encode_key_with_seq(b"name", NON_TRANSACTION_SEQ);
        let (_, seq) = parse_key_seq(&encoded);
        assert_eq!(seq, 0);
    }
}
