//! Startup recovery: rebuilds the index by replaying the data files a
//! merge didn't already fold into a hint file.

use std::collections::HashMap;

use bytes::Bytes;

use crate::batch::{parse_key_seq, NON_TRANSACTION_SEQ, TXN_FIN_KEY};
use crate::engine::EngineState;
use crate::error::Result;
use crate::file::DataFile;
use crate::index::Index;
use crate::options::Options;
use crate::record::{decode_position, LogRecordType, PositionalIndex};

/// Loads the hint file (if any), then replays every remaining data file
/// in ascending id order, applying non-transactional records directly
/// and buffering transactional ones until their `TxnFinished` marker
/// arrives. Returns the highest transaction sequence number observed
/// (to seed `Engine::transaction_seq`) and the total size of every
/// position superseded during replay (to seed `Engine::reclaim_size`),
/// mirroring the accounting `Engine::put`/`Engine::delete` perform on
/// the live path.
pub(crate) fn recover(options: &Options, state: &mut EngineState, index: &dyn Index) -> Result<(u64, u64)> {
    let non_merge_file_id = crate::merge::read_non_merge_file_id(&options.dir_path)?.unwrap_or(0);

    load_index_from_hint_file(&options.dir_path, index)?;

    let mut file_ids: Vec<u32> = state
        .file_ids
        .iter()
        .copied()
        .filter(|&id| id >= non_merge_file_id)
        .collect();
    file_ids.sort_unstable();

    let mut max_seq = NON_TRANSACTION_SEQ;
    let mut reclaim_size = 0u64;
    let mut pending: HashMap<u64, Vec<(Bytes, LogRecordType, PositionalIndex)>> = HashMap::new();
    let active_file_id = state.active_file.file_id();
    let mut active_last_offset = state.active_file.write_off();

    for file_id in file_ids {
        let file = state
            .file_for(file_id)
            .expect("file_ids only lists files tracked in state");
        let mut offset = 0u64;
        loop {
            let Some(read) = file.read_log_record(offset)? else {
                break;
            };
            let pos = PositionalIndex {
                file_id,
                offset,
                size: read.size,
            };
            let (real_key, seq) = parse_key_seq(&read.record.key);
            max_seq = max_seq.max(seq);

            if seq == NON_TRANSACTION_SEQ {
                if let Some(prev) = apply(index, &real_key, read.record.record_type, pos) {
                    reclaim_size += prev.size;
                }
            } else if read.record.record_type == LogRecordType::TxnFinished {
                if real_key == TXN_FIN_KEY {
                    if let Some(group) = pending.remove(&seq) {
                        for (key, record_type, pos) in group {
                            if let Some(prev) = apply(index, &key, record_type, pos) {
                                reclaim_size += prev.size;
                            }
                        }
                    }
                }
            } else {
                pending
                    .entry(seq)
                    .or_default()
                    .push((real_key, read.record.record_type, pos));
            }

            offset += read.size;
            if file_id == active_file_id {
                active_last_offset = offset;
            }
        }
    }

    state.active_file.set_write_off(active_last_offset);

    Ok((max_seq, reclaim_size))
}

/// Applies a single replayed record to `index`, returning the position
/// it superseded (if any) — the same return shape `Index::put`/
/// `Index::delete` use, so the caller can fold it into a reclaim-bytes
/// total.
fn apply(
    index: &dyn Index,
    key: &Bytes,
    record_type: LogRecordType,
    pos: PositionalIndex,
) -> Option<PositionalIndex> {
    match record_type {
        LogRecordType::Normal => index.put(key.clone(), pos),
        LogRecordType::Deleted => {
            let (prev, _) = index.delete(key);
            prev
        }
        LogRecordType::TxnFinished => None,
    }
}

/// Replays the hint file produced by a prior merge, if present, loading
/// its entries straight into `index` without touching the data files it
/// summarizes.
///
/// Called unconditionally on open, independent of index type: even the
/// persistent B+-tree index (which otherwise skips log-based recovery
/// entirely) must reconcile against a hint file, since a merge swap may
/// have just deleted the data files its own stale positions pointed at
/// and only the hint file carries the post-merge positions forward.
pub(crate) fn load_index_from_hint_file(dir_path: &std::path::Path, index: &dyn Index) -> Result<()> {
    let hint_path = dir_path.join(crate::file::HINT_FILE_NAME);
    if !hint_path.exists() {
        return Ok(());
    }
    let hint_file = DataFile::open_hint_file(dir_path)?;
    let mut offset = 0u64;
    while let Some(read) = hint_file.read_log_record(offset)? {
        if let Some(pos) = decode_position(&read.record.value) {
            index.put(read.record.key.clone(), pos);
        }
        offset += read.size;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::options::Options;
    use tempfile::tempdir;

    #[test]
    fn replays_records_after_reopen() {
        let dir = tempdir().unwrap();
        let options = Options {
            dir_path: dir.path().to_path_buf(),
            ..Options::default()
        };
        {
            let engine = Engine::open(options.clone()).unwrap();
            engine.put(Bytes::from_static(b"a"), Bytes::from_static(b"1")).unwrap();
            engine.put(Bytes::from_static(b"b"), Bytes::from_static(b"2")).unwrap();
            engine.delete(b"a").unwrap();
        }
        let engine = Engine::open(options).unwrap();
        assert!(engine.get(b"a").is_err());
        assert_eq!(engine.get(b"b").unwrap(), Bytes::from_static(b"2"));
    }

    #[test]
    fn uncommitted_batch_is_not_visible_after_reopen() {
        let dir = tempdir().unwrap();
        let options = Options {
            dir_path: dir.path().to_path_buf(),
            ..Options::default()
        };
        {
            let engine = Engine::open(options.clone()).unwrap();
            let batch = engine.new_write_batch(crate::options::WriteBatchOptions::default()).unwrap();
            batch.put(Bytes::from_static(b"x"), Bytes::from_static(b"1")).unwrap();
            // Intentionally never committed.
        }
        let engine = Engine::open(options).unwrap();
        assert!(engine.get(b"x").is_err());
    }

    #[test]
    fn committed_batch_is_visible_after_reopen() {
        let dir = tempdir().unwrap();
        let options = Options {
            dir_path: dir.path().to_path_buf(),
            ..Options::default()
        };
        {
            let engine = Engine::open(options.clone()).unwrap();
            let batch = engine.new_write_batch(crate::options::WriteBatchOptions::default()).unwrap();
            batch.put(Bytes::from_static(b"x"), Bytes::from_static(b"1")).unwrap();
            batch.put(Bytes::from_static(b"y"), Bytes::from_static(b"2")).unwrap();
            batch.commit().unwrap();
        }
        let engine = Engine::open(options).unwrap();
        assert_eq!(engine.get(b"x").unwrap(), Bytes::from_static(b"1"));
        assert_eq!(engine.get(b"y").unwrap(), Bytes::from_static(b"2"));
    }
}
