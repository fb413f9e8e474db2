//! Merge / compaction: rewrites only-live records into a side
//! directory, then swaps it into place on the next open.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use bytes::Bytes;

use crate::batch::{encode_key_with_seq, parse_key_seq, NON_TRANSACTION_SEQ};
use crate::engine::{directory_size, Engine};
use crate::error::{Error, Result};
use crate::file::{
    parse_data_file_id, DataFile, DATA_FILE_NAME_SUFFIX, MERGE_FINISHED_FILE_NAME, SEQ_NO_FILE_NAME,
};
use crate::options::Options;
use crate::record::{LogRecord, LogRecordType};

fn merge_dir_path(dir: &Path) -> PathBuf {
    let base = dir.file_name().map_or_else(
        || std::ffi::OsString::from("data-merge"),
        |b| {
            let mut s = b.to_os_string();
            s.push("-merge");
            s
        },
    );
    match dir.parent() {
        Some(parent) => parent.join(base),
        None => PathBuf::from(base),
    }
}

/// Reads the decimal `non_merge_file_id` from `{dir}/merge-finished`, if
/// present.
pub(crate) fn read_non_merge_file_id(dir: &Path) -> Result<Option<u32>> {
    let marker_path = dir.join(MERGE_FINISHED_FILE_NAME);
    if !marker_path.exists() {
        return Ok(None);
    }
    let marker = DataFile::open_merge_finished_file(dir)?;
    let Some(read) = marker.read_log_record(0)? else {
        return Ok(None);
    };
    let text = std::str::from_utf8(&read.record.value).map_err(|_| Error::DataDirectoryCorrupted)?;
    let id = text.parse::<u32>().map_err(|_| Error::DataDirectoryCorrupted)?;
    Ok(Some(id))
}

/// Called on open, before the main directory's data files are
/// enumerated: discards a stale (incomplete) merge side directory, or
/// swaps a completed one into place.
pub(crate) fn load_merge_files(dir: &Path) -> Result<()> {
    let merge_path = merge_dir_path(dir);
    if !merge_path.exists() {
        return Ok(());
    }

    let Some(non_merge_file_id) = read_non_merge_file_id(&merge_path)? else {
        tracing::warn!("discarding incomplete merge directory");
        std::fs::remove_dir_all(&merge_path)?;
        return Ok(());
    };

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        if !name.ends_with(DATA_FILE_NAME_SUFFIX) {
            continue;
        }
        if parse_data_file_id(&name)? < non_merge_file_id {
            std::fs::remove_file(entry.path())?;
        }
    }

    for entry in std::fs::read_dir(&merge_path)? {
        let entry = entry?;
        if entry.file_name() == SEQ_NO_FILE_NAME {
            continue;
        }
        let dest = dir.join(entry.file_name());
        std::fs::rename(entry.path(), dest)?;
    }
    std::fs::remove_dir_all(&merge_path).ok();

    tracing::info!(non_merge_file_id, "merge swap applied");
    Ok(())
}

impl Engine {
    /// Runs compaction: rewrites live records from every sealed file
    /// into a side `-merge` directory, with a hint file for fast
    /// reload. The swap into the main directory happens on the next
    /// `open()`.
    pub fn merge(&self) -> Result<()> {
        if self.is_merging.load(Ordering::SeqCst) {
            return Err(Error::MergeInProgress);
        }
        let total = directory_size(&self.options.dir_path)?;
        let reclaimable = self.reclaim_size();
        let ratio = if total == 0 {
            0.0
        } else {
            reclaimable as f64 / total as f64
        };
        if ratio < self.options.merge_threshold {
            return Err(Error::BelowMergeThreshold);
        }

        self.is_merging.store(true, Ordering::SeqCst);
        let result = self.do_merge();
        self.is_merging.store(false, Ordering::SeqCst);
        result
    }

    fn do_merge(&self) -> Result<()> {
        tracing::info!("merge starting");

        let (merge_set, non_merge_file_id) = {
            let mut state = self.state.write();
            state.active_file.sync()?;
            let sealed_id = state.active_file.file_id();
            let non_merge_file_id = sealed_id + 1;
            let new_active = DataFile::open(&self.options.dir_path, non_merge_file_id)?;
            let sealed = std::mem::replace(&mut state.active_file, new_active);
            state.older_files.insert(sealed_id, sealed);
            state.file_ids.push(non_merge_file_id);

            let mut merge_set: Vec<u32> = state
                .file_ids
                .iter()
                .copied()
                .filter(|&id| id < non_merge_file_id)
                .collect();
            merge_set.sort_unstable();
            (merge_set, non_merge_file_id)
        };

        let merge_path = merge_dir_path(&self.options.dir_path);
        if merge_path.exists() {
            std::fs::remove_dir_all(&merge_path)?;
        }
        std::fs::create_dir_all(&merge_path)?;

        // The side engine is only ever used for its file-rotation
        // mechanics (`append_record_locked`); its own index is never
        // read or written during a merge. Force an in-memory index
        // regardless of the outer engine's `index_type` so that, under
        // `IndexType::BPlusTree`, an empty `index.jammdb` in the merge
        // directory doesn't get swapped over the main, populated one.
        let merge_opts = Options {
            dir_path: merge_path.clone(),
            sync_writes: false,
            index_type: crate::options::IndexType::BTree,
            ..self.options.clone()
        };
        let merge_engine = Engine::open(merge_opts)?;
        let hint_file = DataFile::open_hint_file(&merge_path)?;

        for &file_id in &merge_set {
            tracing::debug!(file_id, "merging source file");
            let file = {
                let state = self.state.read();
                state
                    .file_for(file_id)
                    .ok_or(Error::DataFileNotFound(file_id))?
            };
            let mut offset = 0u64;
            loop {
                let Some(read) = file.read_log_record(offset)? else {
                    break;
                };
                let size = read.size;
                if read.record.record_type != LogRecordType::TxnFinished {
                    let (real_key, _seq) = parse_key_seq(&read.record.key);
                    let is_live = matches!(
                        self.index.get(&real_key),
                        Some(p) if p.file_id == file_id && p.offset == offset
                    );
                    if is_live {
                        let rewritten = LogRecord {
                            key: encode_key_with_seq(&real_key, NON_TRANSACTION_SEQ),
                            value: read.record.value.clone(),
                            record_type: read.record.record_type,
                        };
                        let new_pos = {
                            let mut mstate = merge_engine.state.write();
                            merge_engine.append_record_locked(&mut mstate, &rewritten)?
                        };
                        hint_file.write_hint_record(real_key, new_pos)?;
                    }
                }
                offset += size;
            }
        }

        hint_file.sync()?;
        merge_engine.sync()?;

        let marker_file = DataFile::open_merge_finished_file(&merge_path)?;
        let marker = LogRecord {
            key: Bytes::from_static(b"merge.finished"),
            value: Bytes::from(non_merge_file_id.to_string()),
            record_type: LogRecordType::Normal,
        };
        let (buf, _) = marker.encode();
        marker_file.append(&buf)?;
        marker_file.sync()?;

        tracing::info!(files = merge_set.len(), "merge completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_dir_path_appends_suffix() {
        let path = merge_dir_path(Path::new("/tmp/mydb"));
        assert_eq!(path, PathBuf::from("/tmp/mydb-merge"));
    }
}
