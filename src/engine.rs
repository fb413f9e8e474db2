//! The engine core: owns the active file, the sealed older files, the
//! index, the merge state, the directory lock, and the transaction
//! sequence counter.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};

use crate::batch::{encode_key_with_seq, NON_TRANSACTION_SEQ};
use crate::error::{Error, Result};
use crate::file::{data_file_name, parse_data_file_id, DataFile, DATA_FILE_NAME_SUFFIX};
use crate::index::{self, Index};
use crate::options::{IndexType, IteratorOptions, Options};
use crate::record::{LogRecord, LogRecordType, PositionalIndex};

/// All file state guarded by the engine's single read-write lock.
pub(crate) struct EngineState {
    pub(crate) active_file: DataFile,
    pub(crate) older_files: HashMap<u32, DataFile>,
    pub(crate) file_ids: Vec<u32>,
}

impl EngineState {
    pub(crate) fn file_for(&self, file_id: u32) -> Option<DataFile> {
        if file_id == self.active_file.file_id() {
            Some(self.active_file.clone())
        } else {
            self.older_files.get(&file_id).cloned()
        }
    }
}

/// Aggregate statistics returned by [`Engine::stat`].
#[derive(Debug, Clone, Copy)]
pub struct Stats {
    /// Number of keys currently indexed.
    pub key_count: usize,
    /// Number of data files (active + sealed).
    pub data_file_count: usize,
    /// Estimated bytes reclaimable by `merge()`.
    pub reclaimable_bytes: u64,
    /// Total bytes the data directory currently occupies.
    pub disk_size: u64,
}

/// An open database.
pub struct Engine {
    pub(crate) options: Options,
    pub(crate) state: RwLock<EngineState>,
    pub(crate) index: Box<dyn Index>,
    pub(crate) transaction_seq: AtomicU64,
    pub(crate) is_merging: AtomicBool,
    pub(crate) batch_commit_lock: Mutex<()>,
    bytes_since_sync: AtomicU64,
    reclaim_size: AtomicU64,
    lock_file: File,
    pub(crate) seq_no_file_exists: bool,
    pub(crate) is_initial: bool,
}

impl Engine {
    /// Opens a database rooted at `options.dir_path`, creating it if
    /// absent, running merge recovery and log recovery as needed.
    #[tracing::instrument(skip(options), fields(dir = %options.dir_path.display()))]
    pub fn open(options: Options) -> Result<Self> {
        options.check()?;
        let is_initial = !options.dir_path.exists() || is_dir_empty(&options.dir_path)?;
        std::fs::create_dir_all(&options.dir_path)?;
        let lock_file = acquire_directory_lock(&options.dir_path)?;

        crate::merge::load_merge_files(&options.dir_path)?;

        let seq_no_file_exists = options.dir_path.join(crate::file::SEQ_NO_FILE_NAME).exists();

        let (file_ids, older_files, active_file) = load_data_files(&options)?;
        let index = index::open(options.index_type, &options.dir_path)?;

        let mut state = EngineState {
            active_file,
            older_files,
            file_ids,
        };

        let (transaction_seq, reclaim_size) = if options.index_type == IndexType::BPlusTree {
            // The persistent index otherwise skips log-based
            // reconstruction, but a merge swap that ran before this
            // open may have deleted data files the index's stale
            // positions still pointed at; the hint file carries the
            // post-merge positions forward regardless of index type.
            crate::recovery::load_index_from_hint_file(&options.dir_path, index.as_ref())?;
            let seq = if seq_no_file_exists {
                load_seq_no(&options.dir_path)?
            } else {
                0
            };
            (seq, 0)
        } else {
            crate::recovery::recover(&options, &mut state, index.as_ref())?
        };

        tracing::info!(
            keys = index.size(),
            files = state.file_ids.len(),
            "database opened"
        );

        Ok(Self {
            options,
            state: RwLock::new(state),
            index,
            transaction_seq: AtomicU64::new(transaction_seq),
            is_merging: AtomicBool::new(false),
            batch_commit_lock: Mutex::new(()),
            bytes_since_sync: AtomicU64::new(0),
            reclaim_size: AtomicU64::new(reclaim_size),
            lock_file,
            seq_no_file_exists,
            is_initial,
        })
    }

    /// Rejects an empty key.
    fn check_key(key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        Ok(())
    }

    /// Inserts or replaces `key`.
    pub fn put(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<()> {
        let key = key.into();
        Self::check_key(&key)?;
        let record = LogRecord {
            key: encode_key_with_seq(&key, NON_TRANSACTION_SEQ),
            value: value.into(),
            record_type: LogRecordType::Normal,
        };
        let pos = {
            let mut state = self.state.write();
            self.append_record_locked(&mut state, &record)?
        };
        if let Some(prev) = self.index.put(key, pos) {
            self.add_reclaim(prev.size);
        }
        Ok(())
    }

    /// Removes `key`. Returns `KeyNotFound` if it is absent.
    pub fn delete(&self, key: impl AsRef<[u8]>) -> Result<()> {
        let key = key.as_ref();
        Self::check_key(key)?;
        if self.index.get(key).is_none() {
            return Err(Error::KeyNotFound);
        }
        let record = LogRecord {
            key: encode_key_with_seq(key, NON_TRANSACTION_SEQ),
            value: Bytes::new(),
            record_type: LogRecordType::Deleted,
        };
        {
            let mut state = self.state.write();
            self.append_record_locked(&mut state, &record)?;
        }
        let (prev, _) = self.index.delete(key);
        if let Some(prev) = prev {
            self.add_reclaim(prev.size);
        }
        Ok(())
    }

    /// Looks up `key`, returning its value.
    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Bytes> {
        let key = key.as_ref();
        Self::check_key(key)?;
        let pos = self.index.get(key).ok_or(Error::KeyNotFound)?;
        let state = self.state.read();
        self.get_value_by_position(&state, pos)
    }

    /// Reads the record at `pos`, returning its value. Fails with
    /// `DataHasBeenDeleted` if the record is a tombstone (a transient
    /// race: the index was updated but this read raced a concurrent
    /// delete before its own index mutation landed).
    pub(crate) fn get_value_by_position(&self, state: &EngineState, pos: PositionalIndex) -> Result<Bytes> {
        let file = state
            .file_for(pos.file_id)
            .ok_or(Error::DataFileNotFound(pos.file_id))?;
        let read = file
            .read_log_record(pos.offset)?
            .ok_or(Error::DataDirectoryCorrupted)?;
        if read.record.record_type == LogRecordType::Deleted {
            return Err(Error::DataHasBeenDeleted);
        }
        Ok(read.record.value)
    }

    /// Appends `record`, rotating the active file first if it would
    /// overflow `data_file_size`. Assumes the caller holds the engine
    /// write lock.
    pub(crate) fn append_record_locked(
        &self,
        state: &mut EngineState,
        record: &LogRecord,
    ) -> Result<PositionalIndex> {
        let (buf, size) = record.encode();

        if state.active_file.write_off() + size as u64 > self.options.data_file_size {
            state.active_file.sync()?;
            let sealed_id = state.active_file.file_id();
            let new_id = sealed_id + 1;
            let new_active = DataFile::open(&self.options.dir_path, new_id)?;
            let sealed = std::mem::replace(&mut state.active_file, new_active);
            state.older_files.insert(sealed_id, sealed);
            state.file_ids.push(new_id);
        }

        let offset = state.active_file.append(&buf)?;

        let since_sync = self.bytes_since_sync.fetch_add(size as u64, Ordering::Relaxed) + size as u64;
        let need_sync = self.options.sync_writes
            || (self.options.bytes_per_sync > 0 && since_sync >= self.options.bytes_per_sync);
        if need_sync {
            state.active_file.sync()?;
            if !self.options.sync_writes {
                self.bytes_since_sync.store(0, Ordering::Relaxed);
            }
        }

        Ok(PositionalIndex {
            file_id: state.active_file.file_id(),
            offset,
            size: size as u64,
        })
    }

    /// Flushes the active file to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.state.read().active_file.sync()
    }

    /// Snapshot of every key currently indexed, in ascending order.
    pub fn list_keys(&self) -> Vec<Bytes> {
        let mut it = self.index.iterator(false);
        let mut keys = Vec::with_capacity(self.index.size());
        it.rewind();
        while it.valid() {
            keys.push(Bytes::copy_from_slice(it.key()));
            it.next();
        }
        keys
    }

    /// Invokes `f(key, value)` for every key in ascending order, under a
    /// single consistent read-lock snapshot. Stops early when `f`
    /// returns `false`.
    pub fn fold<F: FnMut(&[u8], &[u8]) -> bool>(&self, mut f: F) -> Result<()> {
        let state = self.state.read();
        let mut it = self.index.iterator(false);
        it.rewind();
        while it.valid() {
            let pos = it.value();
            let value = self.get_value_by_position(&state, pos)?;
            if !f(it.key(), &value) {
                break;
            }
            it.next();
        }
        Ok(())
    }

    /// Returns an [`Iterator`] over the database.
    pub fn iterator(&self, opts: IteratorOptions) -> Iterator<'_> {
        let mut inner = self.index.iterator(opts.reverse);
        inner.rewind();
        let mut it = Iterator {
            engine: self,
            inner,
            prefix: opts.prefix,
        };
        it.skip_to_next();
        it
    }

    /// Current aggregate statistics.
    pub fn stat(&self) -> Result<Stats> {
        let state = self.state.read();
        Ok(Stats {
            key_count: self.index.size(),
            data_file_count: state.file_ids.len(),
            reclaimable_bytes: self.reclaim_size.load(Ordering::Relaxed),
            disk_size: crate::engine::directory_size(&self.options.dir_path)?,
        })
    }

    pub(crate) fn reclaim_size(&self) -> u64 {
        self.reclaim_size.load(Ordering::Relaxed)
    }

    pub(crate) fn add_reclaim(&self, size: u64) {
        self.reclaim_size.fetch_add(size, Ordering::Relaxed);
    }

    /// Persists `transaction_seq`, closes the index, and releases the
    /// directory lock.
    pub fn close(&self) -> Result<()> {
        if self.options.index_type == IndexType::BPlusTree {
            // Rewritten from scratch, not appended: the sidecar holds
            // exactly one record, the latest `transaction_seq`. Appending
            // here (as the `hint-index`/`merge-finished` files do) would
            // leave stale records behind that `load_seq_no` (which always
            // reads the record at offset 0) would keep reading back
            // instead of the current value.
            let seq = self.transaction_seq.load(Ordering::SeqCst);
            let record = LogRecord {
                key: Bytes::from_static(b"seq.no"),
                value: Bytes::from(seq.to_string()),
                record_type: LogRecordType::Normal,
            };
            let (buf, _) = record.encode();
            let path = self.options.dir_path.join(crate::file::SEQ_NO_FILE_NAME);
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&path)?;
            file.write_all(&buf)?;
            file.sync_all()?;
        }
        self.state.read().active_file.sync()?;
        self.index.close()?;
        FileExt::unlock(&self.lock_file)?;
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "error while closing database on drop");
        }
    }
}

/// A cursor over the database honoring an optional key prefix and
/// iteration direction. Wraps an index iterator; `value()` resolves the
/// current entry's bytes against the owning engine on demand.
pub struct Iterator<'e> {
    engine: &'e Engine,
    inner: Box<dyn crate::index::IndexIterator>,
    prefix: Vec<u8>,
}

impl<'e> Iterator<'e> {
    /// Resets the cursor to the first matching key.
    pub fn rewind(&mut self) {
        self.inner.rewind();
        self.skip_to_next();
    }

    /// Positions at the first matching key `>= k` (or `<= k` in
    /// reverse).
    pub fn seek(&mut self, k: &[u8]) {
        self.inner.seek(k);
        self.skip_to_next();
    }

    /// Advances past the current key.
    pub fn next(&mut self) {
        self.inner.next();
        self.skip_to_next();
    }

    /// Whether the cursor currently points at a matching key.
    pub fn valid(&self) -> bool {
        self.inner.valid()
    }

    /// The key at the current cursor position.
    pub fn key(&self) -> &[u8] {
        self.inner.key()
    }

    /// Resolves the value at the current cursor position.
    pub fn value(&self) -> Result<Bytes> {
        let state = self.engine.state.read();
        self.engine.get_value_by_position(&state, self.inner.value())
    }

    fn skip_to_next(&mut self) {
        if self.prefix.is_empty() {
            return;
        }
        while self.inner.valid() && !self.inner.key().starts_with(&self.prefix[..]) {
            self.inner.next();
        }
    }
}

fn acquire_directory_lock(dir: &Path) -> Result<File> {
    let path = dir.join("flock");
    let file = OpenOptions::new().create(true).write(true).open(&path)?;
    FileExt::try_lock_exclusive(&file).map_err(|_| {
        tracing::error!(dir = %dir.display(), "directory already locked");
        Error::DatabaseInUse
    })?;
    Ok(file)
}

fn is_dir_empty(dir: &Path) -> Result<bool> {
    Ok(std::fs::read_dir(dir)?.next().is_none())
}

pub(crate) fn directory_size(dir: &Path) -> Result<u64> {
    let mut total = 0u64;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}

/// Scans `dir_path` for `*.data` files, opens all of them, and returns
/// `(sorted file ids, older files, active file)`. Creates file id 0 as
/// the active file if the directory holds no data files yet.
fn load_data_files(options: &Options) -> Result<(Vec<u32>, HashMap<u32, DataFile>, DataFile)> {
    let mut file_ids = Vec::new();
    for entry in std::fs::read_dir(&options.dir_path)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.ends_with(DATA_FILE_NAME_SUFFIX) {
            file_ids.push(parse_data_file_id(name)?);
        }
    }
    file_ids.sort_unstable();

    if file_ids.is_empty() {
        let active = DataFile::open(&options.dir_path, 0)?;
        return Ok((vec![0], HashMap::new(), active));
    }

    let mut older_files = HashMap::new();
    let active_id = *file_ids.last().expect("checked non-empty");
    for &id in &file_ids {
        if id == active_id {
            continue;
        }
        let df = open_for_scan(options, id)?;
        older_files.insert(id, df);
    }
    let active = DataFile::open(&options.dir_path, active_id)?;
    Ok((file_ids, older_files, active))
}

#[cfg(feature = "mmap")]
fn open_for_scan(options: &Options, id: u32) -> Result<DataFile> {
    if options.mmap_startup {
        let io = std::sync::Arc::new(crate::io::MmapIoManager::open(data_file_name(
            &options.dir_path,
            id,
        ))?);
        DataFile::from_io(id, io)
    } else {
        DataFile::open(&options.dir_path, id)
    }
}

#[cfg(not(feature = "mmap"))]
fn open_for_scan(options: &Options, id: u32) -> Result<DataFile> {
    DataFile::open(&options.dir_path, id)
}

/// Reads the decimal `transaction_seq` previously persisted at
/// `close()` under the persistent B+-tree index.
pub(crate) fn load_seq_no(dir_path: &Path) -> Result<u64> {
    let file = DataFile::open_seq_no_file(dir_path)?;
    if file.write_off() == 0 {
        return Ok(0);
    }
    let Some(read) = file.read_log_record(0)? else {
        return Ok(0);
    };
    let text = std::str::from_utf8(&read.record.value).map_err(|_| Error::DataDirectoryCorrupted)?;
    text.parse::<u64>().map_err(|_| Error::DataDirectoryCorrupted)
}
