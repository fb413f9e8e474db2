//! A single log file identified by a monotonically increasing file id.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::io::{open_std, IoManager};
use crate::record::{decode_record, LogRecord, LogRecordType, PositionalIndex, MAX_LOG_RECORD_HEADER_SIZE};

/// Suffix for data files, `{9-digit file id}{SUFFIX}`.
pub const DATA_FILE_NAME_SUFFIX: &str = ".data";
/// Name of the hint file produced by merge.
pub const HINT_FILE_NAME: &str = "hint-index";
/// Name of the merge-completion marker file.
pub const MERGE_FINISHED_FILE_NAME: &str = "merge-finished";
/// Name of the sequence-number sidecar written at `close()`.
pub const SEQ_NO_FILE_NAME: &str = "seq-no";

/// Builds the path for data file `file_id` inside `dir_path`.
#[must_use]
pub fn data_file_name(dir_path: impl AsRef<Path>, file_id: u32) -> PathBuf {
    dir_path.as_ref().join(format!("{file_id:09}{DATA_FILE_NAME_SUFFIX}"))
}

/// A record read from a [`DataFile`], along with its encoded size.
pub struct ReadLogRecord {
    /// The decoded record.
    pub record: LogRecord,
    /// Its encoded length.
    pub size: u64,
}

/// An append-only log file: tracks the current write offset and wraps
/// an [`IoManager`]. Cloning shares the same underlying file handle and
/// offset counter.
#[derive(Clone)]
pub struct DataFile {
    file_id: u32,
    write_off: Arc<AtomicU64>,
    io: Arc<dyn IoManager>,
}

impl DataFile {
    /// Opens (creating if absent) the data file for `file_id` inside
    /// `dir_path`, using the standard backend.
    pub fn open(dir_path: impl AsRef<Path>, file_id: u32) -> Result<Self> {
        let io = open_std(data_file_name(&dir_path, file_id))?;
        let write_off = io.size()?;
        Ok(Self {
            file_id,
            write_off: Arc::new(AtomicU64::new(write_off)),
            io,
        })
    }

    /// Wraps an already-opened [`IoManager`] as data file `file_id`,
    /// used by recovery to open the mmap read backend for the open-time
    /// scan (spec §4.2: the engine upgrades the active file to the
    /// standard backend before accepting writes).
    pub fn from_io(file_id: u32, io: Arc<dyn IoManager>) -> Result<Self> {
        let write_off = io.size()?;
        Ok(Self {
            file_id,
            write_off: Arc::new(AtomicU64::new(write_off)),
            io,
        })
    }

    fn open_named(dir_path: impl AsRef<Path>, name: &str) -> Result<Self> {
        let io = open_std(dir_path.as_ref().join(name))?;
        let write_off = io.size()?;
        Ok(Self {
            file_id: 0,
            write_off: Arc::new(AtomicU64::new(write_off)),
            io,
        })
    }

    /// Opens (or creates) the hint file produced by merge.
    pub fn open_hint_file(dir_path: impl AsRef<Path>) -> Result<Self> {
        Self::open_named(dir_path, HINT_FILE_NAME)
    }

    /// Opens (or creates) the merge-finished marker file.
    pub fn open_merge_finished_file(dir_path: impl AsRef<Path>) -> Result<Self> {
        Self::open_named(dir_path, MERGE_FINISHED_FILE_NAME)
    }

    /// Opens (or creates) the sequence-number sidecar file.
    pub fn open_seq_no_file(dir_path: impl AsRef<Path>) -> Result<Self> {
        Self::open_named(dir_path, SEQ_NO_FILE_NAME)
    }

    /// This file's id.
    #[must_use]
    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    /// Current write offset (== file size for a freshly opened file).
    #[must_use]
    pub fn write_off(&self) -> u64 {
        self.write_off.load(Ordering::Acquire)
    }

    /// Overrides the write offset; used by recovery to truncate the
    /// logical tail after the last successfully decoded record.
    pub fn set_write_off(&self, offset: u64) {
        self.write_off.store(offset, Ordering::Release);
    }

    /// Appends `buf`, advancing the write offset. Returns the offset the
    /// write began at.
    pub fn append(&self, buf: &[u8]) -> Result<u64> {
        let start = self.write_off.load(Ordering::Acquire);
        let n = self.io.append(buf)?;
        self.write_off.fetch_add(n as u64, Ordering::AcqRel);
        Ok(start)
    }

    /// Flushes buffered writes to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.io.sync()
    }

    /// Current on-disk size.
    pub fn size(&self) -> Result<u64> {
        self.io.size()
    }

    /// Reads and decodes the record at `offset`. Reads up to
    /// `MAX_LOG_RECORD_HEADER_SIZE` bytes (or the remaining file size,
    /// if shorter) to decode the header, then reads exactly
    /// `key_size + value_size` more bytes, verifying the CRC.
    ///
    /// Returns `Ok(None)` on clean end-of-stream.
    pub fn read_log_record(&self, offset: u64) -> Result<Option<ReadLogRecord>> {
        let file_size = self.io.size()?;
        if offset >= file_size {
            return Ok(None);
        }
        let header_cap = MAX_LOG_RECORD_HEADER_SIZE.min((file_size - offset) as usize);
        let mut header_buf = vec![0u8; header_cap];
        let n = self.io.read_at(&mut header_buf, offset)?;
        header_buf.truncate(n);

        let Some((header, header_len)) = crate::record::decode_header(&header_buf)? else {
            return Ok(None);
        };
        let key_size = header.key_size as usize;
        let value_size = header.value_size as usize;
        let total = header_len + key_size + value_size;
        if offset + total as u64 > file_size {
            return Ok(None);
        }

        let mut buf = vec![0u8; total];
        self.io.read_at(&mut buf, offset)?;
        match decode_record(&buf)? {
            Some((record, size)) => Ok(Some(ReadLogRecord {
                record,
                size: size as u64,
            })),
            None => Ok(None),
        }
    }

    /// Encodes `(key, encode_position(position))` as a Normal record and
    /// appends it to this file (used for hint files).
    pub fn write_hint_record(&self, key: Bytes, position: PositionalIndex) -> Result<()> {
        let record = LogRecord {
            key,
            value: Bytes::from(crate::record::encode_position(position)),
            record_type: LogRecordType::Normal,
        };
        let (buf, _) = record.encode();
        self.append(&buf)?;
        Ok(())
    }
}

/// Parses the file id out of a `{9-digit}.data` file name.
pub fn parse_data_file_id(file_name: &str) -> Result<u32> {
    file_name
        .strip_suffix(DATA_FILE_NAME_SUFFIX)
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or(Error::DataDirectoryCorrupted)
}
