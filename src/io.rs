//! Pluggable file I/O backends: a buffered read/append backend used for
//! the active file and all writes, and an optional memory-mapped
//! read-only backend used to accelerate the startup scan.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;

/// A capability over a single on-disk file: positional reads, sequential
/// appends, sync, size. Implementations need not support every
/// operation — the mmap backend fails `append`/`sync`.
pub trait IoManager: Send + Sync {
    /// Reads into `buf` starting at `offset`, returning the number of
    /// bytes read.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize>;
    /// Appends `buf` to the end of the file, returning the number of
    /// bytes written.
    fn append(&self, buf: &[u8]) -> Result<usize>;
    /// Flushes any buffered writes to stable storage.
    fn sync(&self) -> Result<()>;
    /// Current file size in bytes.
    fn size(&self) -> Result<u64>;
}

/// The standard backend: buffered appends to an OS file opened
/// `create | append | read`.
pub struct StdIoManager {
    file: Mutex<File>,
}

impl StdIoManager {
    /// Opens (creating if absent) `path` for append+read access.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl IoManager for StdIoManager {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        use std::os::unix::fs::FileExt;
        let file = self.file.lock();
        let n = file.read_at(buf, offset)?;
        Ok(n)
    }

    fn append(&self, buf: &[u8]) -> Result<usize> {
        let mut file = self.file.lock();
        file.write_all(buf)?;
        Ok(buf.len())
    }

    fn sync(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.file.lock().metadata()?.len())
    }
}

/// A read-only memory-mapped backend, used only during the open-time
/// recovery scan. `append` and `sync` fail; the engine upgrades the
/// active file to [`StdIoManager`] before accepting writes.
#[cfg(feature = "mmap")]
pub struct MmapIoManager {
    map: memmap2::Mmap,
}

#[cfg(feature = "mmap")]
impl MmapIoManager {
    /// Maps `path` read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        // SAFETY: the mapped file is only read by this process during
        // recovery and is not concurrently truncated while mapped.
        let map = unsafe { memmap2::Mmap::map(&file)? };
        Ok(Self { map })
    }
}

#[cfg(feature = "mmap")]
impl IoManager for MmapIoManager {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let offset = offset as usize;
        if offset >= self.map.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.map.len() - offset);
        buf[..n].copy_from_slice(&self.map[offset..offset + n]);
        Ok(n)
    }

    fn append(&self, _buf: &[u8]) -> Result<usize> {
        Err(crate::error::Error::Io(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "mmap backend is read-only",
        )))
    }

    fn sync(&self) -> Result<()> {
        Err(crate::error::Error::Io(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "mmap backend is read-only",
        )))
    }

    fn size(&self) -> Result<u64> {
        Ok(self.map.len() as u64)
    }
}

/// Opens the standard backend for `path`, boxed behind [`IoManager`].
pub fn open_std(path: impl AsRef<Path>) -> Result<Arc<dyn IoManager>> {
    Ok(Arc::new(StdIoManager::open(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_then_read_at() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0.data");
        let io = StdIoManager::open(&path).unwrap();
        io.append(b"hello").unwrap();
        io.append(b"world").unwrap();
        assert_eq!(io.size().unwrap(), 10);
        let mut buf = [0u8; 5];
        io.read_at(&mut buf, 5).unwrap();
        assert_eq!(&buf, b"world");
    }
}
