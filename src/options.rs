//! User-facing configuration types.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Which [`crate::index::Index`] implementation an [`Options::open`]
/// call should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexType {
    /// In-memory ordered map, rebuilt from the log on every open.
    #[default]
    BTree,
    /// In-memory adaptive radix tree, rebuilt from the log on every
    /// open.
    Art,
    /// On-disk B+-tree; persists across restarts and skips log-based
    /// index reconstruction.
    BPlusTree,
}

/// Options controlling how a database directory is opened.
#[derive(Debug, Clone)]
pub struct Options {
    /// Root directory of the database. Created if absent.
    pub dir_path: PathBuf,
    /// Maximum bytes per data file before rotation.
    pub data_file_size: u64,
    /// Fsync every append.
    pub sync_writes: bool,
    /// Enables byte-interval sync when greater than zero; disabled at
    /// zero.
    pub bytes_per_sync: u64,
    /// Index implementation to use.
    pub index_type: IndexType,
    /// Use the memory-mapped read backend during the open-time scan.
    pub mmap_startup: bool,
    /// Fraction in `[0, 1]` of the directory size that must be
    /// reclaimable to permit `merge()`.
    pub merge_threshold: f64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            dir_path: PathBuf::from("bitterroot-data"),
            data_file_size: 256 * 1024 * 1024,
            sync_writes: false,
            bytes_per_sync: 0,
            index_type: IndexType::BTree,
            mmap_startup: false,
            merge_threshold: 0.5,
        }
    }
}

impl Options {
    /// Validates the option set, matching the checks the engine's
    /// `open` performs before touching the filesystem.
    pub fn check(&self) -> Result<()> {
        if self.dir_path.as_os_str().is_empty() {
            return Err(Error::InvalidOptions("dir_path must not be empty".into()));
        }
        if self.data_file_size == 0 {
            return Err(Error::InvalidOptions(
                "data_file_size must be greater than zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.merge_threshold) {
            return Err(Error::InvalidOptions(
                "merge_threshold must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }

    /// Loads options layered from defaults, an optional
    /// `bitterroot.toml` in the current directory, then
    /// `BITTERROOT_`-prefixed environment variables.
    ///
    /// Additive convenience built on `figment`; never required on the
    /// hot path. `dir_path` is taken as-is since `PathBuf` has no
    /// `serde` support needed beyond `String` conversion here.
    #[cfg(feature = "config")]
    pub fn from_config_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use figment::providers::{Env, Format, Serialized, Toml};
        use figment::Figment;
        use serde::{Deserialize, Serialize};

        #[derive(Serialize, Deserialize)]
        struct Raw {
            dir_path: String,
            data_file_size: u64,
            sync_writes: bool,
            bytes_per_sync: u64,
            mmap_startup: bool,
            merge_threshold: f64,
        }

        let defaults = Options::default();
        let raw: Raw = Figment::from(Serialized::defaults(Raw {
            dir_path: defaults.dir_path.to_string_lossy().into_owned(),
            data_file_size: defaults.data_file_size,
            sync_writes: defaults.sync_writes,
            bytes_per_sync: defaults.bytes_per_sync,
            mmap_startup: defaults.mmap_startup,
            merge_threshold: defaults.merge_threshold,
        }))
        .merge(Toml::file(path.as_ref()))
        .merge(Env::prefixed("BITTERROOT_"))
        .extract()?;

        Ok(Self {
            dir_path: PathBuf::from(raw.dir_path),
            data_file_size: raw.data_file_size,
            sync_writes: raw.sync_writes,
            bytes_per_sync: raw.bytes_per_sync,
            index_type: IndexType::BTree,
            mmap_startup: raw.mmap_startup,
            merge_threshold: raw.merge_threshold,
        })
    }
}

/// Options for an [`crate::engine::Iterator`].
#[derive(Debug, Clone, Default)]
pub struct IteratorOptions {
    /// Only keys starting with this byte sequence are yielded.
    pub prefix: Vec<u8>,
    /// Iterate in descending key order.
    pub reverse: bool,
}

/// Options for a [`crate::batch::WriteBatch`].
#[derive(Debug, Clone, Copy)]
pub struct WriteBatchOptions {
    /// Maximum number of pending writes a single batch may buffer.
    pub max_batch_size: u32,
    /// Fsync the active file once the batch commits.
    pub sync_writes: bool,
}

impl Default for WriteBatchOptions {
    fn default() -> Self {
        Self {
            max_batch_size: 10_000,
            sync_writes: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_pass_validation() {
        Options::default().check().unwrap();
    }

    #[test]
    fn zero_data_file_size_rejected() {
        let mut opts = Options::default();
        opts.data_file_size = 0;
        assert!(opts.check().is_err());
    }

    #[test]
    fn out_of_range_merge_threshold_rejected() {
        let mut opts = Options::default();
        opts.merge_threshold = 1.5;
        assert!(opts.check().is_err());
    }
}
