//! The crate's single error type.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the engine, index, batch, and merge subsystems.
#[derive(Error, Debug)]
pub enum Error {
    /// Empty key supplied to `put`/`delete`.
    #[error("key is empty")]
    KeyIsEmpty,

    /// `get`/`delete` on an absent key.
    #[error("key not found")]
    KeyNotFound,

    /// The index references a file id with no corresponding data file.
    #[error("data file {0} not found")]
    DataFileNotFound(u32),

    /// A `get` observed a tombstone (a transient race, see concurrency
    /// model).
    #[error("data has been deleted")]
    DataHasBeenDeleted,

    /// A data file name failed to parse, or a CRC check failed during
    /// recovery.
    #[error("data directory corrupted")]
    DataDirectoryCorrupted,

    /// Reserved for pluggable index implementations that reject a
    /// mutation.
    #[error("index update failed")]
    IndexUpdateFailed,

    /// Batch buffer exceeded the configured maximum.
    #[error("exceeded max batch size")]
    ExceedMaxBatch,

    /// The directory lock is already held by another process.
    #[error("database is already in use")]
    DatabaseInUse,

    /// A merge is already in progress.
    #[error("merge already in progress")]
    MergeInProgress,

    /// Merge requested with insufficient reclaimable garbage.
    #[error("reclaimable ratio below merge threshold")]
    BelowMergeThreshold,

    /// Projected post-merge size exceeds free space (best-effort).
    #[error("insufficient disk space for merge")]
    DiskSpaceInsufficient,

    /// Batch construction rejected because sequence-number monotonicity
    /// cannot be recovered under the persistent B+-tree index.
    #[error("write batch unavailable: sequence number file is missing")]
    SeqNoFileMissing,

    /// An option failed validation.
    #[error("invalid option: {0}")]
    InvalidOptions(String),

    /// Failure surfaced by a pluggable index's own backing storage
    /// (currently only the on-disk B+-tree variant).
    #[error("index backend error: {0}")]
    IndexBackend(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Config-layer failure (only reachable via the optional `config`
    /// feature).
    #[cfg(feature = "config")]
    #[error("configuration error: {0}")]
    Config(#[from] figment::Error),
}
