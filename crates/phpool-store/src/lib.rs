//! Persistent state for phpool.
//!
//! This crate provides the storage layer: the `Registry` of runtime versions
//! and pools (one checksummed JSON file per row, with no-clobber inserts),
//! `StoreLayout` for the directory structure and format marker,
//! `WriteAheadLog` for rolling back operations interrupted by a crash, and
//! `StoreLock` for coordinating processes that share a store.

pub mod layout;
pub mod lock;
pub mod registry;
pub mod wal;

pub use layout::{StoreLayout, STORE_FORMAT_VERSION};
pub use lock::{LockMode, StoreLock};
pub use registry::{PoolRecord, Registry, RuntimeVersion};
pub use wal::{RollbackStep, WalEntry, WalOpKind, WriteAheadLog};

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::NamedTempFile;
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` or `link()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = fs::File::open(dir)?;
    f.sync_all()
}

/// Atomically replace `path` with `contents`: temp file in the same directory,
/// fsync, rename, fsync the directory. Readers see the old or the new
/// contents, never a torn write.
pub fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> Result<(), std::io::Error> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file()
        .set_permissions(fs::Permissions::from_mode(mode))?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    fsync_dir(dir)
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("integrity check failed for {table} row '{key}': expected {expected}, got {actual}")]
    IntegrityFailure {
        table: &'static str,
        key: String,
        expected: String,
        actual: String,
    },
    #[error("{table} row '{key}' already exists")]
    Conflict { table: &'static str, key: String },
    #[error("{table} row '{key}' not found (0 rows affected)")]
    NoRowsAffected { table: &'static str, key: String },
    #[error("lock acquisition failed: {0}")]
    LockFailed(String),
    #[error("store format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
