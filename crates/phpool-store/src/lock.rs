use crate::StoreError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Many holders at once. Every mutation holds the store lock this way.
    Shared,
    /// One holder. Journal recovery holds the store lock this way, and a
    /// mutation holds its user's pool lock this way.
    Exclusive,
}

/// Advisory fs2 lock on a file such as `<root>/store/.lock`, released on drop.
pub struct StoreLock {
    lock_file: File,
    mode: LockMode,
}

fn open_lock_file(lock_path: &Path) -> Result<File, StoreError> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(lock_path)?)
}

impl StoreLock {
    /// Block until the lock is held in `mode`.
    pub fn acquire(lock_path: &Path, mode: LockMode) -> Result<Self, StoreError> {
        let file = open_lock_file(lock_path)?;
        let res = match mode {
            LockMode::Shared => FileExt::lock_shared(&file),
            LockMode::Exclusive => FileExt::lock_exclusive(&file),
        };
        res.map_err(|e| StoreError::LockFailed(format!("{}: {e}", lock_path.display())))?;
        Ok(Self {
            lock_file: file,
            mode,
        })
    }

    /// Take the lock in `mode` without blocking; `None` if it is held elsewhere
    /// in a conflicting mode.
    pub fn try_acquire(lock_path: &Path, mode: LockMode) -> Result<Option<Self>, StoreError> {
        let file = open_lock_file(lock_path)?;
        let res = match mode {
            LockMode::Shared => FileExt::try_lock_shared(&file),
            LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
        };
        match res {
            Ok(()) => Ok(Some(Self {
                lock_file: file,
                mode,
            })),
            Err(_) => Ok(None),
        }
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.lock_file);
    }
}
