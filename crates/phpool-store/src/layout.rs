use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Current store format version. Incremented on incompatible layout changes.
pub const STORE_FORMAT_VERSION: u32 = 1;
const VERSION_FILE: &str = "version";

/// Directory layout of a phpool store.
///
/// ```text
/// <root>/store/version
/// <root>/store/.lock
/// <root>/store/locks/<username>.lock
/// <root>/store/registry/versions/<version>
/// <root>/store/registry/pools/<username>
/// <root>/store/wal/<op_id>.json
/// ```
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreVersion {
    format_version: u32,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn store_dir(&self) -> PathBuf {
        self.root.join("store")
    }

    #[inline]
    pub fn versions_dir(&self) -> PathBuf {
        self.store_dir().join("registry").join("versions")
    }

    #[inline]
    pub fn pools_dir(&self) -> PathBuf {
        self.store_dir().join("registry").join("pools")
    }

    #[inline]
    pub fn wal_dir(&self) -> PathBuf {
        self.store_dir().join("wal")
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.store_dir().join(".lock")
    }

    #[inline]
    pub fn locks_dir(&self) -> PathBuf {
        self.store_dir().join("locks")
    }

    /// Lock serialising mutations of one user's pool. `username` must already
    /// be validated.
    pub fn pool_lock_file(&self, username: &str) -> PathBuf {
        self.locks_dir().join(format!("{username}.lock"))
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.versions_dir())?;
        fs::create_dir_all(self.locks_dir())?;
        fs::create_dir_all(self.pools_dir())?;
        fs::create_dir_all(self.wal_dir())?;

        let version_path = self.store_dir().join(VERSION_FILE);
        if version_path.exists() {
            self.verify_version()?;
        } else {
            let ver = StoreVersion {
                format_version: STORE_FORMAT_VERSION,
            };
            let content = serde_json::to_string_pretty(&ver)?;
            crate::write_atomic(&version_path, content.as_bytes(), 0o644)?;
        }

        Ok(())
    }

    pub fn verify_version(&self) -> Result<(), StoreError> {
        let version_path = self.store_dir().join(VERSION_FILE);
        let content = fs::read_to_string(&version_path)?;
        let ver: StoreVersion = serde_json::from_str(&content)?;

        if ver.format_version != STORE_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: STORE_FORMAT_VERSION,
                found: ver.format_version,
            });
        }
        Ok(())
    }
}
