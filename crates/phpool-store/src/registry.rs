//! The persistent registry: runtime versions and pools.
//!
//! Each row is one pretty-printed JSON file named by its key, carrying a blake3
//! checksum over its own content. Inserts link a fully written temp file into
//! place with no-clobber semantics, so two concurrent inserts of the same key
//! have exactly one winner and a reader never sees a partial row.

use crate::layout::StoreLayout;
use crate::{fsync_dir, StoreError};
use phpool_schema::{
    GroupName, OsFamily, PhpVersion, PoolSettings, ProviderKind, Status, Username,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

const VERSIONS: &str = "versions";
const POOLS: &str = "pools";

/// An installed PHP runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeVersion {
    pub version: PhpVersion,
    /// Provider that first installed this version.
    pub provider: ProviderKind,
    pub os_family: OsFamily,
    pub status: Status,
    pub installed_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl RuntimeVersion {
    pub fn new(version: PhpVersion, provider: ProviderKind, os_family: OsFamily) -> Self {
        Self {
            version,
            provider,
            os_family,
            status: Status::Active,
            installed_at: chrono::Utc::now().to_rfc3339(),
            checksum: None,
        }
    }
}

/// One user's PHP-FPM pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolRecord {
    pub username: Username,
    pub group: GroupName,
    pub php_version: PhpVersion,
    pub provider: ProviderKind,
    pub socket_path: PathBuf,
    pub config_path: PathBuf,
    pub status: Status,
    pub settings: PoolSettings,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

trait Row: Serialize + DeserializeOwned + Clone {
    const TABLE: &'static str;
    fn key(&self) -> String;
    fn checksum_mut(&mut self) -> &mut Option<String>;

    /// Checksum over the row content, excluding the checksum field itself.
    fn compute_checksum(&self) -> Result<String, StoreError> {
        let mut copy = self.clone();
        *copy.checksum_mut() = None;
        let json = serde_json::to_string_pretty(&copy)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }
}

impl Row for RuntimeVersion {
    const TABLE: &'static str = VERSIONS;
    fn key(&self) -> String {
        self.version.to_string()
    }
    fn checksum_mut(&mut self) -> &mut Option<String> {
        &mut self.checksum
    }
}

impl Row for PoolRecord {
    const TABLE: &'static str = POOLS;
    fn key(&self) -> String {
        self.username.to_string()
    }
    fn checksum_mut(&mut self) -> &mut Option<String> {
        &mut self.checksum
    }
}

/// Registry handle. Cheap to clone; holds no open files.
#[derive(Debug, Clone)]
pub struct Registry {
    layout: StoreLayout,
}

impl Registry {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    fn table_dir(&self, table: &str) -> PathBuf {
        match table {
            VERSIONS => self.layout.versions_dir(),
            _ => self.layout.pools_dir(),
        }
    }

    fn write_row<R: Row>(&self, row: &R, clobber: bool) -> Result<R, StoreError> {
        let dir = self.table_dir(R::TABLE);
        let key = row.key();
        let dest = dir.join(&key);

        let mut sealed = row.clone();
        let sum = sealed.compute_checksum()?;
        *sealed.checksum_mut() = Some(sum);
        let content = serde_json::to_string_pretty(&sealed)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        if clobber {
            tmp.persist(&dest).map_err(|e| StoreError::Io(e.error))?;
        } else {
            tmp.persist_noclobber(&dest).map_err(|e| {
                if e.error.kind() == ErrorKind::AlreadyExists {
                    StoreError::Conflict {
                        table: R::TABLE,
                        key: key.clone(),
                    }
                } else {
                    StoreError::Io(e.error)
                }
            })?;
        }
        fsync_dir(&dir)?;
        debug!("registry: wrote {}/{key}", R::TABLE);
        Ok(sealed)
    }

    fn read_row<R: Row>(&self, key: &str) -> Result<Option<R>, StoreError> {
        let path = self.table_dir(R::TABLE).join(key);
        if !path.exists() {
            return Ok(None);
        }
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            // deleted between the exists() check and the read
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut row: R = serde_json::from_str(&content)?;
        if let Some(expected) = row.checksum_mut().clone() {
            let actual = row.compute_checksum()?;
            if actual != expected {
                return Err(StoreError::IntegrityFailure {
                    table: R::TABLE,
                    key: key.to_owned(),
                    expected,
                    actual,
                });
            }
        }
        Ok(Some(row))
    }

    fn list_rows<R: Row>(&self) -> Result<Vec<R>, StoreError> {
        let dir = self.table_dir(R::TABLE);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut rows = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            // temp files from in-flight writes
            if name.starts_with('.') {
                continue;
            }
            match self.read_row::<R>(name) {
                Ok(Some(row)) => rows.push(row),
                Ok(None) => {}
                Err(e) => warn!("skipping corrupted {} row '{name}': {e}", R::TABLE),
            }
        }
        Ok(rows)
    }

    fn remove_row(&self, table: &'static str, key: &str) -> Result<(), StoreError> {
        let dir = self.table_dir(table);
        match fs::remove_file(dir.join(key)) {
            Ok(()) => {
                fsync_dir(&dir)?;
                debug!("registry: removed {table}/{key}");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NoRowsAffected {
                table,
                key: key.to_owned(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    // --- runtime versions ---

    pub fn get_version(&self, version: PhpVersion) -> Result<Option<RuntimeVersion>, StoreError> {
        self.read_row(&version.to_string())
    }

    /// All registered versions, oldest first.
    pub fn list_versions(&self) -> Result<Vec<RuntimeVersion>, StoreError> {
        let mut rows: Vec<RuntimeVersion> = self.list_rows()?;
        rows.sort_by_key(|r| r.version);
        Ok(rows)
    }

    /// Insert a new version row. Fails with `Conflict` if the version is
    /// already registered.
    pub fn insert_version(&self, row: &RuntimeVersion) -> Result<RuntimeVersion, StoreError> {
        self.write_row(row, false)
    }

    /// Register `version` as installed, keeping an existing row's provider
    /// attribution and re-activating it if it was inactive.
    pub fn ensure_version(
        &self,
        version: PhpVersion,
        provider: ProviderKind,
        os_family: OsFamily,
    ) -> Result<RuntimeVersion, StoreError> {
        if let Some(existing) = self.get_version(version)? {
            if existing.status == Status::Active {
                return Ok(existing);
            }
            return self.set_version_status(version, Status::Active);
        }
        match self.insert_version(&RuntimeVersion::new(version, provider, os_family)) {
            Ok(row) => Ok(row),
            // lost an insert race; the winner's row stands
            Err(StoreError::Conflict { .. }) => {
                self.get_version(version)?
                    .ok_or_else(|| StoreError::NoRowsAffected {
                        table: VERSIONS,
                        key: version.to_string(),
                    })
            }
            Err(e) => Err(e),
        }
    }

    pub fn set_version_status(
        &self,
        version: PhpVersion,
        status: Status,
    ) -> Result<RuntimeVersion, StoreError> {
        let mut row = self
            .get_version(version)?
            .ok_or_else(|| StoreError::NoRowsAffected {
                table: VERSIONS,
                key: version.to_string(),
            })?;
        row.status = status;
        self.write_row(&row, true)
    }

    // --- pools ---

    pub fn get_pool(&self, username: &str) -> Result<Option<PoolRecord>, StoreError> {
        self.read_row(username)
    }

    /// All pools, ordered by username.
    pub fn list_pools(&self) -> Result<Vec<PoolRecord>, StoreError> {
        let mut rows: Vec<PoolRecord> = self.list_rows()?;
        rows.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(rows)
    }

    /// Insert a pool row. At most one row per username: a second insert fails
    /// with `Conflict` and leaves the first untouched.
    pub fn insert_pool(&self, row: &PoolRecord) -> Result<PoolRecord, StoreError> {
        self.write_row(row, false)
    }

    /// Replace an existing pool row, stamping `updated_at`.
    pub fn update_pool(&self, row: &PoolRecord) -> Result<PoolRecord, StoreError> {
        if !self.pool_path(&row.username).exists() {
            return Err(StoreError::NoRowsAffected {
                table: POOLS,
                key: row.username.to_string(),
            });
        }
        let mut row = row.clone();
        row.updated_at = chrono::Utc::now().to_rfc3339();
        self.write_row(&row, true)
    }

    /// Write a pool row back exactly as given, inserting it if absent.
    /// Used by journal recovery to restore a prior row.
    pub fn restore_pool(&self, row: &PoolRecord) -> Result<PoolRecord, StoreError> {
        self.write_row(row, true)
    }

    /// Delete a pool row. Zero affected rows is an error.
    pub fn delete_pool(&self, username: &str) -> Result<(), StoreError> {
        self.remove_row(POOLS, username)
    }

    fn pool_path(&self, username: &str) -> PathBuf {
        self.layout.pools_dir().join(username)
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, Registry) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        (dir, Registry::new(layout))
    }

    fn v(s: &str) -> PhpVersion {
        PhpVersion::parse(s).unwrap()
    }

    fn sample_pool(user: &str) -> PoolRecord {
        let now = chrono::Utc::now().to_rfc3339();
        PoolRecord {
            username: Username::parse(user).unwrap(),
            group: GroupName::parse(user).unwrap(),
            php_version: v("8.2"),
            provider: ProviderKind::Remi,
            socket_path: PathBuf::from(format!("/var/opt/remi/php82/run/php-fpm/{user}.sock")),
            config_path: PathBuf::from(format!("/etc/opt/remi/php82/php-fpm.d/{user}.conf")),
            status: Status::Active,
            settings: PoolSettings::default(),
            created_at: now.clone(),
            updated_at: now,
            checksum: None,
        }
    }

    #[test]
    fn pool_insert_get_roundtrip() {
        let (_dir, reg) = setup();
        let stored = reg.insert_pool(&sample_pool("alice")).unwrap();
        assert!(stored.checksum.is_some());
        let got = reg.get_pool("alice").unwrap().unwrap();
        assert_eq!(got, stored);
        assert!(reg.get_pool("bob").unwrap().is_none());
    }

    #[test]
    fn pool_insert_is_no_clobber() {
        let (_dir, reg) = setup();
        reg.insert_pool(&sample_pool("alice")).unwrap();

        let mut other = sample_pool("alice");
        other.php_version = v("8.1");
        let err = reg.insert_pool(&other).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { table: "pools", .. }));
        assert_eq!(
            reg.get_pool("alice").unwrap().unwrap().php_version,
            v("8.2")
        );
    }

    #[test]
    fn concurrent_inserts_have_one_winner() {
        let (_dir, reg) = setup();
        let barrier = std::sync::Arc::new(std::sync::Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = reg.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    reg.insert_pool(&sample_pool("carol")).is_ok()
                })
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(wins, 1);
        assert_eq!(reg.list_pools().unwrap().len(), 1);
    }

    #[test]
    fn delete_reports_zero_rows() {
        let (_dir, reg) = setup();
        reg.insert_pool(&sample_pool("alice")).unwrap();
        reg.delete_pool("alice").unwrap();
        let err = reg.delete_pool("alice").unwrap_err();
        assert!(matches!(err, StoreError::NoRowsAffected { .. }));
    }

    #[test]
    fn update_requires_existing_row() {
        let (_dir, reg) = setup();
        assert!(matches!(
            reg.update_pool(&sample_pool("dave")),
            Err(StoreError::NoRowsAffected { .. })
        ));

        let stored = reg.insert_pool(&sample_pool("dave")).unwrap();
        let mut changed = stored.clone();
        changed.settings.memory_limit = "256M".to_owned();
        reg.update_pool(&changed).unwrap();
        let got = reg.get_pool("dave").unwrap().unwrap();
        assert_eq!(got.settings.memory_limit, "256M");
        assert_eq!(got.created_at, stored.created_at);
    }

    #[test]
    fn tampered_row_fails_integrity() {
        let (dir, reg) = setup();
        reg.insert_pool(&sample_pool("alice")).unwrap();
        let path = dir.path().join("store/registry/pools/alice");
        let content = fs::read_to_string(&path).unwrap();
        fs::write(&path, content.replace("128M", "999M")).unwrap();
        assert!(matches!(
            reg.get_pool("alice"),
            Err(StoreError::IntegrityFailure { .. })
        ));
        // list skips the corrupt row instead of failing
        assert!(reg.list_pools().unwrap().is_empty());
    }

    #[test]
    fn list_pools_sorted() {
        let (_dir, reg) = setup();
        for user in ["zed", "alice", "mallory"] {
            reg.insert_pool(&sample_pool(user)).unwrap();
        }
        let names: Vec<String> = reg
            .list_pools()
            .unwrap()
            .into_iter()
            .map(|p| p.username.into_inner())
            .collect();
        assert_eq!(names, ["alice", "mallory", "zed"]);
    }

    #[test]
    fn ensure_version_keeps_first_provider() {
        let (_dir, reg) = setup();
        let first = reg
            .ensure_version(v("8.2"), ProviderKind::Remi, OsFamily::Rhel)
            .unwrap();
        assert_eq!(first.provider, ProviderKind::Remi);

        let second = reg
            .ensure_version(v("8.2"), ProviderKind::LiteSpeed, OsFamily::Rhel)
            .unwrap();
        assert_eq!(second.provider, ProviderKind::Remi);
        assert_eq!(reg.list_versions().unwrap().len(), 1);
    }

    #[test]
    fn ensure_version_reactivates() {
        let (_dir, reg) = setup();
        reg.ensure_version(v("8.1"), ProviderKind::Remi, OsFamily::Debian)
            .unwrap();
        reg.set_version_status(v("8.1"), Status::Inactive).unwrap();
        let row = reg
            .ensure_version(v("8.1"), ProviderKind::LiteSpeed, OsFamily::Debian)
            .unwrap();
        assert_eq!(row.status, Status::Active);
        assert_eq!(row.provider, ProviderKind::Remi);
    }

    #[test]
    fn list_versions_numeric_order() {
        let (_dir, reg) = setup();
        for s in ["8.3", "7.4", "8.10", "8.2"] {
            reg.ensure_version(v(s), ProviderKind::Remi, OsFamily::Rhel)
                .unwrap();
        }
        let got: Vec<String> = reg
            .list_versions()
            .unwrap()
            .iter()
            .map(|r| r.version.to_string())
            .collect();
        assert_eq!(got, ["7.4", "8.2", "8.3", "8.10"]);
    }

    #[test]
    fn broken_table_surfaces_io_error() {
        let (dir, reg) = setup();
        let pools = dir.path().join("store/registry/pools");
        fs::remove_dir_all(&pools).unwrap();
        fs::write(&pools, "not a directory").unwrap();
        assert!(matches!(
            reg.insert_pool(&sample_pool("erin")),
            Err(StoreError::Io(_))
        ));
    }
}
