use crate::lifecycle::{Phase, PhaseTracker};
use crate::render::{render_pool_config, PoolIdentity};
use crate::CoreError;
use phpool_provider::host::detect_os_family_in;
use phpool_provider::{
    PackageInstaller, PhpProvider, ProviderContext, ProviderFactory, RuntimeCatalog, Supervisor,
    SystemInstaller, SystemUsers, Systemctl, UserLookup,
};
use phpool_schema::{
    OsFamily, PhpVersion, PoolSettings, ProviderKind, ServiceConfig, SettingsOverrides, Status,
    Username,
};
use phpool_store::{
    LockMode, PoolRecord, Registry, RollbackStep, RuntimeVersion, StoreError, StoreLayout,
    StoreLock, WalOpKind, WriteAheadLog,
};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// PHP version used when a caller does not name one.
pub const DEFAULT_PHP_VERSION: &str = "8.2";

const CONFIG_FILE_MODE: u32 = 0o644;

/// Construction-time settings of a [`PoolManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    pub store_root: PathBuf,
    /// Provider paths are materialised under this prefix.
    pub host_root: PathBuf,
    pub os_family: OsFamily,
    pub default_provider: ProviderKind,
}

impl ManagerConfig {
    /// Resolve `auto` OS family by probing `host_root`.
    pub fn from_service(config: &ServiceConfig) -> Self {
        let os_family = config
            .os_family
            .pinned()
            .unwrap_or_else(|| detect_os_family_in(&config.host_root));
        Self {
            store_root: config.store_root.clone(),
            host_root: config.host_root.clone(),
            os_family,
            default_provider: config.default_provider,
        }
    }
}

/// The host seams a manager drives.
#[derive(Clone)]
pub struct Collaborators {
    pub users: Arc<dyn UserLookup>,
    pub supervisor: Arc<dyn Supervisor>,
    pub installer: Arc<dyn PackageInstaller>,
}

impl Collaborators {
    /// The real host: NSS user database, `systemctl`, the distribution package manager.
    pub fn system(reload_timeout: Duration) -> Self {
        Self {
            users: Arc::new(SystemUsers::new()),
            supervisor: Arc::new(Systemctl::new(reload_timeout)),
            installer: Arc::new(SystemInstaller::new()),
        }
    }
}

/// One provider as reported by [`PoolManager::providers`].
#[derive(Debug, Clone, Serialize)]
pub struct ProviderSummary {
    pub id: ProviderKind,
    pub name: &'static str,
    pub description: &'static str,
    pub implemented: bool,
    pub default: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolDrift {
    pub username: Username,
    pub config_path: PathBuf,
    pub issue: String,
}

/// Registry rows whose derived artifacts disagree with the filesystem.
#[derive(Debug, Clone, Serialize)]
pub struct DriftReport {
    pub checked_at: String,
    pub pools_checked: usize,
    pub drift: Vec<PoolDrift>,
}

impl DriftReport {
    pub fn is_clean(&self) -> bool {
        self.drift.is_empty()
    }
}

fn describe(kind: ProviderKind) -> (&'static str, &'static str) {
    match kind {
        ProviderKind::Remi => (
            "Remi Repository",
            "Remi repository for RHEL, ondrej PPA for Debian",
        ),
        ProviderKind::LiteSpeed => ("LiteSpeed PHP", "LiteSpeed Web Server PHP (lsphp)"),
        ProviderKind::AltPhp => ("Alternative PHP", "CloudLinux alt-php packages"),
        ProviderKind::Docker => ("Docker PHP", "Docker-hosted PHP-FPM containers"),
    }
}

/// Locks held by a pool mutation. Fields drop in declaration order.
struct PoolGuard {
    _pool: StoreLock,
    _store: StoreLock,
}

/// Central API for pool and runtime management.
///
/// Keeps the configuration file, the registry and the supervisor consistent:
/// each mutation either completes or is unwound before returning, and a
/// journal entry covers the window in which the process could die.
pub struct PoolManager {
    layout: StoreLayout,
    registry: Registry,
    wal: WriteAheadLog,
    factory: ProviderFactory,
    host_root: PathBuf,
    os_family: OsFamily,
    users: Arc<dyn UserLookup>,
    supervisor: Arc<dyn Supervisor>,
}

impl PoolManager {
    /// Open (initialising if needed) the store and roll back operations that
    /// an earlier process left unfinished.
    ///
    /// Recovery only runs when no other process holds the store lock.
    pub fn new(config: ManagerConfig, collaborators: Collaborators) -> Result<Self, CoreError> {
        let layout = StoreLayout::new(&config.store_root);
        layout.initialize()?;
        let wal = WriteAheadLog::new(&layout);
        wal.initialize()?;

        match StoreLock::try_acquire(&layout.lock_file(), LockMode::Exclusive) {
            Ok(Some(_lock)) => match wal.recover() {
                Ok(0) => {}
                Ok(n) => info!("rolled back {n} interrupted operation(s)"),
                Err(e) => warn!("journal recovery failed: {e}"),
            },
            Ok(None) => debug!("store lock held elsewhere; skipping journal recovery"),
            Err(e) => warn!("store lock check failed; skipping journal recovery: {e}"),
        }

        let registry = Registry::new(layout.clone());
        let ctx = ProviderContext {
            registry: registry.clone(),
            os_family: config.os_family,
            installer: collaborators.installer,
        };
        debug!(
            "pool manager: store={} host_root={} os={} default_provider={}",
            config.store_root.display(),
            config.host_root.display(),
            config.os_family,
            config.default_provider
        );
        Ok(Self {
            layout,
            registry,
            wal,
            factory: ProviderFactory::new(ctx, config.default_provider),
            host_root: config.host_root,
            os_family: config.os_family,
            users: collaborators.users,
            supervisor: collaborators.supervisor,
        })
    }

    pub fn os_family(&self) -> OsFamily {
        self.os_family
    }

    pub fn default_provider(&self) -> ProviderKind {
        self.factory.default_kind()
    }

    pub fn store_root(&self) -> &Path {
        self.layout.root()
    }

    /// Where a provider's absolute path lives on this host.
    pub fn host_path(&self, logical: &Path) -> PathBuf {
        match logical.strip_prefix("/") {
            Ok(rel) => self.host_root.join(rel),
            Err(_) => self.host_root.join(logical),
        }
    }

    fn mutation_lock(&self) -> Result<StoreLock, CoreError> {
        Ok(StoreLock::acquire(
            &self.layout.lock_file(),
            LockMode::Shared,
        )?)
    }

    /// The store lock plus an exclusive lock on `username`'s pool, held for
    /// the whole operation so two mutations of one pool never interleave.
    fn pool_lock(&self, username: &Username) -> Result<PoolGuard, CoreError> {
        let store = self.mutation_lock()?;
        let pool = StoreLock::acquire(
            &self.layout.pool_lock_file(username),
            LockMode::Exclusive,
        )?;
        Ok(PoolGuard {
            _pool: pool,
            _store: store,
        })
    }

    fn provider(&self, id: Option<&str>) -> Result<Box<dyn PhpProvider>, CoreError> {
        match id {
            Some(id) => Ok(self.factory.resolve(id)?),
            None => Ok(self.factory.default_provider()),
        }
    }

    // --- pools ---

    pub fn create_pool(
        &self,
        username: &str,
        version: &str,
        provider: Option<&str>,
    ) -> Result<PoolRecord, CoreError> {
        self.create_pool_with(username, version, provider, &SettingsOverrides::default())
    }

    /// Create a pool whose settings start from the defaults merged with
    /// `overrides`.
    pub fn create_pool_with(
        &self,
        username: &str,
        version: &str,
        provider: Option<&str>,
        overrides: &SettingsOverrides,
    ) -> Result<PoolRecord, CoreError> {
        let mut phase = PhaseTracker::new("create", username);
        let result = self.create_inner(&mut phase, username, version, provider, overrides);
        if result.is_err() {
            phase.fail();
        }
        result
    }

    #[allow(clippy::too_many_lines)]
    fn create_inner(
        &self,
        phase: &mut PhaseTracker,
        username: &str,
        version: &str,
        provider_id: Option<&str>,
        overrides: &SettingsOverrides,
    ) -> Result<PoolRecord, CoreError> {
        let username = Username::parse(username)?;
        let _lock = self.pool_lock(&username)?;

        let user = self
            .users
            .lookup(&username)?
            .ok_or_else(|| CoreError::UnknownUser(username.to_string()))?;
        let provider = match provider_id {
            Some(id) => self
                .factory
                .resolve(id)
                .map_err(|_| CoreError::InvalidProvider(id.to_owned()))?,
            None => self.factory.default_provider(),
        };
        let version = PhpVersion::parse(version).map_err(|e| CoreError::InvalidVersion {
            version: version.to_owned(),
            reason: e.to_string(),
        })?;
        provider.check_version(version)?;
        let settings = PoolSettings::default().merged(overrides);
        settings.validate()?;
        if self.registry.get_pool(&username)?.is_some() {
            return Err(CoreError::PoolAlreadyExists {
                username: username.to_string(),
                path: None,
            });
        }

        phase.advance(Phase::Resolving)?;
        let socket_path = provider.socket_path(&username, version);
        let config_path = provider.config_path(&username, version);
        let service = provider.service_name(version);
        let config_host = self.host_path(&config_path);
        let socket_host = self.host_path(&socket_path);
        if config_host.exists() {
            return Err(CoreError::PoolAlreadyExists {
                username: username.to_string(),
                path: Some(config_path),
            });
        }
        let rendered = render_pool_config(
            &PoolIdentity {
                username: &username,
                group: &user.primary_group,
                socket_path: &socket_path,
            },
            &settings,
        )?;

        phase.advance(Phase::Writing)?;
        for dir in [config_host.parent(), socket_host.parent()].into_iter().flatten() {
            fs::create_dir_all(dir).map_err(|e| CoreError::io(dir, e))?;
        }
        let op_id = self.wal.begin(WalOpKind::CreatePool, &username)?;
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(CONFIG_FILE_MODE)
            .open(&config_host)
        {
            Ok(f) => f,
            Err(e) => {
                self.discard_journal(&op_id);
                return Err(if e.kind() == ErrorKind::AlreadyExists {
                    CoreError::PoolAlreadyExists {
                        username: username.to_string(),
                        path: Some(config_path),
                    }
                } else {
                    CoreError::io(&config_host, e)
                });
            }
        };
        // Recorded only once the file is ours, so recovery never removes a
        // file another writer created.
        if let Err(e) = self
            .wal
            .add_rollback_step(&op_id, RollbackStep::RemoveFile(config_host.clone()))
        {
            drop(file);
            self.unwind_new_file(&config_host, &op_id);
            return Err(e.into());
        }
        if let Err(e) = file
            .write_all(rendered.as_bytes())
            .and_then(|()| file.sync_all())
        {
            drop(file);
            self.unwind_new_file(&config_host, &op_id);
            return Err(CoreError::io(&config_host, e));
        }
        drop(file);
        debug!("wrote {}", config_host.display());

        phase.advance(Phase::Persisting)?;
        let now = chrono::Utc::now().to_rfc3339();
        let record = PoolRecord {
            username: username.clone(),
            group: user.primary_group.clone(),
            php_version: version,
            provider: provider.kind(),
            socket_path,
            config_path,
            status: Status::Active,
            settings,
            created_at: now.clone(),
            updated_at: now,
            checksum: None,
        };
        let persisted = self
            .registry
            .ensure_version(version, provider.kind(), self.os_family)
            .and_then(|_| {
                self.wal.add_rollback_step(
                    &op_id,
                    RollbackStep::RemovePool {
                        username: username.to_string(),
                        created_at: record.created_at.clone(),
                    },
                )
            })
            .and_then(|()| self.registry.insert_pool(&record));
        let record = match persisted {
            Ok(r) => r,
            Err(e) => {
                warn!("registry write for pool {username} failed, rolling back: {e}");
                self.unwind_new_file(&config_host, &op_id);
                return Err(e.into());
            }
        };
        self.discard_journal(&op_id);

        phase.advance(Phase::Reloading)?;
        let reload = self.supervisor.reload(&service);
        phase.advance(Phase::Committed)?;
        info!(
            "created pool {username} (PHP {version} via {})",
            record.provider
        );
        reload.map_err(|source| {
            warn!("pool {username} created but reloading {service} failed: {source}");
            CoreError::Reload {
                username: username.to_string(),
                service,
                source,
            }
        })?;
        Ok(record)
    }

    fn unwind_new_file(&self, path: &Path, op_id: &str) {
        match fs::remove_file(path) {
            Ok(()) => debug!("rollback: removed {}", path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("rollback: failed to remove {}: {e}", path.display()),
        }
        self.discard_journal(op_id);
    }

    fn discard_journal(&self, op_id: &str) {
        if let Err(e) = self.wal.commit(op_id) {
            warn!("failed to close journal entry {op_id}: {e}");
        }
    }

    /// Remove a pool: its configuration file (a missing file is fine), a
    /// reload of its service, then its registry row.
    pub fn delete_pool(&self, username: &str) -> Result<PoolRecord, CoreError> {
        let mut phase = PhaseTracker::new("delete", username);
        let result = self.delete_inner(&mut phase, username);
        if result.is_err() {
            phase.fail();
        }
        result
    }

    fn delete_inner(
        &self,
        phase: &mut PhaseTracker,
        username: &str,
    ) -> Result<PoolRecord, CoreError> {
        let _lock = self.pool_lock(&Username::parse(username)?)?;
        let record = self
            .registry
            .get_pool(username)?
            .ok_or_else(|| CoreError::PoolNotFound(username.to_owned()))?;

        phase.advance(Phase::Resolving)?;
        let provider = self.factory.create(record.provider);
        let service = provider.service_name(record.php_version);
        let config_host = self.host_path(&record.config_path);

        phase.advance(Phase::Writing)?;
        match fs::remove_file(&config_host) {
            Ok(()) => debug!("removed {}", config_host.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(
                    "configuration for pool {username} was already gone: {}",
                    config_host.display()
                );
            }
            Err(e) => return Err(CoreError::io(&config_host, e)),
        }

        phase.advance(Phase::Reloading)?;
        let reload = self.supervisor.reload(&service);
        if let Err(e) = &reload {
            warn!("reloading {service} after removing pool {username} failed: {e}");
        }

        phase.advance(Phase::Persisting)?;
        self.registry.delete_pool(username)?;
        phase.advance(Phase::Committed)?;
        info!("deleted pool {username}");

        reload.map_err(|source| CoreError::Reload {
            username: username.to_owned(),
            service,
            source,
        })?;
        Ok(record)
    }

    /// Apply `overrides` on top of the pool's persisted settings, rewrite its
    /// configuration and reload. Empty overrides re-render the current settings.
    pub fn reconfigure_pool(
        &self,
        username: &str,
        overrides: &SettingsOverrides,
    ) -> Result<PoolRecord, CoreError> {
        let mut phase = PhaseTracker::new("reconfigure", username);
        let result = self.reconfigure_inner(&mut phase, username, overrides);
        if result.is_err() {
            phase.fail();
        }
        result
    }

    fn reconfigure_inner(
        &self,
        phase: &mut PhaseTracker,
        username: &str,
        overrides: &SettingsOverrides,
    ) -> Result<PoolRecord, CoreError> {
        let _lock = self.pool_lock(&Username::parse(username)?)?;
        let previous = self
            .registry
            .get_pool(username)?
            .ok_or_else(|| CoreError::PoolNotFound(username.to_owned()))?;
        let settings = previous.settings.merged(overrides);
        settings.validate()?;

        phase.advance(Phase::Resolving)?;
        let provider = self.factory.create(previous.provider);
        let service = provider.service_name(previous.php_version);
        let config_host = self.host_path(&previous.config_path);
        let rendered = render_pool_config(
            &PoolIdentity {
                username: &previous.username,
                group: &previous.group,
                socket_path: &previous.socket_path,
            },
            &settings,
        )?;

        phase.advance(Phase::Writing)?;
        let old_contents = match fs::read_to_string(&config_host) {
            Ok(c) => Some(c),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(CoreError::io(&config_host, e)),
        };
        let op_id = self.wal.begin(WalOpKind::ReconfigurePool, username)?;
        let restore = match &old_contents {
            Some(contents) => RollbackStep::RestoreFile {
                path: config_host.clone(),
                contents: contents.clone(),
            },
            None => RollbackStep::RemoveFile(config_host.clone()),
        };
        if let Err(e) = self.wal.add_rollback_step(&op_id, restore) {
            self.discard_journal(&op_id);
            return Err(e.into());
        }
        if let Some(dir) = config_host.parent() {
            if let Err(e) = fs::create_dir_all(dir) {
                self.discard_journal(&op_id);
                return Err(CoreError::io(dir, e));
            }
        }
        if let Err(e) =
            phpool_store::write_atomic(&config_host, rendered.as_bytes(), CONFIG_FILE_MODE)
        {
            self.discard_journal(&op_id);
            return Err(CoreError::io(&config_host, e));
        }

        phase.advance(Phase::Persisting)?;
        let updated = PoolRecord {
            settings,
            ..previous.clone()
        };
        let persisted = self
            .wal
            .add_rollback_step(&op_id, RollbackStep::RestorePool(Box::new(previous)))
            .and_then(|()| self.registry.update_pool(&updated));
        let record = match persisted {
            Ok(r) => r,
            Err(e @ StoreError::NoRowsAffected { .. }) => {
                warn!("pool {username} disappeared during reconfigure, removing its configuration");
                self.restore_file(&config_host, None);
                self.discard_journal(&op_id);
                return Err(e.into());
            }
            Err(e) => {
                warn!("registry update for pool {username} failed, restoring configuration: {e}");
                self.restore_file(&config_host, old_contents.as_deref());
                self.discard_journal(&op_id);
                return Err(e.into());
            }
        };
        self.discard_journal(&op_id);

        phase.advance(Phase::Reloading)?;
        let reload = self.supervisor.reload(&service);
        phase.advance(Phase::Committed)?;
        info!("reconfigured pool {username}");
        reload.map_err(|source| {
            warn!("pool {username} reconfigured but reloading {service} failed: {source}");
            CoreError::Reload {
                username: username.to_owned(),
                service,
                source,
            }
        })?;
        Ok(record)
    }

    fn restore_file(&self, path: &Path, contents: Option<&str>) {
        let result = match contents {
            Some(c) => phpool_store::write_atomic(path, c.as_bytes(), CONFIG_FILE_MODE),
            None => fs::remove_file(path),
        };
        if let Err(e) = result {
            warn!("rollback: failed to restore {}: {e}", path.display());
        }
    }

    pub fn list_pools(&self) -> Result<Vec<PoolRecord>, CoreError> {
        Ok(self.registry.list_pools()?)
    }

    pub fn get_pool(&self, username: &str) -> Result<PoolRecord, CoreError> {
        Username::parse(username)?;
        self.registry
            .get_pool(username)?
            .ok_or_else(|| CoreError::PoolNotFound(username.to_owned()))
    }

    /// Registry rows whose configuration file is missing. Never mutates.
    pub fn check_pools(&self) -> Result<DriftReport, CoreError> {
        let pools = self.registry.list_pools()?;
        let mut drift = Vec::new();
        for pool in &pools {
            let host = self.host_path(&pool.config_path);
            match fs::metadata(&host) {
                Ok(m) if m.is_file() => {}
                Ok(_) => drift.push(PoolDrift {
                    username: pool.username.clone(),
                    config_path: pool.config_path.clone(),
                    issue: "configuration path is not a regular file".to_owned(),
                }),
                Err(e) if e.kind() == ErrorKind::NotFound => drift.push(PoolDrift {
                    username: pool.username.clone(),
                    config_path: pool.config_path.clone(),
                    issue: "configuration file is missing".to_owned(),
                }),
                Err(e) => drift.push(PoolDrift {
                    username: pool.username.clone(),
                    config_path: pool.config_path.clone(),
                    issue: format!("cannot inspect configuration file: {e}"),
                }),
            }
        }
        Ok(DriftReport {
            checked_at: chrono::Utc::now().to_rfc3339(),
            pools_checked: pools.len(),
            drift,
        })
    }

    // --- runtimes ---

    /// Install `version` through a provider (the default one when `None`) and
    /// return its registry row.
    pub fn install_runtime(
        &self,
        provider: Option<&str>,
        version: &str,
    ) -> Result<RuntimeVersion, CoreError> {
        let provider = self.provider(provider)?;
        let parsed = PhpVersion::parse(version).map_err(|e| CoreError::InvalidVersion {
            version: version.to_owned(),
            reason: e.to_string(),
        })?;
        let _lock = self.mutation_lock()?;
        provider.install_runtime(parsed)?;
        let row = self
            .registry
            .get_version(parsed)?
            .ok_or_else(|| CoreError::InvalidVersion {
                version: version.to_owned(),
                reason: "install reported success but the version is not registered".to_owned(),
            })?;
        info!("PHP {parsed} available via {}", row.provider);
        Ok(row)
    }

    pub fn list_installed_runtimes(
        &self,
        provider: Option<&str>,
    ) -> Result<(ProviderKind, Vec<PhpVersion>), CoreError> {
        let provider = self.provider(provider)?;
        let versions = provider.list_installed_runtimes()?;
        Ok((provider.kind(), versions))
    }

    pub fn list_available_runtimes(
        &self,
        provider: Option<&str>,
    ) -> Result<(ProviderKind, RuntimeCatalog), CoreError> {
        let provider = self.provider(provider)?;
        let catalog = provider.list_available_runtimes()?;
        Ok((provider.kind(), catalog))
    }

    /// Every registered runtime, whichever provider installed it.
    pub fn list_runtime_versions(&self) -> Result<Vec<RuntimeVersion>, CoreError> {
        Ok(self.registry.list_versions()?)
    }

    pub fn providers(&self) -> Vec<ProviderSummary> {
        ProviderKind::ALL
            .into_iter()
            .map(|kind| {
                let (name, description) = describe(kind);
                ProviderSummary {
                    id: kind,
                    name,
                    description,
                    implemented: self.factory.create(kind).is_implemented(),
                    default: kind == self.factory.default_kind(),
                }
            })
            .collect()
    }
}
