use crate::installer::{InstallOutcome, InstallPlan, PackageInstaller, PackageQuery};
use crate::ProviderError;
use phpool_schema::{OsFamily, PhpVersion, ProviderKind, Status, Username};
use phpool_store::Registry;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where a list of available versions came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogSource {
    /// Queried from the package repositories just now.
    Live,
    /// The built-in list. Approximate.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeCatalog {
    pub versions: Vec<PhpVersion>,
    pub source: CatalogSource,
}

impl RuntimeCatalog {
    pub fn fallback() -> Self {
        Self {
            versions: crate::catalog::fallback_versions(),
            source: CatalogSource::Fallback,
        }
    }

    pub fn contains(&self, version: PhpVersion) -> bool {
        self.versions.contains(&version)
    }
}

/// Everything a backend needs from its surroundings, fixed at construction.
#[derive(Clone)]
pub struct ProviderContext {
    pub registry: Registry,
    pub os_family: OsFamily,
    pub installer: Arc<dyn PackageInstaller>,
}

/// Capability contract every PHP provider satisfies.
///
/// Path and service-name methods are pure: the same inputs always give the same
/// output, and distinct usernames never share a socket or config path.
pub trait PhpProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Install `version` through the package installer and register it.
    fn install_runtime(&self, version: PhpVersion) -> Result<(), ProviderError>;

    /// Versions this provider has installed: registry first, live probe second.
    fn list_installed_runtimes(&self) -> Result<Vec<PhpVersion>, ProviderError>;

    fn list_available_runtimes(&self) -> Result<RuntimeCatalog, ProviderError>;

    fn socket_path(&self, username: &Username, version: PhpVersion) -> PathBuf;

    fn config_path(&self, username: &Username, version: PhpVersion) -> PathBuf;

    fn service_name(&self, version: PhpVersion) -> String;

    /// Whether install and listing work for this backend.
    fn is_implemented(&self) -> bool {
        true
    }

    /// Active registry rows attributed to this provider. Reads the store only.
    fn registered_runtimes(&self) -> Result<Vec<PhpVersion>, ProviderError> {
        Ok(Vec::new())
    }

    /// Version policy for pool creation: at least 7.4, and either in the
    /// built-in catalog or already registered through this provider. Never
    /// queries the package manager.
    fn check_version(&self, version: PhpVersion) -> Result<(), ProviderError> {
        if !version.is_supported() {
            return Err(ProviderError::InvalidVersion {
                provider: self.kind(),
                version,
                reason: format!(
                    "minimum supported version is {}",
                    phpool_schema::MIN_SUPPORTED
                ),
            });
        }
        if crate::catalog::FALLBACK_VERSIONS.contains(&version)
            || self.registered_runtimes()?.contains(&version)
        {
            return Ok(());
        }
        Err(ProviderError::InvalidVersion {
            provider: self.kind(),
            version,
            reason: format!(
                "not in the {} catalog and not installed",
                self.kind()
            ),
        })
    }
}

/// Install-time policy: [`PhpProvider::check_version`], widened by whatever
/// the live repository query offers.
pub(crate) fn check_installable(
    provider: &dyn PhpProvider,
    version: PhpVersion,
) -> Result<(), ProviderError> {
    match provider.check_version(version) {
        Err(ProviderError::InvalidVersion { .. }) if version.is_supported() => {
            if provider.list_available_runtimes()?.contains(version) {
                return Ok(());
            }
            provider.check_version(version)
        }
        other => other,
    }
}

/// Registered versions attributed to `kind` and still active.
pub(crate) fn registered_versions(
    registry: &Registry,
    kind: ProviderKind,
) -> Result<Vec<PhpVersion>, ProviderError> {
    Ok(registry
        .list_versions()?
        .into_iter()
        .filter(|r| r.provider == kind && r.status == Status::Active)
        .map(|r| r.version)
        .collect())
}

/// Installed versions for `kind`: active registry rows when there are any,
/// otherwise whatever the package database reports for `query`.
pub(crate) fn installed_or_probe(
    ctx: &ProviderContext,
    kind: ProviderKind,
    query: &PackageQuery,
    parse: fn(&str) -> Option<PhpVersion>,
) -> Result<Vec<PhpVersion>, ProviderError> {
    let registered = registered_versions(&ctx.registry, kind)?;
    if !registered.is_empty() {
        return Ok(registered);
    }
    let names = ctx.installer.installed_packages(query)?;
    debug!("{kind}: probed {} installed packages", names.len());
    Ok(crate::catalog::normalize(
        names.iter().filter_map(|n| parse(n)).collect(),
    ))
}

/// Live repository query, falling back to the built-in catalog when the query
/// fails or finds nothing.
pub(crate) fn live_or_fallback(
    ctx: &ProviderContext,
    kind: ProviderKind,
    query: &PackageQuery,
    parse: fn(&str) -> Option<PhpVersion>,
) -> RuntimeCatalog {
    match ctx.installer.available_packages(query) {
        Ok(names) => {
            let versions =
                crate::catalog::normalize(names.iter().filter_map(|n| parse(n)).collect());
            if versions.is_empty() {
                debug!("{kind}: repository query found no runtimes, using built-in catalog");
                RuntimeCatalog::fallback()
            } else {
                RuntimeCatalog {
                    versions,
                    source: CatalogSource::Live,
                }
            }
        }
        Err(e) => {
            warn!("{kind}: repository query failed ({e}), using built-in catalog");
            RuntimeCatalog::fallback()
        }
    }
}

/// Shared install flow: skip work if this provider already installed the
/// version, otherwise run the plan and register the result.
pub(crate) fn run_install(
    ctx: &ProviderContext,
    kind: ProviderKind,
    version: PhpVersion,
    plan: &InstallPlan,
) -> Result<(), ProviderError> {
    if let Some(row) = ctx.registry.get_version(version)? {
        if row.provider == kind && row.status == Status::Active {
            debug!("PHP {version} already installed via {kind}, skipping install plan");
            return Ok(());
        }
    }
    info!(
        "installing PHP {version} via {kind} ({} steps)",
        plan.steps.len()
    );
    match ctx.installer.install(plan) {
        InstallOutcome::Installed { message } => {
            debug!("install of PHP {version} via {kind} succeeded: {message}");
        }
        InstallOutcome::Failed { step, message } => {
            warn!("install of PHP {version} via {kind} failed at '{step}': {message}");
            return Err(ProviderError::Install {
                provider: kind,
                version,
                step,
                message,
            });
        }
    }
    let row = ctx.registry.ensure_version(version, kind, ctx.os_family)?;
    if row.provider != kind {
        info!(
            "PHP {version} was already registered by {}; keeping that attribution",
            row.provider
        );
    }
    Ok(())
}

/// Maps provider identifiers to backends.
#[derive(Clone)]
pub struct ProviderFactory {
    ctx: ProviderContext,
    default: ProviderKind,
}

impl ProviderFactory {
    pub fn new(ctx: ProviderContext, default: ProviderKind) -> Self {
        Self { ctx, default }
    }

    pub fn create(&self, kind: ProviderKind) -> Box<dyn PhpProvider> {
        match kind {
            ProviderKind::Remi => Box::new(crate::remi::RemiProvider::new(self.ctx.clone())),
            ProviderKind::LiteSpeed => {
                Box::new(crate::lsphp::LiteSpeedProvider::new(self.ctx.clone()))
            }
            ProviderKind::AltPhp => Box::new(crate::altphp::AltPhpProvider),
            ProviderKind::Docker => Box::new(crate::docker::DockerProvider),
        }
    }

    pub fn resolve(&self, id: &str) -> Result<Box<dyn PhpProvider>, ProviderError> {
        let kind: ProviderKind = id
            .parse()
            .map_err(|_| ProviderError::UnknownProvider(id.to_owned()))?;
        Ok(self.create(kind))
    }

    pub fn default_provider(&self) -> Box<dyn PhpProvider> {
        self.create(self.default)
    }

    pub fn default_kind(&self) -> ProviderKind {
        self.default
    }

    pub fn os_family(&self) -> OsFamily {
        self.ctx.os_family
    }
}
