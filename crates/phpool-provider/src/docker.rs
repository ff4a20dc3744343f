//! Container-hosted PHP-FPM. The host side of the socket and config mounts is
//! fixed per version; image management lives outside phpool.

use crate::backend::{PhpProvider, RuntimeCatalog};
use crate::ProviderError;
use phpool_schema::{PhpVersion, ProviderKind, Username};
use std::path::PathBuf;

#[derive(Debug, Default, Clone, Copy)]
pub struct DockerProvider;

impl DockerProvider {
    fn not_implemented(operation: &'static str) -> ProviderError {
        ProviderError::NotImplemented {
            provider: ProviderKind::Docker,
            operation,
        }
    }
}

impl PhpProvider for DockerProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Docker
    }

    fn install_runtime(&self, _version: PhpVersion) -> Result<(), ProviderError> {
        Err(Self::not_implemented("install_runtime"))
    }

    fn list_installed_runtimes(&self) -> Result<Vec<PhpVersion>, ProviderError> {
        Err(Self::not_implemented("list_installed_runtimes"))
    }

    fn list_available_runtimes(&self) -> Result<RuntimeCatalog, ProviderError> {
        Ok(RuntimeCatalog::fallback())
    }

    fn socket_path(&self, username: &Username, version: PhpVersion) -> PathBuf {
        PathBuf::from(format!("/var/run/docker/php-{version}-{username}.sock"))
    }

    fn config_path(&self, username: &Username, version: PhpVersion) -> PathBuf {
        PathBuf::from(format!("/etc/docker/php/{version}/{username}.conf"))
    }

    fn service_name(&self, version: PhpVersion) -> String {
        format!("php-{version}-fpm")
    }

    fn is_implemented(&self) -> bool {
        false
    }
}
