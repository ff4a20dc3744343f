//! CloudLinux alt-php. Paths and service names are known; installing and
//! listing are not supported yet.

use crate::backend::{PhpProvider, RuntimeCatalog};
use crate::ProviderError;
use phpool_schema::{PhpVersion, ProviderKind, Username};
use std::path::PathBuf;

#[derive(Debug, Default, Clone, Copy)]
pub struct AltPhpProvider;

impl PhpProvider for AltPhpProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::AltPhp
    }

    fn install_runtime(&self, _version: PhpVersion) -> Result<(), ProviderError> {
        Err(ProviderError::NotImplemented {
            provider: self.kind(),
            operation: "install_runtime",
        })
    }

    fn list_installed_runtimes(&self) -> Result<Vec<PhpVersion>, ProviderError> {
        Err(ProviderError::NotImplemented {
            provider: self.kind(),
            operation: "list_installed_runtimes",
        })
    }

    fn list_available_runtimes(&self) -> Result<RuntimeCatalog, ProviderError> {
        Ok(RuntimeCatalog::fallback())
    }

    fn socket_path(&self, username: &Username, version: PhpVersion) -> PathBuf {
        PathBuf::from(format!("/var/run/alt-php{}/{username}.sock", version.compact()))
    }

    fn config_path(&self, username: &Username, version: PhpVersion) -> PathBuf {
        PathBuf::from(format!(
            "/etc/opt/alt/php{}/php-fpm.d/{username}.conf",
            version.compact()
        ))
    }

    fn service_name(&self, version: PhpVersion) -> String {
        format!("alt-php{}-php-fpm", version.compact())
    }

    fn is_implemented(&self) -> bool {
        false
    }
}
