//! LiteSpeed's bundled PHP (`lsphp`). Every version runs under the single
//! `lsws` service, so reloads always target it.

use crate::backend::{
    check_installable, installed_or_probe, live_or_fallback, registered_versions, run_install,
    PhpProvider, ProviderContext, RuntimeCatalog,
};
use crate::catalog::compact_between;
use crate::installer::{CommandLine, InstallPlan, InstallStep, PackageQuery, SystemInstaller};
use crate::ProviderError;
use phpool_schema::{OsFamily, PhpVersion, ProviderKind, Username};
use std::path::PathBuf;

const SERVICE: &str = "lsws";

pub struct LiteSpeedProvider {
    ctx: ProviderContext,
}

fn parse_package(name: &str) -> Option<PhpVersion> {
    compact_between(name, "lsphp", "-common")
}

impl LiteSpeedProvider {
    pub fn new(ctx: ProviderContext) -> Self {
        Self { ctx }
    }

    fn package_query(&self) -> PackageQuery {
        PackageQuery::new(self.ctx.os_family, "lsphp*-common")
    }

    pub fn install_plan(&self, version: PhpVersion) -> InstallPlan {
        let compact = version.compact();
        let packages = vec![
            format!("lsphp{compact}"),
            format!("lsphp{compact}-common"),
            format!("lsphp{compact}-process"),
        ];
        let mut install_args = vec!["install".to_owned(), "-y".to_owned()];
        install_args.extend(packages.iter().cloned());

        let steps = match self.ctx.os_family {
            OsFamily::Rhel => vec![InstallStep::required(
                "install packages",
                CommandLine::new(SystemInstaller::rhel_package_manager(), install_args),
            )],
            OsFamily::Debian => vec![
                InstallStep::optional(
                    "refresh package lists",
                    CommandLine::new("apt-get", ["update"]),
                ),
                InstallStep::required(
                    "install packages",
                    CommandLine::new("apt-get", install_args),
                ),
            ],
        };
        InstallPlan {
            provider: ProviderKind::LiteSpeed,
            version,
            os_family: self.ctx.os_family,
            packages,
            steps,
        }
    }
}

impl PhpProvider for LiteSpeedProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::LiteSpeed
    }

    fn install_runtime(&self, version: PhpVersion) -> Result<(), ProviderError> {
        check_installable(self, version)?;
        run_install(&self.ctx, self.kind(), version, &self.install_plan(version))
    }

    fn list_installed_runtimes(&self) -> Result<Vec<PhpVersion>, ProviderError> {
        installed_or_probe(&self.ctx, self.kind(), &self.package_query(), parse_package)
    }

    fn registered_runtimes(&self) -> Result<Vec<PhpVersion>, ProviderError> {
        registered_versions(&self.ctx.registry, self.kind())
    }

    fn list_available_runtimes(&self) -> Result<RuntimeCatalog, ProviderError> {
        Ok(live_or_fallback(
            &self.ctx,
            self.kind(),
            &self.package_query(),
            parse_package,
        ))
    }

    fn socket_path(&self, username: &Username, version: PhpVersion) -> PathBuf {
        PathBuf::from(format!("/tmp/lsphp{}-{username}.sock", version.compact()))
    }

    fn config_path(&self, username: &Username, version: PhpVersion) -> PathBuf {
        PathBuf::from(format!("/usr/local/lsws/conf/{username}-{version}.conf"))
    }

    fn service_name(&self, _version: PhpVersion) -> String {
        SERVICE.to_owned()
    }
}
