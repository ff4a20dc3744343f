//! Distribution-repository PHP: Remi's repository on RHEL, the ondrej PPA on
//! Debian. Both install side by side per version, so every path carries it.

use crate::backend::{
    check_installable, installed_or_probe, live_or_fallback, registered_versions, run_install,
    PhpProvider, ProviderContext, RuntimeCatalog,
};
use crate::catalog::{compact_between, dotted_between};
use crate::installer::{CommandLine, InstallPlan, InstallStep, PackageQuery, SystemInstaller};
use crate::ProviderError;
use phpool_schema::{OsFamily, PhpVersion, ProviderKind, Username};
use std::path::PathBuf;

pub struct RemiProvider {
    ctx: ProviderContext,
}

impl RemiProvider {
    pub fn new(ctx: ProviderContext) -> Self {
        Self { ctx }
    }

    fn package_query(&self) -> PackageQuery {
        match self.ctx.os_family {
            OsFamily::Rhel => PackageQuery::new(OsFamily::Rhel, "php*-php-fpm"),
            OsFamily::Debian => PackageQuery::new(OsFamily::Debian, "php*-fpm"),
        }
    }

    fn package_parser(&self) -> fn(&str) -> Option<PhpVersion> {
        match self.ctx.os_family {
            OsFamily::Rhel => |n| compact_between(n, "php", "-php-fpm"),
            OsFamily::Debian => |n| dotted_between(n, "php", "-fpm"),
        }
    }

    pub fn install_plan(&self, version: PhpVersion) -> InstallPlan {
        match self.ctx.os_family {
            OsFamily::Rhel => rhel_plan(version, &self.service_name(version)),
            OsFamily::Debian => debian_plan(version, &self.service_name(version)),
        }
    }
}

/// Major release of the RHEL-compatible host, for picking EPEL/Remi release RPMs.
fn rhel_major() -> u32 {
    let release = std::fs::read_to_string("/etc/redhat-release").unwrap_or_default();
    release
        .split(|c: char| !c.is_ascii_digit())
        .find(|s| !s.is_empty())
        .and_then(|s| s.parse().ok())
        .unwrap_or(9)
}

fn rhel_plan(version: PhpVersion, service: &str) -> InstallPlan {
    let pm = SystemInstaller::rhel_package_manager();
    let el = rhel_major();
    let compact = version.compact();
    let repo = format!("remi-php{compact}");
    let packages = vec![
        format!("php{compact}-php-fpm"),
        format!("php{compact}-php-cli"),
        format!("php{compact}-php-common"),
    ];
    let mut install_args = vec!["install".to_owned(), "-y".to_owned()];
    install_args.extend(packages.iter().cloned());

    InstallPlan {
        provider: ProviderKind::Remi,
        version,
        os_family: OsFamily::Rhel,
        steps: vec![
            InstallStep::required(
                "epel repository",
                CommandLine::new(
                    pm,
                    [
                        "install".to_owned(),
                        "-y".to_owned(),
                        format!("https://dl.fedoraproject.org/pub/epel/epel-release-latest-{el}.noarch.rpm"),
                    ],
                ),
            )
            .unless(CommandLine::new("rpm", ["-q", "epel-release"])),
            InstallStep::required(
                "remi repository",
                CommandLine::new(
                    pm,
                    [
                        "install".to_owned(),
                        "-y".to_owned(),
                        format!("https://rpms.remirepo.net/enterprise/remi-release-{el}.rpm"),
                    ],
                ),
            )
            .unless(CommandLine::new("rpm", ["-q", "remi-release"])),
            InstallStep::optional(
                "enable version repository",
                CommandLine::new(pm, ["config-manager".to_owned(), "--enable".to_owned(), repo]),
            ),
            InstallStep::required("install packages", CommandLine::new(pm, install_args)),
            InstallStep::optional(
                "enable service",
                CommandLine::new("systemctl", ["enable", service]),
            ),
            InstallStep::required(
                "start service",
                CommandLine::new("systemctl", ["start", service]),
            ),
        ],
        packages,
    }
}

fn debian_plan(version: PhpVersion, service: &str) -> InstallPlan {
    let packages = vec![
        format!("php{version}"),
        format!("php{version}-fpm"),
        format!("php{version}-cli"),
        format!("php{version}-common"),
    ];
    let mut install_args = vec!["install".to_owned(), "-y".to_owned()];
    install_args.extend(packages.iter().cloned());

    InstallPlan {
        provider: ProviderKind::Remi,
        version,
        os_family: OsFamily::Debian,
        steps: vec![
            InstallStep::required("refresh package lists", CommandLine::new("apt-get", ["update"])),
            InstallStep::optional(
                "install prerequisites",
                CommandLine::new(
                    "apt-get",
                    [
                        "install",
                        "-y",
                        "software-properties-common",
                        "apt-transport-https",
                        "lsb-release",
                        "ca-certificates",
                        "gnupg2",
                    ],
                ),
            ),
            InstallStep::optional(
                "add ondrej/php repository",
                CommandLine::new("add-apt-repository", ["-y", "ppa:ondrej/php"]),
            ),
            InstallStep::optional(
                "refresh package lists",
                CommandLine::new("apt-get", ["update"]),
            ),
            InstallStep::required("install packages", CommandLine::new("apt-get", install_args)),
            InstallStep::optional(
                "enable service",
                CommandLine::new("systemctl", ["enable", service]),
            ),
            InstallStep::required(
                "start service",
                CommandLine::new("systemctl", ["start", service]),
            ),
        ],
        packages,
    }
}

impl PhpProvider for RemiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Remi
    }

    fn install_runtime(&self, version: PhpVersion) -> Result<(), ProviderError> {
        check_installable(self, version)?;
        run_install(&self.ctx, self.kind(), version, &self.install_plan(version))
    }

    fn list_installed_runtimes(&self) -> Result<Vec<PhpVersion>, ProviderError> {
        installed_or_probe(
            &self.ctx,
            self.kind(),
            &self.package_query(),
            self.package_parser(),
        )
    }

    fn registered_runtimes(&self) -> Result<Vec<PhpVersion>, ProviderError> {
        registered_versions(&self.ctx.registry, self.kind())
    }

    fn list_available_runtimes(&self) -> Result<RuntimeCatalog, ProviderError> {
        Ok(live_or_fallback(
            &self.ctx,
            self.kind(),
            &self.package_query(),
            self.package_parser(),
        ))
    }

    fn socket_path(&self, username: &Username, version: PhpVersion) -> PathBuf {
        match self.ctx.os_family {
            OsFamily::Rhel => PathBuf::from(format!(
                "/var/opt/remi/php{}/run/php-fpm/{username}.sock",
                version.compact()
            )),
            OsFamily::Debian => PathBuf::from(format!("/var/run/php/php{version}-{username}.sock")),
        }
    }

    fn config_path(&self, username: &Username, version: PhpVersion) -> PathBuf {
        match self.ctx.os_family {
            OsFamily::Rhel => PathBuf::from(format!(
                "/etc/opt/remi/php{}/php-fpm.d/{username}.conf",
                version.compact()
            )),
            OsFamily::Debian => PathBuf::from(format!("/etc/php/{version}/fpm/pool.d/{username}.conf")),
        }
    }

    fn service_name(&self, version: PhpVersion) -> String {
        match self.ctx.os_family {
            OsFamily::Rhel => format!("php{}-php-fpm", version.compact()),
            OsFamily::Debian => format!("php{version}-fpm"),
        }
    }
}
