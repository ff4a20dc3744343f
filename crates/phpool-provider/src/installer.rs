//! Package installation seam.
//!
//! Providers describe what to run as an `InstallPlan`; a `PackageInstaller`
//! executes it and reports a structured `InstallOutcome`. Nothing in a plan is
//! run by the provider itself, so tests can drive the full install flow through
//! `mock::MockInstaller` without touching the host.

use crate::host::command_exists;
use crate::HostError;
use phpool_schema::{OsFamily, PhpVersion, ProviderKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// A program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_owned(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for a in &self.args {
            write!(f, " {a}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallStep {
    /// Short label reported when the step fails.
    pub label: String,
    pub command: CommandLine,
    /// Skip the step when this probe succeeds (e.g. the repo is already set up).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_if: Option<CommandLine>,
    /// A failed optional step is logged and the plan continues.
    pub required: bool,
}

impl InstallStep {
    pub fn required(label: &str, command: CommandLine) -> Self {
        Self {
            label: label.to_owned(),
            command,
            skip_if: None,
            required: true,
        }
    }

    pub fn optional(label: &str, command: CommandLine) -> Self {
        Self {
            required: false,
            ..Self::required(label, command)
        }
    }

    #[must_use]
    pub fn unless(mut self, probe: CommandLine) -> Self {
        self.skip_if = Some(probe);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallPlan {
    pub provider: ProviderKind,
    pub version: PhpVersion,
    pub os_family: OsFamily,
    pub packages: Vec<String>,
    pub steps: Vec<InstallStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum InstallOutcome {
    Installed { message: String },
    Failed { step: String, message: String },
}

impl InstallOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, InstallOutcome::Installed { .. })
    }
}

/// Which installed or installable packages to list. `pattern` is a glob over
/// package names where `*` matches any run of characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageQuery {
    pub os_family: OsFamily,
    pub pattern: String,
}

impl PackageQuery {
    pub fn new(os_family: OsFamily, pattern: &str) -> Self {
        Self {
            os_family,
            pattern: pattern.to_owned(),
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        glob_match(&self.pattern, name)
    }
}

pub trait PackageInstaller: Send + Sync {
    fn install(&self, plan: &InstallPlan) -> InstallOutcome;

    fn installed_packages(&self, query: &PackageQuery) -> Result<Vec<String>, HostError>;

    fn available_packages(&self, query: &PackageQuery) -> Result<Vec<String>, HostError>;
}

/// `*`-only glob match.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    let mut parts = pattern.split('*');
    let Some(first) = parts.next() else {
        return name.is_empty();
    };
    let Some(mut rest) = name.strip_prefix(first) else {
        return false;
    };
    let tail: Vec<&str> = parts.collect();
    let Some((last, middle)) = tail.split_last() else {
        // no '*' at all
        return rest.is_empty();
    };
    for part in middle {
        match rest.find(part) {
            Some(i) => rest = &rest[i + part.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}

const RPM_ARCHES: &[&str] = &["x86_64", "aarch64", "noarch", "i686", "ppc64le", "s390x"];

/// dnf prints `name.arch`; apt prints bare names.
fn strip_arch(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((base, arch)) if RPM_ARCHES.contains(&arch) => base,
        _ => name,
    }
}

/// Runs plans and package queries with the host package manager:
/// `dnf`/`yum`/`rpm` on RHEL, `apt-get`/`apt-cache`/`dpkg-query` on Debian.
#[derive(Debug, Default, Clone)]
pub struct SystemInstaller;

impl SystemInstaller {
    pub fn new() -> Self {
        Self
    }

    /// `dnf` when present, `yum` otherwise.
    pub fn rhel_package_manager() -> &'static str {
        if command_exists("dnf") {
            "dnf"
        } else {
            "yum"
        }
    }

    fn run(cmd: &CommandLine) -> Result<String, HostError> {
        debug!("running {cmd}");
        let output = cmd
            .to_command()
            .stdin(Stdio::null())
            .output()
            .map_err(|e| HostError::CommandFailed {
                command: cmd.to_string(),
                message: e.to_string(),
            })?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            Err(HostError::CommandFailed {
                command: cmd.to_string(),
                message: if stderr.is_empty() {
                    output.status.to_string()
                } else {
                    stderr
                },
            })
        }
    }

    fn probe(cmd: &CommandLine) -> bool {
        cmd.to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|s| s.success())
    }
}

impl PackageInstaller for SystemInstaller {
    fn install(&self, plan: &InstallPlan) -> InstallOutcome {
        let mut ran = 0usize;
        for step in &plan.steps {
            if step.skip_if.as_ref().is_some_and(Self::probe) {
                debug!("install step '{}' already satisfied", step.label);
                continue;
            }
            match Self::run(&step.command) {
                Ok(_) => ran += 1,
                Err(e) if step.required => {
                    return InstallOutcome::Failed {
                        step: step.label.clone(),
                        message: e.to_string(),
                    }
                }
                Err(e) => warn!("optional install step '{}' failed: {e}", step.label),
            }
        }
        InstallOutcome::Installed {
            message: format!(
                "PHP {} installed via {} ({ran} steps run)",
                plan.version, plan.provider
            ),
        }
    }

    fn installed_packages(&self, query: &PackageQuery) -> Result<Vec<String>, HostError> {
        let cmd = match query.os_family {
            OsFamily::Rhel => CommandLine::new("rpm", ["-qa", "--queryformat", "%{NAME}\\n"]),
            OsFamily::Debian => CommandLine::new(
                "dpkg-query",
                ["-W", "-f", "${db:Status-Abbrev} ${Package}\\n"],
            ),
        };
        let out = Self::run(&cmd)?;
        let names = out.lines().filter_map(|line| match query.os_family {
            OsFamily::Rhel => Some(line.trim()),
            // "ii  php8.2-fpm": only fully installed packages
            OsFamily::Debian => line.strip_prefix("ii ").map(str::trim),
        });
        Ok(names
            .filter(|n| query.matches(n))
            .map(str::to_owned)
            .collect())
    }

    fn available_packages(&self, query: &PackageQuery) -> Result<Vec<String>, HostError> {
        let out = match query.os_family {
            OsFamily::Rhel => Self::run(&CommandLine::new(
                Self::rhel_package_manager(),
                ["list", "--available", "--quiet", query.pattern.as_str()],
            ))?,
            OsFamily::Debian => {
                let prefix = query.pattern.split('*').next().unwrap_or_default();
                Self::run(&CommandLine::new("apt-cache", ["pkgnames", prefix]))?
            }
        };
        Ok(out
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .map(strip_arch)
            .filter(|n| query.matches(n))
            .map(str::to_owned)
            .collect())
    }
}
