use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of PHP providers. Adding a backend means adding a variant
/// here and an arm in every exhaustive match over it.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ProviderKind {
    /// Remi repository on RHEL, ondrej PPA on Debian.
    #[default]
    #[serde(rename = "remi")]
    Remi,
    /// LiteSpeed-bundled PHP.
    #[serde(rename = "lsphp")]
    LiteSpeed,
    /// CloudLinux-style alternative PHP builds.
    #[serde(rename = "alt-php")]
    AltPhp,
    /// Container-hosted PHP.
    #[serde(rename = "docker")]
    Docker,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Remi,
        ProviderKind::LiteSpeed,
        ProviderKind::AltPhp,
        ProviderKind::Docker,
    ];

    pub fn id(self) -> &'static str {
        match self {
            ProviderKind::Remi => "remi",
            ProviderKind::LiteSpeed => "lsphp",
            ProviderKind::AltPhp => "alt-php",
            ProviderKind::Docker => "docker",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ProviderKind {
    type Err = SchemaError;
    fn from_str(s: &str) -> Result<Self, SchemaError> {
        ProviderKind::ALL
            .into_iter()
            .find(|k| k.id() == s)
            .ok_or_else(|| SchemaError::UnknownProvider(s.to_owned()))
    }
}

/// Host OS family. Drives package manager choice and the remi path conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Rhel,
    Debian,
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OsFamily::Rhel => write!(f, "rhel"),
            OsFamily::Debian => write!(f, "debian"),
        }
    }
}

impl FromStr for OsFamily {
    type Err = SchemaError;
    fn from_str(s: &str) -> Result<Self, SchemaError> {
        match s {
            "rhel" => Ok(OsFamily::Rhel),
            "debian" => Ok(OsFamily::Debian),
            other => Err(SchemaError::InvalidOsFamily(other.to_owned())),
        }
    }
}

/// Status of a registry row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Active,
    Inactive,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Active => write!(f, "active"),
            Status::Inactive => write!(f, "inactive"),
        }
    }
}
