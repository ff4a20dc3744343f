use crate::{OsFamily, ProviderKind, SchemaError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/phpool/config.toml";

/// OS family selection: probe the host, or pin it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamilySetting {
    #[default]
    Auto,
    Rhel,
    Debian,
}

impl OsFamilySetting {
    /// The pinned family, or `None` when the host should be probed.
    pub fn pinned(self) -> Option<OsFamily> {
        match self {
            OsFamilySetting::Auto => None,
            OsFamilySetting::Rhel => Some(OsFamily::Rhel),
            OsFamilySetting::Debian => Some(OsFamily::Debian),
        }
    }
}

impl fmt::Display for OsFamilySetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OsFamilySetting::Auto => write!(f, "auto"),
            OsFamilySetting::Rhel => write!(f, "rhel"),
            OsFamilySetting::Debian => write!(f, "debian"),
        }
    }
}

/// Service-wide configuration shared by the CLI and the HTTP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ServiceConfig {
    /// Directory holding `store/` (registry, journal, lock).
    pub store_root: PathBuf,
    /// Prefix under which provider paths are materialised.
    pub host_root: PathBuf,
    pub os_family: OsFamilySetting,
    pub default_provider: ProviderKind,
    pub reload_timeout_secs: u64,
    pub listen: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            store_root: PathBuf::from("/var/lib/phpool"),
            host_root: PathBuf::from("/"),
            os_family: OsFamilySetting::Auto,
            default_provider: ProviderKind::Remi,
            reload_timeout_secs: 5,
            listen: "0.0.0.0:8080".to_owned(),
        }
    }
}

impl ServiceConfig {
    pub fn parse_str(input: &str) -> Result<Self, SchemaError> {
        let config: ServiceConfig = toml::from_str(input)?;
        if config.reload_timeout_secs == 0 {
            return Err(SchemaError::InvalidSetting {
                field: "reload_timeout_secs".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse_str(&content)
    }

    /// Load from an explicit path, else the system default path if it exists,
    /// else built-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, SchemaError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let default = Path::new(DEFAULT_CONFIG_PATH);
        if default.exists() {
            Self::load(default)
        } else {
            Ok(Self::default())
        }
    }
}
