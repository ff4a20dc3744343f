//! Shared types for phpool.
//!
//! This crate defines the schema layer: validated system identities
//! (`Username`, `GroupName`), PHP runtime versions (`PhpVersion`), the closed
//! set of providers (`ProviderKind`), per-pool PHP-FPM settings with partial
//! updates (`PoolSettings`, `SettingsOverrides`), and the service configuration
//! file (`ServiceConfig`).

pub mod config;
pub mod provider;
pub mod settings;
pub mod types;
pub mod version;

pub use config::{OsFamilySetting, ServiceConfig, DEFAULT_CONFIG_PATH};
pub use provider::{OsFamily, ProviderKind, Status};
pub use settings::{
    PoolSettings, ProcessManager, SettingsOverrides, Toggle, DEFAULT_SENDMAIL_PATH, SETTING_KEYS,
};
pub use types::{GroupName, Username, MAX_NAME_LEN};
pub use version::{PhpVersion, MIN_SUPPORTED};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid {kind} '{name}': {reason}")]
    InvalidName {
        kind: &'static str,
        name: String,
        reason: String,
    },
    #[error("invalid PHP version '{0}', expected major.minor (e.g. 8.2)")]
    InvalidVersion(String),
    #[error("unknown provider '{0}', expected one of: remi, lsphp, alt-php, docker")]
    UnknownProvider(String),
    #[error("unknown OS family '{0}', expected rhel or debian")]
    InvalidOsFamily(String),
    #[error("invalid setting {field}: {reason}")]
    InvalidSetting { field: String, reason: String },
    #[error("unknown setting '{0}'")]
    UnknownSetting(String),
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}
