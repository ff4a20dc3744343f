//! Pool lifecycle orchestration for phpool.
//!
//! This crate ties together the schema, the registry store and the provider
//! backends into the `PoolManager`: the central API for creating, deleting and
//! reconfiguring PHP-FPM pools and for installing and listing PHP runtimes. It
//! also provides the pool configuration renderer, the operation phase machine
//! and the Ctrl-C shutdown flag used by the front ends.

pub mod concurrency;
pub mod lifecycle;
pub mod manager;
pub mod render;

pub use concurrency::{install_signal_handler, shutdown_requested};
pub use lifecycle::{validate_transition, Phase, PhaseTracker};
pub use manager::{
    Collaborators, DriftReport, ManagerConfig, PoolDrift, PoolManager, ProviderSummary,
    DEFAULT_PHP_VERSION,
};
pub use render::{render_pool_config, render_template, PoolIdentity, POOL_TEMPLATE};

use phpool_provider::{HostError, ProviderError, SupervisorError};
use phpool_schema::{PhpVersion, ProviderKind, SchemaError};
use phpool_store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("user '{0}' does not exist")]
    UnknownUser(String),
    #[error("invalid provider '{0}', expected one of: remi, lsphp, alt-php, docker")]
    InvalidProvider(String),
    #[error("invalid PHP version '{version}': {reason}")]
    InvalidVersion { version: String, reason: String },
    #[error("pool for user '{username}' already exists{}", at_path(.path.as_ref()))]
    PoolAlreadyExists {
        username: String,
        path: Option<PathBuf>,
    },
    #[error("pool for user '{0}' not found")]
    PoolNotFound(String),
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("registry error: {0}")]
    Registry(#[from] StoreError),
    #[error("changes for '{username}' were saved but reloading {service} failed: {source}")]
    Reload {
        username: String,
        service: String,
        source: SupervisorError,
    },
    #[error("{operation} is not implemented for provider '{provider}'")]
    NotImplemented {
        provider: ProviderKind,
        operation: &'static str,
    },
    #[error("unknown provider '{0}', expected one of: remi, lsphp, alt-php, docker")]
    UnknownProvider(String),
    #[error("{0}")]
    Schema(#[from] SchemaError),
    #[error("installing PHP {version} via '{provider}' failed at '{step}': {message}")]
    Install {
        provider: ProviderKind,
        version: PhpVersion,
        step: String,
        message: String,
    },
    #[error("host error: {0}")]
    Host(#[from] HostError),
    #[error("template error: {0}")]
    Render(String),
    #[error("invalid phase transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

fn at_path(path: Option<&PathBuf>) -> String {
    path.map(|p| format!(" at {}", p.display()))
        .unwrap_or_default()
}

/// Coarse classification used by the front ends to pick exit codes and HTTP
/// statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad input, rejected before any side effect.
    Validation,
    NotFound,
    Conflict,
    NotImplemented,
    Store,
    /// The mutation is durable; only the supervisor reload failed.
    ReloadFailed,
    Internal,
}

impl CoreError {
    /// True only when the requested change was fully applied and persisted.
    pub fn is_committed(&self) -> bool {
        matches!(self, CoreError::Reload { .. })
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            CoreError::UnknownUser(_)
            | CoreError::InvalidProvider(_)
            | CoreError::InvalidVersion { .. }
            | CoreError::UnknownProvider(_)
            | CoreError::Schema(_) => ErrorClass::Validation,
            CoreError::PoolNotFound(_) => ErrorClass::NotFound,
            CoreError::PoolAlreadyExists { .. } => ErrorClass::Conflict,
            CoreError::NotImplemented { .. } => ErrorClass::NotImplemented,
            CoreError::Registry(_) => ErrorClass::Store,
            CoreError::Reload { .. } => ErrorClass::ReloadFailed,
            CoreError::Io { .. }
            | CoreError::Install { .. }
            | CoreError::Host(_)
            | CoreError::Render(_)
            | CoreError::InvalidTransition { .. } => ErrorClass::Internal,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CoreError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<ProviderError> for CoreError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::NotImplemented {
                provider,
                operation,
            } => CoreError::NotImplemented {
                provider,
                operation,
            },
            ProviderError::UnknownProvider(id) => CoreError::UnknownProvider(id),
            ProviderError::InvalidVersion {
                provider,
                version,
                reason,
            } => CoreError::InvalidVersion {
                version: version.to_string(),
                reason: format!("not available from {provider}: {reason}"),
            },
            ProviderError::Install {
                provider,
                version,
                step,
                message,
            } => CoreError::Install {
                provider,
                version,
                step,
                message,
            },
            ProviderError::Registry(e) => CoreError::Registry(e),
            ProviderError::Host(e) => CoreError::Host(e),
        }
    }
}
