//! PHP providers and the host collaborators they drive.
//!
//! This crate implements the provider layer: the `PhpProvider` capability
//! contract with remi, lsphp, alt-php and docker backends, the
//! `ProviderFactory` that maps a `ProviderKind` to a backend, and the thin host
//! seams the rest of phpool consumes (`UserLookup`, `Supervisor`,
//! `PackageInstaller`, OS family detection). The `mock` module provides
//! deterministic doubles for all three seams.

pub mod altphp;
pub mod backend;
pub mod catalog;
pub mod docker;
pub mod host;
pub mod installer;
pub mod lsphp;
pub mod mock;
pub mod remi;
pub mod supervisor;

pub use backend::{CatalogSource, PhpProvider, ProviderContext, ProviderFactory, RuntimeCatalog};
pub use host::{detect_os_family, SystemUsers, UserInfo, UserLookup};
pub use installer::{
    CommandLine, InstallOutcome, InstallPlan, InstallStep, PackageInstaller, PackageQuery,
    SystemInstaller,
};
pub use supervisor::{Supervisor, Systemctl, DEFAULT_RELOAD_TIMEOUT};

use phpool_schema::{PhpVersion, ProviderKind};
use phpool_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{operation} is not implemented for provider '{provider}'")]
    NotImplemented {
        provider: ProviderKind,
        operation: &'static str,
    },
    #[error("unknown provider '{0}', expected one of: remi, lsphp, alt-php, docker")]
    UnknownProvider(String),
    #[error("PHP {version} is not available from provider '{provider}': {reason}")]
    InvalidVersion {
        provider: ProviderKind,
        version: PhpVersion,
        reason: String,
    },
    #[error("installing PHP {version} via '{provider}' failed at '{step}': {message}")]
    Install {
        provider: ProviderKind,
        version: PhpVersion,
        step: String,
        message: String,
    },
    #[error("registry error: {0}")]
    Registry(#[from] StoreError),
    #[error("host error: {0}")]
    Host(#[from] HostError),
}

/// Failures talking to the host: running commands, reading the user database.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("host I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },
    #[error("user database lookup for '{name}' failed: {reason}")]
    UserDatabase { name: String, reason: String },
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to run '{command}' for {service}: {source}")]
    Spawn {
        service: String,
        command: String,
        source: std::io::Error,
    },
    #[error("'{command}' exited with {status}: {stderr}")]
    Failed {
        service: String,
        command: String,
        status: String,
        stderr: String,
    },
    #[error("'{command}' did not finish within {secs}s and was killed")]
    Timeout {
        service: String,
        command: String,
        secs: u64,
    },
}
