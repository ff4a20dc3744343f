use clap::Parser;
use phpool_core::{Collaborators, ManagerConfig, PoolManager};
use phpool_schema::ServiceConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "phpool-server", about = "HTTP API for phpool pool management")]
struct Cli {
    /// Path to the service configuration file (default: /etc/phpool/config.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on. Overrides `listen` from the configuration file.
    #[arg(long)]
    listen: Option<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("PHPOOL_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match ServiceConfig::resolve(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("config error: {e}");
            return ExitCode::from(2);
        }
    };
    let manager_config = ManagerConfig::from_service(&config);
    info!("store root: {}", manager_config.store_root.display());
    info!(
        "os family: {}, default provider: {}",
        manager_config.os_family, manager_config.default_provider
    );

    let manager = match PoolManager::new(
        manager_config,
        Collaborators::system(Duration::from_secs(config.reload_timeout_secs)),
    ) {
        Ok(m) => m,
        Err(e) => {
            error!("failed to open store: {e}");
            return ExitCode::FAILURE;
        }
    };

    let addr = cli.listen.unwrap_or(config.listen);
    info!("starting phpool-server on {addr}");
    match phpool_server::run_server(&manager, &addr) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
