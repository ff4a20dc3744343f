mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{exit_code_for, EXIT_VALIDATION_ERROR};
use phpool_core::{install_signal_handler, DEFAULT_PHP_VERSION};
use phpool_schema::ServiceConfig;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "phpool",
    version,
    about = "Per-user PHP-FPM pool management across PHP providers"
)]
struct Cli {
    /// Path to the service configuration file (default: /etc/phpool/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create a PHP-FPM pool for a system user.
    Create {
        /// System user that will own the pool.
        username: String,
        /// PHP version in major.minor form.
        #[arg(long, default_value = DEFAULT_PHP_VERSION)]
        php_version: String,
        /// Provider id (remi, lsphp, alt-php, docker). Defaults to the configured one.
        #[arg(long)]
        provider: Option<String>,
        /// Initial pool setting as key=value (repeatable).
        #[arg(long = "set", value_name = "KEY=VALUE")]
        settings: Vec<String>,
    },
    /// Delete a user's pool and reload PHP-FPM.
    Delete {
        username: String,
    },
    /// List all pools.
    List,
    /// Show one pool in detail.
    Show {
        username: String,
    },
    /// Change pool settings; unset settings keep their values.
    Configure {
        username: String,
        /// Setting as key=value (repeatable).
        #[arg(long = "set", value_name = "KEY=VALUE", required = true)]
        settings: Vec<String>,
    },
    /// Install a PHP runtime through a provider.
    Install {
        /// PHP version in major.minor form.
        version: String,
        #[arg(long)]
        provider: Option<String>,
    },
    /// List installed PHP runtimes.
    Versions {
        /// Ask this provider instead of reading the registry.
        #[arg(long)]
        provider: Option<String>,
    },
    /// List PHP runtimes a provider can install.
    Available {
        #[arg(long)]
        provider: Option<String>,
    },
    /// List providers and whether they are implemented.
    Providers,
    /// Run diagnostic checks on the configuration, store and pools.
    Doctor,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

impl Commands {
    fn is_mutation(&self) -> bool {
        matches!(
            self,
            Commands::Create { .. }
                | Commands::Delete { .. }
                | Commands::Configure { .. }
                | Commands::Install { .. }
        )
    }

    fn needs_config(&self) -> bool {
        !matches!(self, Commands::Completions { .. } | Commands::ManPages { .. })
    }
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("PHPOOL_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .init();

    if cli.command.is_mutation() {
        install_signal_handler();
    }

    let config = if cli.command.needs_config() {
        match ServiceConfig::resolve(cli.config.as_deref()) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("error: config error: {e}");
                return ExitCode::from(EXIT_VALIDATION_ERROR);
            }
        }
    } else {
        ServiceConfig::default()
    };
    let json = cli.json;

    let result = match cli.command {
        Commands::Create {
            username,
            php_version,
            provider,
            settings,
        } => commands::create::run(
            &config,
            &username,
            &php_version,
            provider.as_deref(),
            &settings,
            json,
        ),
        Commands::Delete { username } => commands::delete::run(&config, &username, json),
        Commands::List => commands::list::run(&config, json),
        Commands::Show { username } => commands::show::run(&config, &username, json),
        Commands::Configure { username, settings } => {
            commands::configure::run(&config, &username, &settings, json)
        }
        Commands::Install { version, provider } => {
            commands::install::run(&config, &version, provider.as_deref(), json)
        }
        Commands::Versions { provider } => {
            commands::versions::run(&config, provider.as_deref(), json)
        }
        Commands::Available { provider } => {
            commands::available::run(&config, provider.as_deref(), json)
        }
        Commands::Providers => commands::providers::run(&config, json),
        Commands::Doctor => commands::doctor::run(&config, cli.config.as_deref(), json),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(exit_code_for(&msg))
        }
    }
}
