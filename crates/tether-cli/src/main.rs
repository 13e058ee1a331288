//! Tether CLI
//!
//! Runs a configured source connector and inspects its committed positions.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

/// Tether - resumable source connectors
#[derive(Parser)]
#[command(name = "tether")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Where to load configuration from
    #[arg(long, value_enum, default_value_t = ConfigFormat::Yaml)]
    config: ConfigFormat,

    /// Configuration file path (defaults to ./config.yaml or ./config.json)
    #[arg(long)]
    conf_file: Option<PathBuf>,

    /// Log level filter, e.g. `info` or `tether_runtime=debug`
    #[arg(long)]
    loglevel: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Configuration source
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigFormat {
    /// `TETHER_*` environment variables
    Env,
    /// YAML file
    Yaml,
    /// JSON file
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new connector project
    Init {
        /// Directory to initialize (defaults to current directory)
        #[arg(default_value = ".")]
        path: String,

        /// Connector name (defaults to directory name)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Run the connector until end of data, Ctrl+C or failure
    Run,

    /// Show the last committed position
    Offsets {
        /// Connector identity (defaults to the configured name)
        #[arg(long)]
        connector: Option<String>,
    },

    /// Validate configuration without running
    Validate,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // the log format is part of the config, so load it before installing the subscriber
    let config = match cli.command {
        Commands::Init { .. } => None,
        _ => Some(commands::load_config(cli.config, cli.conf_file.as_deref())),
    };
    let json_logs = matches!(&config, Some(Ok(config)) if config.unify_logging);
    init_logging(cli.loglevel.as_deref(), cli.verbose, json_logs);

    let config = match config.transpose() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(config) = &config {
        tracing::debug!(?config, "Loaded configuration");
    }

    let result = match (cli.command, config) {
        (Commands::Init { path, name }, _) => commands::init::run(&path, name.as_deref())
            .await
            .map(|()| ExitCode::SUCCESS),
        (Commands::Run, Some(config)) => commands::run::run(config).await,
        (Commands::Offsets { connector }, Some(config)) => {
            commands::offsets::run(&config, connector.as_deref())
                .await
                .map(|()| ExitCode::SUCCESS)
        }
        (Commands::Validate, Some(config)) => {
            commands::validate::run(&config).map(|()| ExitCode::SUCCESS)
        }
        (_, None) => Err(anyhow::anyhow!("No configuration loaded")),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(loglevel: Option<&str>, verbose: bool, json: bool) {
    let filter = match (verbose, loglevel) {
        (true, _) => EnvFilter::new("debug"),
        (false, Some(level)) => EnvFilter::new(level),
        (false, None) => {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
        }
    };

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
