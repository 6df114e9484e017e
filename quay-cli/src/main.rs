//! quay CLI - drive an in-process cluster through container close and
//! pipeline teardown.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use quay_core::observability::{TracingConfig, TracingGuard, init_tracing};

/// quay - container and pipeline lifecycle coordinator.
#[derive(Parser)]
#[command(name = "quay")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a mini cluster, write containers, close and tear them down
    Simulate {
        /// Path to a cluster config YAML file
        #[arg(short, long)]
        config: Option<String>,

        /// Number of containers to write
        #[arg(short = 'n', long, default_value = "3")]
        containers: usize,

        /// Number of containers to allocate but never write
        #[arg(long, default_value = "0")]
        unwritten: usize,

        /// Drop and delay commands with this seed
        #[arg(long)]
        chaos_seed: Option<u64>,
    },

    /// Cluster configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the default configuration as YAML
    Show,

    /// Validate a configuration file
    Validate {
        /// Path to the config YAML file
        file: String,
    },
}

fn setup_logging(verbosity: u8) -> Result<TracingGuard> {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    // QUAY_LOG_LEVEL and RUST_LOG win over -v
    init_tracing(TracingConfig::from_env_or(filter))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _tracing_guard = setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Simulate {
            config,
            containers,
            unwritten,
            chaos_seed,
        } => {
            let options = commands::simulate::SimulateOptions {
                config: config.as_deref(),
                containers,
                unwritten,
                chaos_seed,
            };
            commands::simulate::run(options).await
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config::show(),
            ConfigAction::Validate { file } => commands::config::validate(&file),
        },
    }
}
