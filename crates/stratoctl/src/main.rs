//! stratoctl — Strato cloud VM management CLI
//!
//! Provisions and manages VMs on an OpenStack-compatible cloud and manages
//! token-gated console shares: test-connection, catalog listings, VM
//! lifecycle, volume extension, share issuance/redemption/revocation.

mod catalog_cmd;
mod config;
mod settings_cmd;
mod share_cmd;
mod vm_cmd;

use clap::{Parser, Subcommand};
use config::CloudConfig;
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "stratoctl")]
#[command(about = "Strato cloud VM management CLI")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "/etc/strato/config.json", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authenticate and probe the cloud API
    TestConnection,

    /// Generate a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "/etc/strato/config.json")]
        output: PathBuf,
    },

    /// List remote catalog resources
    Catalog {
        #[command(subcommand)]
        command: catalog_cmd::CatalogCommands,
    },

    /// VM lifecycle operations
    Vm {
        #[command(subcommand)]
        command: vm_cmd::VmCommands,
    },

    /// Volume operations
    Volume {
        #[command(subcommand)]
        command: vm_cmd::VolumeCommands,
    },

    /// Console share management and public API actions
    Share {
        #[command(subcommand)]
        command: share_cmd::ShareCommands,
    },

    /// Curated per-server catalog settings
    Settings {
        #[command(subcommand)]
        command: settings_cmd::SettingsCommands,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::TestConnection => {
            let config = CloudConfig::load(&cli.config)?;
            vm_cmd::test_connection(&config).await?;
        }
        Commands::InitConfig { output } => {
            init_config(output)?;
        }
        Commands::Catalog { command } => {
            let config = CloudConfig::load(&cli.config)?;
            catalog_cmd::run(&config, command).await?;
        }
        Commands::Vm { command } => {
            let config = CloudConfig::load(&cli.config)?;
            vm_cmd::run(&config, command).await?;
        }
        Commands::Volume { command } => {
            let config = CloudConfig::load(&cli.config)?;
            vm_cmd::run_volume(&config, command).await?;
        }
        Commands::Share { command } => {
            let config = CloudConfig::load(&cli.config)?;
            share_cmd::run(&config, command).await?;
        }
        Commands::Settings { command } => {
            let config = CloudConfig::load(&cli.config)?;
            settings_cmd::run(&config, command)?;
        }
    }

    Ok(())
}

// ─── InitConfig ───────────────────────────────────────────────────────────────

fn init_config(output: PathBuf) -> anyhow::Result<()> {
    let config = CloudConfig::default();
    config.save(&output)?;

    println!("Config written to {}", output.display());
    println!();
    println!("Edit the file to add your credential ID and secret, then run:");
    println!("  stratoctl --config {} test-connection", output.display());

    Ok(())
}
