//! Per-server settings command handlers
//!
//! Manages the curated catalog selections (images, flavors, volume types)
//! offered for resale, stored as JSON blobs scoped by server ID.

use crate::config::CloudConfig;
use clap::Subcommand;
use strato_settings::SettingsStore;

#[derive(Subcommand)]
pub enum SettingsCommands {
    /// Set a setting to a JSON value
    Set {
        #[arg(long)]
        server_id: u64,
        key: String,
        /// JSON value (e.g. '["img-1","img-2"]' or '"plain string"')
        value: String,
    },

    /// Print one setting
    Get {
        #[arg(long)]
        server_id: u64,
        key: String,
    },

    /// Delete a setting
    Delete {
        #[arg(long)]
        server_id: u64,
        key: String,
    },

    /// List all settings for a server
    List {
        #[arg(long)]
        server_id: u64,
    },
}

pub fn run(config: &CloudConfig, command: SettingsCommands) -> anyhow::Result<()> {
    let mut store = SettingsStore::new(&config.state_dir);

    match command {
        SettingsCommands::Set {
            server_id,
            key,
            value,
        } => {
            let value: serde_json::Value = serde_json::from_str(&value)
                .map_err(|e| anyhow::anyhow!("value is not valid JSON: {e}"))?;
            store.set(server_id, &key, value);
            println!("Set {key} for server {server_id}");
        }

        SettingsCommands::Get { server_id, key } => match store.get(server_id, &key) {
            Some(value) => println!("{}", serde_json::to_string_pretty(value)?),
            None => anyhow::bail!("no setting '{key}' for server {server_id}"),
        },

        SettingsCommands::Delete { server_id, key } => {
            if store.delete(server_id, &key) {
                println!("Deleted {key} for server {server_id}");
            } else {
                anyhow::bail!("no setting '{key}' for server {server_id}");
            }
        }

        SettingsCommands::List { server_id } => {
            let entries = store.list(server_id);
            if entries.is_empty() {
                println!("No settings for server {server_id}");
            }
            for (key, record) in entries {
                println!("{key} (updated {})", record.updated_at.format("%Y-%m-%d %H:%M UTC"));
                println!("  {}", record.value);
            }
        }
    }

    Ok(())
}
