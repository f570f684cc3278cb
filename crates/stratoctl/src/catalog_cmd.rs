//! Catalog listing commands

use crate::config::CloudConfig;
use clap::Subcommand;
use strato_client::CloudClient;

#[derive(Subcommand)]
pub enum CatalogCommands {
    /// List compute flavors
    Flavors,
    /// List active images
    Images,
    /// List tenant networks
    Networks,
    /// List external (floating-IP pool) networks
    ExternalNetworks,
    /// List security groups
    SecurityGroups,
    /// List volume types
    VolumeTypes,
}

pub async fn run(config: &CloudConfig, command: CatalogCommands) -> anyhow::Result<()> {
    let client = CloudClient::new(config.credential())?;

    match command {
        CatalogCommands::Flavors => {
            let flavors = client.list_flavors().await?;
            println!("{:<38} {:<20} {:>6} {:>8} {:>8}", "ID", "NAME", "VCPUS", "RAM MB", "DISK GB");
            for flavor in flavors {
                println!(
                    "{:<38} {:<20} {:>6} {:>8} {:>8}",
                    flavor.id, flavor.name, flavor.vcpus, flavor.ram_mb, flavor.disk_gb
                );
            }
        }
        CatalogCommands::Images => {
            let images = client.list_images().await?;
            println!("{:<38} {:<30} {:>8}", "ID", "NAME", "MIN GB");
            for image in images {
                println!("{:<38} {:<30} {:>8}", image.id, image.name, image.min_disk_gb);
            }
        }
        CatalogCommands::Networks => {
            for network in client.list_networks().await? {
                println!("{:<38} {}", network.id, network.name);
            }
        }
        CatalogCommands::ExternalNetworks => {
            for network in client.list_external_networks().await? {
                println!("{:<38} {}", network.id, network.name);
            }
        }
        CatalogCommands::SecurityGroups => {
            for group in client.list_security_groups().await? {
                println!("{:<38} {:<20} {}", group.id, group.name, group.description);
            }
        }
        CatalogCommands::VolumeTypes => {
            let types = client.list_volume_types().await?;
            if types.is_empty() {
                println!("No volume types (block-storage service may be absent)");
            }
            for volume_type in types {
                println!("{:<38} {}", volume_type.id, volume_type.name);
            }
        }
    }

    Ok(())
}
