//! VM lifecycle command handlers

use crate::config::CloudConfig;
use clap::Subcommand;
use strato_client::CloudClient;
use strato_lifecycle::{
    CreateOutcome, CreateVmSpec, LifecycleController, PowerAction, PowerOutcome, ResizeOutcome,
};
use strato_proto::{ConsoleType, RebootKind, ServerAction};
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Subcommand)]
pub enum VmCommands {
    /// Create a boot-from-volume VM and wait for it to come up
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        flavor: String,
        #[arg(long)]
        image: String,
        #[arg(long)]
        network: String,
        /// Root volume size in GB
        #[arg(long, default_value_t = 30)]
        volume_size: u32,
        /// Storage policy / volume type for the boot volume
        #[arg(long)]
        volume_type: Option<String>,
        #[arg(long)]
        security_group: Option<String>,
        #[arg(long)]
        admin_pass: Option<String>,
        #[arg(long)]
        key_name: Option<String>,
        #[arg(long)]
        availability_zone: Option<String>,
    },

    /// List all servers visible to the project
    List,

    /// Show a VM's live status and addresses
    Status { id: String },

    /// Start a VM and wait for ACTIVE
    Start { id: String },

    /// Stop a VM and wait for SHUTOFF
    Stop { id: String },

    /// Reboot a VM and wait for ACTIVE
    Reboot {
        id: String,
        /// Hard reboot instead of soft
        #[arg(long)]
        hard: bool,
    },

    /// Suspend a VM (no wait)
    Suspend { id: String },

    /// Resume a suspended VM (no wait)
    Resume { id: String },

    /// Resize a VM to a new flavor, confirming when required
    Resize {
        id: String,
        #[arg(long)]
        flavor: String,
    },

    /// Apply a package change: flavor and/or disk size
    Upgrade {
        id: String,
        #[arg(long)]
        flavor: Option<String>,
        #[arg(long)]
        volume_size: Option<u64>,
    },

    /// Delete a VM and clean up its ports
    Delete { id: String },

    /// Print a one-time console URL
    Console {
        id: String,
        #[arg(long, default_value = "novnc")]
        console_type: String,
    },

    /// Change the administrative password
    Password {
        id: String,
        #[arg(long)]
        password: String,
    },
}

#[derive(Subcommand)]
pub enum VolumeCommands {
    /// Extend a volume. Shrinks are refused locally.
    Extend {
        id: String,
        /// Requested size in GB
        #[arg(long)]
        size: u64,
    },
}

/// Cancel polling loops on Ctrl-C so a wait can be abandoned cleanly.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let handle = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling wait");
            handle.cancel();
        }
    });
    token
}

pub async fn test_connection(config: &CloudConfig) -> anyhow::Result<()> {
    let client = CloudClient::new(config.credential())?;
    let info = client.test_connection().await?;
    println!(
        "Connected successfully. Project ID: {}",
        info.project_id.as_deref().unwrap_or("-")
    );
    println!("Flavors visible: {}", info.flavor_count);
    Ok(())
}

pub async fn run(config: &CloudConfig, command: VmCommands) -> anyhow::Result<()> {
    let client = CloudClient::new(config.credential())?;
    let controller = LifecycleController::new(client);

    match command {
        VmCommands::Create {
            name,
            flavor,
            image,
            network,
            volume_size,
            volume_type,
            security_group,
            admin_pass,
            key_name,
            availability_zone,
        } => {
            let spec = CreateVmSpec {
                name,
                flavor_id: flavor,
                image_id: image,
                network_id: network,
                volume_size_gb: volume_size,
                volume_type,
                security_group,
                admin_pass,
                key_name,
                user_data: None,
                availability_zone,
            };
            match controller.create_vm(&spec, &cancel_on_ctrl_c()).await? {
                CreateOutcome::Provisioned {
                    server,
                    ips,
                    admin_pass,
                } => {
                    println!("VM {} is ACTIVE", server.id);
                    println!("  IPv4: {}", ips.ipv4.as_deref().unwrap_or("-"));
                    println!("  IPv6: {}", ips.ipv6.as_deref().unwrap_or("-"));
                    if let Some(password) = admin_pass {
                        println!("  Admin password: {password}");
                    }
                }
                CreateOutcome::StillProvisioning { server_id, .. } => {
                    println!("VM {server_id} is still provisioning; check again shortly");
                }
                CreateOutcome::Failed { server_id, message } => {
                    anyhow::bail!("VM {server_id} failed to provision: {message}");
                }
                CreateOutcome::Cancelled { server_id } => {
                    println!("Wait cancelled; VM {server_id} may still be provisioning");
                }
            }
        }

        VmCommands::List => {
            let servers = controller.client().list_servers().await?;
            println!("{:<38} {:<24} {:<16} {}", "ID", "NAME", "STATUS", "IPV4");
            for server in servers {
                let ips = server.ips();
                println!(
                    "{:<38} {:<24} {:<16} {}",
                    server.id,
                    server.name,
                    server.status,
                    ips.ipv4.as_deref().unwrap_or("-")
                );
            }
        }

        VmCommands::Status { id } => {
            let server = controller.client().get_server(&id).await?;
            let ips = server.ips();
            println!("ID:      {}", server.id);
            println!("Name:    {}", server.name);
            println!("Status:  {}", server.status);
            println!("Flavor:  {}", server.flavor_id);
            println!("IPv4:    {}", ips.ipv4.as_deref().unwrap_or("-"));
            println!("IPv6:    {}", ips.ipv6.as_deref().unwrap_or("-"));
        }

        VmCommands::Start { id } => {
            report_power(controller.power(&id, PowerAction::Start, &cancel_on_ctrl_c()).await?, "start")?;
        }
        VmCommands::Stop { id } => {
            report_power(controller.power(&id, PowerAction::Stop, &cancel_on_ctrl_c()).await?, "stop")?;
        }
        VmCommands::Reboot { id, hard } => {
            let kind = if hard { RebootKind::Hard } else { RebootKind::Soft };
            report_power(
                controller.power(&id, PowerAction::Reboot(kind), &cancel_on_ctrl_c()).await?,
                "reboot",
            )?;
        }

        VmCommands::Suspend { id } => {
            controller.suspend(&id).await?;
            println!("Suspend submitted for {id}");
        }
        VmCommands::Resume { id } => {
            controller.resume(&id).await?;
            println!("Resume submitted for {id}");
        }

        VmCommands::Resize { id, flavor } => {
            match controller.resize(&id, &flavor, &cancel_on_ctrl_c()).await? {
                ResizeOutcome::Resized => println!("Resized successfully"),
                ResizeOutcome::AlreadyComplete => println!("Resize completed"),
                ResizeOutcome::Failed { message } => {
                    anyhow::bail!("resize failed: {message}");
                }
                ResizeOutcome::ConfirmFailed { message } => {
                    anyhow::bail!("resize succeeded but confirmation failed: {message} - verify manually");
                }
                ResizeOutcome::TimedOut => {
                    println!("Resize timed out - check VM status manually");
                }
                ResizeOutcome::Cancelled => println!("Resize wait cancelled"),
            }
        }

        VmCommands::Upgrade {
            id,
            flavor,
            volume_size,
        } => {
            let report = controller
                .upgrade(&id, flavor.as_deref(), volume_size, &cancel_on_ctrl_c())
                .await?;
            for line in &report.results {
                println!("{line}");
            }
            for line in &report.errors {
                eprintln!("error: {line}");
            }
            if !report.is_success() {
                anyhow::bail!("upgrade completed with errors");
            }
        }

        VmCommands::Delete { id } => {
            controller.terminate(&id).await?;
            println!("VM {id} deleted");
        }

        VmCommands::Console { id, console_type } => {
            let console_type: ConsoleType = console_type
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?;
            let url = controller.client().console_url(&id, console_type).await?;
            println!("{url}");
        }

        VmCommands::Password { id, password } => {
            controller
                .client()
                .server_action(&id, &ServerAction::ChangePassword(password))
                .await?;
            println!("Password changed for {id}");
        }
    }

    Ok(())
}

pub async fn run_volume(config: &CloudConfig, command: VolumeCommands) -> anyhow::Result<()> {
    let client = CloudClient::new(config.credential())?;
    let controller = LifecycleController::new(client);

    match command {
        VolumeCommands::Extend { id, size } => {
            let change = controller.change_volume_size(&id, size).await?;
            println!("{}", change.describe());
        }
    }

    Ok(())
}

fn report_power(outcome: PowerOutcome, action: &str) -> anyhow::Result<()> {
    match outcome {
        PowerOutcome::Completed(server) => {
            println!("VM {} is now {}", server.id, server.status);
        }
        PowerOutcome::Failed { message } => {
            anyhow::bail!("{action} failed: {message}");
        }
        PowerOutcome::TimedOut { last_status } => {
            println!(
                "{action} submitted but confirmation timed out (last status: {})",
                last_status.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string())
            );
        }
        PowerOutcome::Cancelled => println!("{action} wait cancelled"),
    }
    Ok(())
}
