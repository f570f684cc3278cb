//! Console-share command handlers

use crate::config::CloudConfig;
use clap::Subcommand;
use std::sync::Arc;
use strato_client::CloudClient;
use strato_share::{ApiResponse, ShareApi, ShareManager, ShareStore};

#[derive(Subcommand)]
pub enum ShareCommands {
    /// Create a share for an ACTIVE VM; prints the raw token exactly once
    Create {
        #[arg(long)]
        service_id: u64,
        #[arg(long)]
        vm_id: String,
        /// One of: 1h, 6h, 24h, 7d, 30d
        #[arg(long, default_value = "24h")]
        expiry: String,
        #[arg(long, default_value = "novnc")]
        console_type: String,
        /// Optional display name shown on the share page
        #[arg(long)]
        name: Option<String>,
        /// Creating user ID, for audit
        #[arg(long)]
        user_id: Option<u64>,
    },

    /// Public API: non-consuming validity check (prints JSON)
    Status {
        token: String,
        #[arg(long, default_value = "127.0.0.1")]
        ip: String,
    },

    /// Public API: consuming redemption returning a console URL (prints JSON)
    Access {
        token: String,
        #[arg(long, default_value = "127.0.0.1")]
        ip: String,
    },

    /// Revoke a share; revoking twice is an error
    Revoke {
        share_id: String,
        #[arg(long, default_value = "revoked by operator")]
        reason: String,
    },

    /// List shares for a service
    List {
        #[arg(long)]
        service_id: u64,
    },
}

fn manager_for(config: &CloudConfig) -> anyhow::Result<Arc<ShareManager>> {
    let client = Arc::new(CloudClient::new(config.credential())?);
    let store = ShareStore::new(&config.state_dir);
    Ok(Arc::new(ShareManager::new(
        client,
        store,
        config.share_page_url.clone(),
    )))
}

fn print_api_response(resp: &ApiResponse) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&resp.body)?);
    if resp.status != 200 {
        anyhow::bail!("request failed with HTTP {}", resp.status);
    }
    Ok(())
}

pub async fn run(config: &CloudConfig, command: ShareCommands) -> anyhow::Result<()> {
    let manager = manager_for(config)?;

    match command {
        ShareCommands::Create {
            service_id,
            vm_id,
            expiry,
            console_type,
            name,
            user_id,
        } => {
            let expiry = expiry.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            let console_type = console_type.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            let created = manager
                .create(service_id, &vm_id, expiry, console_type, name, user_id)
                .await?;

            println!("Share created: {}", created.share_id);
            println!("Expires at:    {}", created.expires_at);
            println!("Share URL:     {}", created.share_url);
            println!();
            println!("Token (shown once, store it now):");
            println!("  {}", created.raw_token);
        }

        ShareCommands::Status { token, ip } => {
            let api = ShareApi::new(manager);
            print_api_response(&api.handle_status(&token, &ip).await)?;
        }

        ShareCommands::Access { token, ip } => {
            let api = ShareApi::new(manager);
            print_api_response(&api.handle_access(&token, &ip).await)?;
        }

        ShareCommands::Revoke { share_id, reason } => {
            manager.revoke(&share_id, &reason)?;
            println!("Share {share_id} revoked");
        }

        ShareCommands::List { service_id } => {
            let shares = manager.shares_for_service(service_id);
            if shares.is_empty() {
                println!("No shares for service {service_id}");
                return Ok(());
            }
            println!(
                "{:<38} {:<10} {:<22} {:>6} {:>8}",
                "ID", "STATE", "EXPIRES", "USES", "TYPE"
            );
            for share in shares {
                let state = if share.revoked {
                    "revoked"
                } else if share.is_expired(chrono::Utc::now()) {
                    "expired"
                } else {
                    "active"
                };
                println!(
                    "{:<38} {:<10} {:<22} {:>6} {:>8}",
                    share.id,
                    state,
                    share.expires_at.format("%Y-%m-%d %H:%M UTC"),
                    share.use_count,
                    share.console_type
                );
            }
        }
    }

    Ok(())
}
