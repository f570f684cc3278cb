//! CLI configuration

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use strato_client::Credential;

/// Configuration for the stratoctl CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    /// Cloud endpoint hostname or full URL (e.g. cloud.example.com or
    /// https://cmp.example.com/openstack/14)
    pub host: String,

    /// Application credential ID
    pub credential_id: String,

    /// Application credential secret
    pub credential_secret: String,

    /// Optional path prefix appended to the host (e.g. /openstack/14)
    #[serde(default)]
    pub path: Option<String>,

    /// Verify TLS certificates
    #[serde(default = "default_true")]
    pub tls_verify: bool,

    /// Base URL of the public console-share page
    #[serde(default = "default_share_page")]
    pub share_page_url: String,

    /// Directory for persistent state (shares, settings)
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

fn default_true() -> bool {
    true
}

fn default_share_page() -> String {
    "https://panel.example.com/console".to_string()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/strato")
}

impl CloudConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        serde_json::from_str(&data).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    pub fn credential(&self) -> Credential {
        Credential::new(
            &self.host,
            self.credential_id.clone(),
            self.credential_secret.clone(),
            self.path.as_deref(),
            self.tls_verify,
        )
    }
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            host: "cloud.example.com".to_string(),
            credential_id: String::new(),
            credential_secret: String::new(),
            path: None,
            tls_verify: true,
            share_page_url: default_share_page(),
            state_dir: default_state_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");

        let config = CloudConfig {
            host: "cloud.test".to_string(),
            credential_id: "cred-1".to_string(),
            credential_secret: "secret".to_string(),
            ..CloudConfig::default()
        };
        config.save(&path).expect("save");

        let loaded = CloudConfig::load(&path).expect("load");
        assert_eq!(loaded.host, "cloud.test");
        assert!(loaded.tls_verify, "tls_verify defaults on");
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"host":"cloud.test","credential_id":"c","credential_secret":"s"}"#,
        )
        .expect("write");

        let loaded = CloudConfig::load(&path).expect("load");
        assert!(loaded.tls_verify);
        assert_eq!(loaded.state_dir, PathBuf::from("/var/lib/strato"));
    }
}
