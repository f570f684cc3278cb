//! Shared domain types for Strato cloud provisioning.
//!
//! Defines the server/volume records, status vocabulary, console-share
//! error codes, and request types exchanged between the cloud client,
//! the lifecycle controller, and the console-share subsystem.

#![forbid(unsafe_code)]

use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

// ─── Server status ────────────────────────────────────────────────────────────

/// Compute server status as reported by the remote API.
///
/// Unrecognized values are preserved verbatim in `Unknown` rather than
/// failing deserialization; the remote side grows states faster than we do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ServerStatus {
    Build,
    Active,
    Shutoff,
    Suspended,
    Paused,
    Shelved,
    ShelvedOffloaded,
    Resized,
    VerifyResize,
    Reboot,
    HardReboot,
    Rescued,
    Migrating,
    Error,
    Deleted,
    SoftDeleted,
    Unknown(String),
}

impl ServerStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "BUILD" | "BUILDING" => Self::Build,
            "ACTIVE" => Self::Active,
            "SHUTOFF" | "STOPPED" => Self::Shutoff,
            "SUSPENDED" => Self::Suspended,
            "PAUSED" => Self::Paused,
            "SHELVED" => Self::Shelved,
            "SHELVED_OFFLOADED" => Self::ShelvedOffloaded,
            "RESIZED" => Self::Resized,
            "VERIFY_RESIZE" => Self::VerifyResize,
            "REBOOT" => Self::Reboot,
            "HARD_REBOOT" => Self::HardReboot,
            "RESCUED" => Self::Rescued,
            "MIGRATING" => Self::Migrating,
            "ERROR" => Self::Error,
            "DELETED" => Self::Deleted,
            "SOFT_DELETED" => Self::SoftDeleted,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Build => "BUILD",
            Self::Active => "ACTIVE",
            Self::Shutoff => "SHUTOFF",
            Self::Suspended => "SUSPENDED",
            Self::Paused => "PAUSED",
            Self::Shelved => "SHELVED",
            Self::ShelvedOffloaded => "SHELVED_OFFLOADED",
            Self::Resized => "RESIZED",
            Self::VerifyResize => "VERIFY_RESIZE",
            Self::Reboot => "REBOOT",
            Self::HardReboot => "HARD_REBOOT",
            Self::Rescued => "RESCUED",
            Self::Migrating => "MIGRATING",
            Self::Error => "ERROR",
            Self::Deleted => "DELETED",
            Self::SoftDeleted => "SOFT_DELETED",
            Self::Unknown(raw) => raw.as_str(),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// ERROR is terminal for whatever operation observed it.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }

    /// Human phrase used in user-facing "VM not running" messages.
    pub fn phrase(&self) -> String {
        match self {
            Self::Shutoff => "stopped".to_string(),
            Self::Suspended => "suspended".to_string(),
            Self::Shelved | Self::ShelvedOffloaded => "shelved".to_string(),
            Self::Error => "in an error state".to_string(),
            Self::Build => "still being created".to_string(),
            Self::Paused => "paused".to_string(),
            other => other.as_str().to_ascii_lowercase(),
        }
    }
}

impl From<String> for ServerStatus {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<ServerStatus> for String {
    fn from(status: ServerStatus) -> Self {
        status.as_str().to_string()
    }
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Server record ────────────────────────────────────────────────────────────

/// One address entry under a network name in the compute `addresses` map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressEntry {
    pub addr: String,
    #[serde(default = "default_ip_version")]
    pub version: u8,
}

fn default_ip_version() -> u8 {
    4
}

/// First IPv4/IPv6 address pair extracted from a server's address map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpPair {
    pub ipv4: Option<String>,
    pub ipv6: Option<String>,
}

/// Pick the first address of each family across all networks.
pub fn extract_ips(addresses: &HashMap<String, Vec<AddressEntry>>) -> IpPair {
    let mut ips = IpPair::default();
    for entries in addresses.values() {
        for entry in entries {
            match entry.version {
                4 if ips.ipv4.is_none() => ips.ipv4 = Some(entry.addr.clone()),
                6 if ips.ipv6.is_none() => ips.ipv6 = Some(entry.addr.clone()),
                _ => {}
            }
        }
    }
    ips
}

/// A compute server as seen by one query. Never cached beyond an operation;
/// every decision re-reads the remote state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerRecord {
    pub id: String,
    pub name: String,
    pub status: ServerStatus,
    pub flavor_id: String,
    pub image_id: Option<String>,
    pub addresses: HashMap<String, Vec<AddressEntry>>,
    pub fault_message: Option<String>,
}

impl ServerRecord {
    /// Build a record from the `server` object of a compute API response.
    pub fn from_api(server: &Value) -> Result<Self, String> {
        let id = server["id"]
            .as_str()
            .ok_or("server object missing id")?
            .to_string();
        let name = server["name"].as_str().unwrap_or_default().to_string();
        let status = ServerStatus::parse(server["status"].as_str().unwrap_or_default());
        let flavor_id = server["flavor"]["id"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        // Boot-from-volume servers report image as "" rather than an object.
        let image_id = server["image"]["id"]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(String::from);
        let addresses = server
            .get("addresses")
            .filter(|v| !v.is_null())
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| format!("bad addresses map: {e}"))?
            .unwrap_or_default();
        let fault_message = server["fault"]["message"].as_str().map(String::from);

        Ok(Self {
            id,
            name,
            status,
            flavor_id,
            image_id,
            addresses,
            fault_message,
        })
    }

    pub fn ips(&self) -> IpPair {
        extract_ips(&self.addresses)
    }
}

/// Result of a server-create call. Creation responses carry no status;
/// callers poll [`ServerRecord`] for that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedServer {
    pub id: String,
    pub admin_pass: Option<String>,
}

// ─── Catalog records ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlavorRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub vcpus: u32,
    #[serde(rename = "ram", default)]
    pub ram_mb: u64,
    #[serde(rename = "disk", default)]
    pub disk_gb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "min_disk", default)]
    pub min_disk_gb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "router:external", default)]
    pub external: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityGroupRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeTypeRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortRecord {
    pub id: String,
    #[serde(default)]
    pub device_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloatingIpRecord {
    pub id: String,
    pub floating_ip_address: String,
}

// ─── Volumes ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeRecord {
    pub id: String,
    pub size_gb: u64,
    pub status: String,
    pub attached_server_id: Option<String>,
}

impl VolumeRecord {
    /// Build a record from the `volume` object of a block-storage response.
    pub fn from_api(volume: &Value) -> Result<Self, String> {
        let id = volume["id"]
            .as_str()
            .ok_or("volume object missing id")?
            .to_string();
        let size_gb = volume["size"].as_u64().unwrap_or_default();
        let status = volume["status"].as_str().unwrap_or_default().to_string();
        let attached_server_id = volume["attachments"][0]["server_id"]
            .as_str()
            .map(String::from);

        Ok(Self {
            id,
            size_gb,
            status,
            attached_server_id,
        })
    }
}

/// One row of a server's `os-volume_attachments` listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeAttachment {
    pub volume_id: String,
    #[serde(default)]
    pub server_id: String,
    #[serde(default)]
    pub device: Option<String>,
}

// ─── Server creation request ─────────────────────────────────────────────────

/// Boot-from-volume block device specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockDevice {
    pub image_id: String,
    pub volume_size_gb: u32,
    pub volume_type: Option<String>,
    pub delete_on_termination: bool,
}

/// Parameters for creating a compute server.
///
/// Exactly one of `image_id` (ephemeral boot) or `block_device`
/// (boot-from-volume) must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateServerRequest {
    pub name: String,
    pub flavor_id: String,
    pub network_ids: Vec<String>,
    pub image_id: Option<String>,
    pub block_device: Option<BlockDevice>,
    pub security_groups: Vec<String>,
    pub admin_pass: Option<String>,
    pub metadata: HashMap<String, String>,
    pub key_name: Option<String>,
    /// Plain text; encoded for the wire by the client.
    pub user_data: Option<String>,
    pub availability_zone: Option<String>,
}

// ─── Server actions ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RebootKind {
    Soft,
    Hard,
}

/// A compute `POST /servers/{id}/action` operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerAction {
    Start,
    Stop,
    Reboot(RebootKind),
    ChangePassword(String),
    Shelve,
    Unshelve,
    Rebuild {
        image_id: String,
        admin_pass: Option<String>,
    },
    Resize {
        flavor_id: String,
    },
    ConfirmResize,
    RevertResize,
    Suspend,
    Resume,
}

impl ServerAction {
    /// The JSON body the compute action endpoint expects.
    pub fn body(&self) -> Value {
        match self {
            Self::Start => serde_json::json!({ "os-start": null }),
            Self::Stop => serde_json::json!({ "os-stop": null }),
            Self::Reboot(kind) => {
                let kind = match kind {
                    RebootKind::Soft => "SOFT",
                    RebootKind::Hard => "HARD",
                };
                serde_json::json!({ "reboot": { "type": kind } })
            }
            Self::ChangePassword(password) => {
                serde_json::json!({ "changePassword": { "adminPass": password } })
            }
            Self::Shelve => serde_json::json!({ "shelve": null }),
            Self::Unshelve => serde_json::json!({ "unshelve": null }),
            Self::Rebuild {
                image_id,
                admin_pass,
            } => {
                let mut rebuild = serde_json::json!({ "imageRef": image_id });
                if let Some(password) = admin_pass {
                    rebuild["adminPass"] = Value::String(password.clone());
                }
                serde_json::json!({ "rebuild": rebuild })
            }
            Self::Resize { flavor_id } => {
                serde_json::json!({ "resize": { "flavorRef": flavor_id } })
            }
            Self::ConfirmResize => serde_json::json!({ "confirmResize": null }),
            Self::RevertResize => serde_json::json!({ "revertResize": null }),
            Self::Suspend => serde_json::json!({ "suspend": null }),
            Self::Resume => serde_json::json!({ "resume": null }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "os-start",
            Self::Stop => "os-stop",
            Self::Reboot(_) => "reboot",
            Self::ChangePassword(_) => "changePassword",
            Self::Shelve => "shelve",
            Self::Unshelve => "unshelve",
            Self::Rebuild { .. } => "rebuild",
            Self::Resize { .. } => "resize",
            Self::ConfirmResize => "confirmResize",
            Self::RevertResize => "revertResize",
            Self::Suspend => "suspend",
            Self::Resume => "resume",
        }
    }
}

// ─── Console access ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleType {
    #[default]
    Novnc,
    Spice,
    Serial,
}

impl ConsoleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Novnc => "novnc",
            Self::Spice => "spice",
            Self::Serial => "serial",
        }
    }

    /// Protocol name for the versioned remote-console endpoint.
    pub fn protocol(&self) -> &'static str {
        match self {
            Self::Novnc => "vnc",
            Self::Spice => "spice",
            Self::Serial => "serial",
        }
    }
}

impl std::fmt::Display for ConsoleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConsoleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "novnc" => Ok(Self::Novnc),
            "spice" => Ok(Self::Spice),
            "serial" => Ok(Self::Serial),
            other => Err(format!("unknown console type: {other}")),
        }
    }
}

/// Console-share lifetime choices offered to share creators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpiryChoice {
    OneHour,
    SixHours,
    OneDay,
    SevenDays,
    ThirtyDays,
}

impl ExpiryChoice {
    pub fn duration(&self) -> Duration {
        match self {
            Self::OneHour => Duration::hours(1),
            Self::SixHours => Duration::hours(6),
            Self::OneDay => Duration::hours(24),
            Self::SevenDays => Duration::days(7),
            Self::ThirtyDays => Duration::days(30),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneHour => "1h",
            Self::SixHours => "6h",
            Self::OneDay => "24h",
            Self::SevenDays => "7d",
            Self::ThirtyDays => "30d",
        }
    }
}

impl std::str::FromStr for ExpiryChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1h" => Ok(Self::OneHour),
            "6h" => Ok(Self::SixHours),
            "24h" => Ok(Self::OneDay),
            "7d" => Ok(Self::SevenDays),
            "30d" => Ok(Self::ThirtyDays),
            other => Err(format!("unknown expiry choice: {other}")),
        }
    }
}

// ─── Console-share error codes ────────────────────────────────────────────────

/// Stable machine-readable error codes of the public console-share API.
///
/// Codes, HTTP statuses, and messages are a published contract; changing
/// any of them breaks deployed share pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShareErrorCode {
    TokenNotFound,
    TokenRevoked,
    TokenExpired,
    VmNotFound,
    VmNotActive,
    ServiceNotActive,
    ConsoleError,
    RateLimited,
    ApiError,
    ServerError,
}

impl ShareErrorCode {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::TokenNotFound => 404,
            Self::TokenRevoked => 403,
            Self::TokenExpired => 403,
            Self::VmNotFound => 404,
            Self::VmNotActive => 503,
            Self::ServiceNotActive => 404,
            Self::ConsoleError => 500,
            Self::RateLimited => 429,
            Self::ApiError => 500,
            Self::ServerError => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TokenNotFound => "TOKEN_NOT_FOUND",
            Self::TokenRevoked => "TOKEN_REVOKED",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::VmNotFound => "VM_NOT_FOUND",
            Self::VmNotActive => "VM_NOT_ACTIVE",
            Self::ServiceNotActive => "SERVICE_NOT_ACTIVE",
            Self::ConsoleError => "CONSOLE_ERROR",
            Self::RateLimited => "RATE_LIMITED",
            Self::ApiError => "API_ERROR",
            Self::ServerError => "SERVER_ERROR",
        }
    }

    pub fn default_message(&self) -> &'static str {
        match self {
            Self::TokenNotFound => {
                "This console share link does not exist or has been deleted."
            }
            Self::TokenRevoked => "This console share link has been revoked by the owner.",
            Self::TokenExpired => {
                "This console share link has expired. Please request a new link."
            }
            Self::VmNotFound => "The virtual machine no longer exists.",
            Self::VmNotActive => {
                "The virtual machine is not running. Console access requires the VM to be active."
            }
            Self::ServiceNotActive => "The associated service is not active.",
            Self::ConsoleError => {
                "Unable to connect to the VM console. Please try again later."
            }
            Self::RateLimited => "Too many requests. Please wait before trying again.",
            Self::ApiError => "Failed to connect to the cloud infrastructure.",
            Self::ServerError => "A server configuration error occurred.",
        }
    }
}

impl std::fmt::Display for ShareErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Validation ───────────────────────────────────────────────────────────────

/// A share token on the wire is exactly 64 hex characters.
pub fn validate_token_format(token: &str) -> bool {
    token.len() == 64 && token.chars().all(|c| c.is_ascii_hexdigit())
}
