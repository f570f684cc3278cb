//! The cloud API façade: one typed operation per remote resource/action.
//!
//! Every operation authenticates, resolves its service endpoint from the
//! catalog, issues a single gateway request, and returns a typed result.
//! Ordinary remote failures come back as [`ApiError`] values; nothing here
//! panics for a misbehaving remote.

use crate::{ApiError, AuthSession, Credential};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::Value;
use strato_gateway::{GatewayConfig, GatewayError, GatewayResponse, HttpGateway, Method};
use strato_proto::{
    ConsoleType, CreateServerRequest, CreatedServer, FlavorRecord, FloatingIpRecord, ImageRecord,
    NetworkRecord, PortRecord, SecurityGroupRecord, ServerAction, ServerRecord, VolumeAttachment,
    VolumeRecord, VolumeTypeRecord,
};
use tracing::{debug, info};

/// Server creation pins this compute micro-version so the storage-policy
/// hint inside `block_device_mapping_v2` is honored by the remote service.
const NOVA_MICROVERSION: (&str, &str) = ("X-OpenStack-Nova-API-Version", "2.67");

/// Result of a connectivity probe.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub project_id: Option<String>,
    pub flavor_count: usize,
}

/// Append an API version segment only when the catalog URL lacks it.
/// Deployments differ on whether endpoints already carry their version.
fn with_version(base: &str, segment: &str) -> String {
    if base.contains(segment) {
        base.to_string()
    } else {
        format!("{base}{segment}")
    }
}

pub struct CloudClient {
    session: AuthSession,
    gateway: HttpGateway,
}

impl CloudClient {
    pub fn new(credential: Credential) -> Result<Self, GatewayError> {
        let gateway = HttpGateway::new(&GatewayConfig {
            tls_verify: credential.tls_verify(),
            ..GatewayConfig::default()
        })?;
        let session = AuthSession::new(credential, gateway.clone());
        Ok(Self { session, gateway })
    }

    pub fn session(&self) -> &AuthSession {
        &self.session
    }

    // ── Plumbing ─────────────────────────────────────────────────────────────

    /// Authenticate and resolve one service: `(bearer token, endpoint base)`.
    async fn scoped(&self, service: &str) -> Result<(String, String), ApiError> {
        let token = self.session.authenticate().await?;
        let base = token.catalog.resolve(service)?.to_string();
        Ok((token.value, base))
    }

    async fn network_scoped(&self) -> Result<(String, String), ApiError> {
        let (token, base) = self.scoped("network").await?;
        Ok((token, with_version(&base, "/v2.0")))
    }

    async fn image_scoped(&self) -> Result<(String, String), ApiError> {
        let (token, base) = self.scoped("image").await?;
        Ok((token, with_version(&base, "/v2")))
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        token: &str,
        extra_headers: &[(&str, &str)],
    ) -> Result<GatewayResponse, ApiError> {
        let mut headers = vec![("X-Auth-Token", token)];
        headers.extend_from_slice(extra_headers);
        Ok(self.gateway.request(method, url, body, &headers).await?)
    }

    fn success(resp: GatewayResponse) -> Result<GatewayResponse, ApiError> {
        if resp.is_success() {
            Ok(resp)
        } else {
            Err(ApiError::Remote {
                status: resp.status,
                message: resp.error_message(),
            })
        }
    }

    /// Delete semantics: 404 means the resource is already gone, which is
    /// the outcome the caller wanted.
    fn delete_success(resp: GatewayResponse) -> Result<(), ApiError> {
        if resp.is_success() || resp.status == 404 {
            Ok(())
        } else {
            Err(ApiError::Remote {
                status: resp.status,
                message: resp.error_message(),
            })
        }
    }

    fn parse(resp: &GatewayResponse) -> Result<Value, ApiError> {
        resp.json().map_err(|e| ApiError::MalformedResponse(e.to_string()))
    }

    fn parse_list<T: serde::de::DeserializeOwned>(body: &Value, key: &str) -> Result<Vec<T>, ApiError> {
        match body.get(key) {
            Some(list) => serde_json::from_value(list.clone())
                .map_err(|e| ApiError::MalformedResponse(format!("bad {key} list: {e}"))),
            None => Ok(Vec::new()),
        }
    }

    // ── Compute: flavors ─────────────────────────────────────────────────────

    pub async fn list_flavors(&self) -> Result<Vec<FlavorRecord>, ApiError> {
        let (token, compute) = self.scoped("compute").await?;
        let resp = self
            .send(Method::GET, &format!("{compute}/flavors/detail"), None, &token, &[])
            .await?;
        let body = Self::parse(&Self::success(resp)?)?;
        let flavors = Self::parse_list(&body, "flavors")?;
        debug!(count = flavors.len(), "listed flavors");
        Ok(flavors)
    }

    pub async fn get_flavor(&self, flavor_id: &str) -> Result<FlavorRecord, ApiError> {
        let (token, compute) = self.scoped("compute").await?;
        let resp = self
            .send(Method::GET, &format!("{compute}/flavors/{flavor_id}"), None, &token, &[])
            .await?;
        let body = Self::parse(&Self::success(resp)?)?;
        serde_json::from_value(body["flavor"].clone())
            .map_err(|e| ApiError::MalformedResponse(format!("bad flavor object: {e}")))
    }

    // ── Compute: servers ─────────────────────────────────────────────────────

    pub async fn create_server(&self, req: &CreateServerRequest) -> Result<CreatedServer, ApiError> {
        if req.name.is_empty() {
            return Err(ApiError::MissingField("name"));
        }
        if req.flavor_id.is_empty() {
            return Err(ApiError::MissingField("flavor_id"));
        }
        if req.network_ids.is_empty() {
            return Err(ApiError::MissingField("network_ids"));
        }
        if req.image_id.is_none() && req.block_device.is_none() {
            return Err(ApiError::MissingField("image_id or block_device"));
        }

        let networks: Vec<Value> = req
            .network_ids
            .iter()
            .map(|id| serde_json::json!({ "uuid": id }))
            .collect();

        let mut server = serde_json::json!({
            "name": req.name,
            "flavorRef": req.flavor_id,
            "networks": networks,
        });

        if let Some(device) = &req.block_device {
            let mut mapping = serde_json::json!({
                "boot_index": 0,
                "uuid": device.image_id,
                "source_type": "image",
                "destination_type": "volume",
                "volume_size": device.volume_size_gb,
                "delete_on_termination": device.delete_on_termination,
            });
            if let Some(volume_type) = &device.volume_type {
                mapping["volume_type"] = Value::String(volume_type.clone());
            }
            server["block_device_mapping_v2"] = Value::Array(vec![mapping]);
        } else if let Some(image_id) = &req.image_id {
            server["imageRef"] = Value::String(image_id.clone());
        }

        if !req.security_groups.is_empty() {
            server["security_groups"] = req
                .security_groups
                .iter()
                .map(|sg| serde_json::json!({ "name": sg.trim() }))
                .collect();
        }
        if !req.metadata.is_empty() {
            server["metadata"] = serde_json::json!(req.metadata);
        }
        if let Some(admin_pass) = &req.admin_pass {
            server["adminPass"] = Value::String(admin_pass.clone());
        }
        if let Some(key_name) = &req.key_name {
            server["key_name"] = Value::String(key_name.clone());
        }
        if let Some(user_data) = &req.user_data {
            server["user_data"] = Value::String(BASE64.encode(user_data));
        }
        if let Some(zone) = &req.availability_zone {
            server["availability_zone"] = Value::String(zone.clone());
        }

        let (token, compute) = self.scoped("compute").await?;
        info!(name = %req.name, flavor = %req.flavor_id, "creating server");
        let resp = self
            .send(
                Method::POST,
                &format!("{compute}/servers"),
                Some(&serde_json::json!({ "server": server })),
                &token,
                &[NOVA_MICROVERSION],
            )
            .await?;
        let body = Self::parse(&Self::success(resp)?)?;

        let id = body["server"]["id"]
            .as_str()
            .ok_or_else(|| ApiError::MalformedResponse("no server id in create response".to_string()))?
            .to_string();
        let admin_pass = body["server"]["adminPass"].as_str().map(String::from);

        info!(server_id = %id, "server created");
        Ok(CreatedServer { id, admin_pass })
    }

    pub async fn list_servers(&self) -> Result<Vec<ServerRecord>, ApiError> {
        let (token, compute) = self.scoped("compute").await?;
        let resp = self
            .send(Method::GET, &format!("{compute}/servers/detail"), None, &token, &[])
            .await?;
        let body = Self::parse(&Self::success(resp)?)?;
        let servers = body["servers"].as_array().cloned().unwrap_or_default();
        let records = servers
            .iter()
            .map(ServerRecord::from_api)
            .collect::<Result<Vec<_>, _>>()
            .map_err(ApiError::MalformedResponse)?;
        debug!(count = records.len(), "listed servers");
        Ok(records)
    }

    pub async fn get_server(&self, server_id: &str) -> Result<ServerRecord, ApiError> {
        let (token, compute) = self.scoped("compute").await?;
        let resp = self
            .send(Method::GET, &format!("{compute}/servers/{server_id}"), None, &token, &[])
            .await?;
        let body = Self::parse(&Self::success(resp)?)?;
        ServerRecord::from_api(&body["server"]).map_err(ApiError::MalformedResponse)
    }

    pub async fn delete_server(&self, server_id: &str) -> Result<(), ApiError> {
        let (token, compute) = self.scoped("compute").await?;
        info!(server_id, "deleting server");
        let resp = self
            .send(Method::DELETE, &format!("{compute}/servers/{server_id}"), None, &token, &[])
            .await?;
        Self::delete_success(resp)
    }

    pub async fn server_action(&self, server_id: &str, action: &ServerAction) -> Result<(), ApiError> {
        let (token, compute) = self.scoped("compute").await?;
        info!(server_id, action = action.name(), "submitting server action");
        let resp = self
            .send(
                Method::POST,
                &format!("{compute}/servers/{server_id}/action"),
                Some(&action.body()),
                &token,
                &[],
            )
            .await?;
        Self::success(resp)?;
        Ok(())
    }

    /// Request a console URL: the versioned remote-consoles endpoint first,
    /// falling back to the legacy console action when it is unavailable.
    pub async fn console_url(
        &self,
        server_id: &str,
        console_type: ConsoleType,
    ) -> Result<String, ApiError> {
        let (token, compute) = self.scoped("compute").await?;

        let body = serde_json::json!({
            "remote_console": {
                "protocol": console_type.protocol(),
                "type": console_type.as_str(),
            }
        });
        let resp = self
            .send(
                Method::POST,
                &format!("{compute}/servers/{server_id}/remote-consoles"),
                Some(&body),
                &token,
                &[],
            )
            .await?;
        if resp.is_success()
            && let Ok(payload) = Self::parse(&resp)
            && let Some(url) = payload["remote_console"]["url"].as_str()
        {
            return Ok(url.to_string());
        }
        debug!(server_id, status = resp.status, "remote-consoles unavailable, trying legacy console action");

        let legacy = serde_json::json!({
            "os-getVNCConsole": { "type": console_type.as_str() }
        });
        let resp = self
            .send(
                Method::POST,
                &format!("{compute}/servers/{server_id}/action"),
                Some(&legacy),
                &token,
                &[],
            )
            .await?;
        let resp = Self::success(resp)?;
        let payload = Self::parse(&resp)?;
        payload["console"]["url"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| ApiError::NotFound("no console URL returned".to_string()))
    }

    pub async fn server_volume_attachments(
        &self,
        server_id: &str,
    ) -> Result<Vec<VolumeAttachment>, ApiError> {
        let (token, compute) = self.scoped("compute").await?;
        let resp = self
            .send(
                Method::GET,
                &format!("{compute}/servers/{server_id}/os-volume_attachments"),
                None,
                &token,
                &[],
            )
            .await?;
        let body = Self::parse(&Self::success(resp)?)?;
        Self::parse_list(&body, "volumeAttachments")
    }

    // ── Network ──────────────────────────────────────────────────────────────

    pub async fn list_networks(&self) -> Result<Vec<NetworkRecord>, ApiError> {
        let (token, net) = self.network_scoped().await?;
        let resp = self
            .send(Method::GET, &format!("{net}/networks"), None, &token, &[])
            .await?;
        let body = Self::parse(&Self::success(resp)?)?;
        Self::parse_list(&body, "networks")
    }

    /// External networks are the floating-IP pools.
    pub async fn list_external_networks(&self) -> Result<Vec<NetworkRecord>, ApiError> {
        let (token, net) = self.network_scoped().await?;
        let resp = self
            .send(
                Method::GET,
                &format!("{net}/networks?router:external=true"),
                None,
                &token,
                &[],
            )
            .await?;
        let body = Self::parse(&Self::success(resp)?)?;
        Self::parse_list(&body, "networks")
    }

    pub async fn list_security_groups(&self) -> Result<Vec<SecurityGroupRecord>, ApiError> {
        let (token, net) = self.network_scoped().await?;
        let resp = self
            .send(Method::GET, &format!("{net}/security-groups"), None, &token, &[])
            .await?;
        let body = Self::parse(&Self::success(resp)?)?;
        Self::parse_list(&body, "security_groups")
    }

    pub async fn get_security_group(&self, group_id: &str) -> Result<SecurityGroupRecord, ApiError> {
        let (token, net) = self.network_scoped().await?;
        let resp = self
            .send(
                Method::GET,
                &format!("{net}/security-groups/{group_id}"),
                None,
                &token,
                &[],
            )
            .await?;
        let body = Self::parse(&Self::success(resp)?)?;
        serde_json::from_value(body["security_group"].clone())
            .map_err(|e| ApiError::MalformedResponse(format!("bad security group object: {e}")))
    }

    pub async fn list_server_ports(&self, server_id: &str) -> Result<Vec<PortRecord>, ApiError> {
        let (token, net) = self.network_scoped().await?;
        let resp = self
            .send(
                Method::GET,
                &format!("{net}/ports?device_id={server_id}"),
                None,
                &token,
                &[],
            )
            .await?;
        let body = Self::parse(&Self::success(resp)?)?;
        Self::parse_list(&body, "ports")
    }

    pub async fn delete_port(&self, port_id: &str) -> Result<(), ApiError> {
        let (token, net) = self.network_scoped().await?;
        info!(port_id, "deleting port");
        let resp = self
            .send(Method::DELETE, &format!("{net}/ports/{port_id}"), None, &token, &[])
            .await?;
        Self::delete_success(resp)
    }

    /// Allocate a floating IP from `floating_network_id` and bind it to the
    /// server's first port.
    pub async fn assign_floating_ip(
        &self,
        server_id: &str,
        floating_network_id: &str,
    ) -> Result<FloatingIpRecord, ApiError> {
        let ports = self.list_server_ports(server_id).await?;
        let port = ports
            .first()
            .ok_or_else(|| ApiError::NotFound(format!("no ports found for server {server_id}")))?;

        let (token, net) = self.network_scoped().await?;
        info!(server_id, port_id = %port.id, "assigning floating IP");
        let body = serde_json::json!({
            "floatingip": {
                "floating_network_id": floating_network_id,
                "port_id": port.id,
            }
        });
        let resp = self
            .send(Method::POST, &format!("{net}/floatingips"), Some(&body), &token, &[])
            .await?;
        let payload = Self::parse(&Self::success(resp)?)?;
        serde_json::from_value(payload["floatingip"].clone())
            .map_err(|e| ApiError::MalformedResponse(format!("bad floatingip object: {e}")))
    }

    /// Release a floating IP by ID or by address. An address is resolved to
    /// its ID first; an address with no allocation is already released.
    pub async fn release_floating_ip(&self, id_or_address: &str) -> Result<(), ApiError> {
        let (token, net) = self.network_scoped().await?;

        let mut ident = id_or_address.to_string();
        if id_or_address.parse::<std::net::IpAddr>().is_ok() {
            let resp = self
                .send(
                    Method::GET,
                    &format!("{net}/floatingips?floating_ip_address={id_or_address}"),
                    None,
                    &token,
                    &[],
                )
                .await?;
            if resp.is_success() {
                let body = Self::parse(&resp)?;
                match body["floatingips"][0]["id"].as_str() {
                    Some(id) => ident = id.to_string(),
                    None => {
                        debug!(address = id_or_address, "floating IP already released");
                        return Ok(());
                    }
                }
            }
        }

        info!(floating_ip = %ident, "releasing floating IP");
        let resp = self
            .send(Method::DELETE, &format!("{net}/floatingips/{ident}"), None, &token, &[])
            .await?;
        Self::delete_success(resp)
    }

    // ── Image ────────────────────────────────────────────────────────────────

    pub async fn list_images(&self) -> Result<Vec<ImageRecord>, ApiError> {
        let (token, image) = self.image_scoped().await?;
        let resp = self
            .send(
                Method::GET,
                &format!("{image}/images?status=active&limit=100"),
                None,
                &token,
                &[],
            )
            .await?;
        let body = Self::parse(&Self::success(resp)?)?;
        Self::parse_list(&body, "images")
    }

    pub async fn get_image(&self, image_id: &str) -> Result<ImageRecord, ApiError> {
        let (token, image) = self.image_scoped().await?;
        let resp = self
            .send(Method::GET, &format!("{image}/images/{image_id}"), None, &token, &[])
            .await?;
        let body = Self::parse(&Self::success(resp)?)?;
        // The image service returns the image object at the top level.
        serde_json::from_value(body)
            .map_err(|e| ApiError::MalformedResponse(format!("bad image object: {e}")))
    }

    // ── Volume ───────────────────────────────────────────────────────────────

    /// Tolerates deployments without a block-storage service: a missing
    /// catalog entry or a 404 yields an empty list, not an error.
    pub async fn list_volume_types(&self) -> Result<Vec<VolumeTypeRecord>, ApiError> {
        let (token, volume) = match self.scoped("volumev3").await {
            Ok(scoped) => scoped,
            Err(ApiError::Catalog(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let resp = self
            .send(Method::GET, &format!("{volume}/types"), None, &token, &[])
            .await?;
        if resp.status == 404 {
            return Ok(Vec::new());
        }
        let body = Self::parse(&Self::success(resp)?)?;
        Self::parse_list(&body, "volume_types")
    }

    /// Create a bootable volume cloned from an image.
    pub async fn create_boot_volume(
        &self,
        name: &str,
        image_id: &str,
        size_gb: u32,
        volume_type: Option<&str>,
    ) -> Result<VolumeRecord, ApiError> {
        let (token, volume) = self.scoped("volumev3").await?;

        let mut spec = serde_json::json!({
            "name": name,
            "size": size_gb,
            "imageRef": image_id,
            "bootable": true,
        });
        if let Some(volume_type) = volume_type {
            spec["volume_type"] = Value::String(volume_type.to_string());
        }

        info!(name, image_id, size_gb, "creating boot volume");
        let resp = self
            .send(
                Method::POST,
                &format!("{volume}/volumes"),
                Some(&serde_json::json!({ "volume": spec })),
                &token,
                &[],
            )
            .await?;
        let body = Self::parse(&Self::success(resp)?)?;
        VolumeRecord::from_api(&body["volume"]).map_err(ApiError::MalformedResponse)
    }

    pub async fn get_volume(&self, volume_id: &str) -> Result<VolumeRecord, ApiError> {
        let (token, volume) = self.scoped("volumev3").await?;
        let resp = self
            .send(Method::GET, &format!("{volume}/volumes/{volume_id}"), None, &token, &[])
            .await?;
        let body = Self::parse(&Self::success(resp)?)?;
        VolumeRecord::from_api(&body["volume"]).map_err(ApiError::MalformedResponse)
    }

    pub async fn delete_volume(&self, volume_id: &str) -> Result<(), ApiError> {
        let (token, volume) = self.scoped("volumev3").await?;
        info!(volume_id, "deleting volume");
        let resp = self
            .send(Method::DELETE, &format!("{volume}/volumes/{volume_id}"), None, &token, &[])
            .await?;
        Self::delete_success(resp)
    }

    pub async fn extend_volume(&self, volume_id: &str, new_size_gb: u64) -> Result<(), ApiError> {
        let (token, volume) = self.scoped("volumev3").await?;
        info!(volume_id, new_size_gb, "extending volume");
        let body = serde_json::json!({ "os-extend": { "new_size": new_size_gb } });
        let resp = self
            .send(
                Method::POST,
                &format!("{volume}/volumes/{volume_id}/action"),
                Some(&body),
                &token,
                &[],
            )
            .await?;
        Self::success(resp)?;
        Ok(())
    }

    // ── Connectivity ─────────────────────────────────────────────────────────

    /// Authenticate and list flavors as a connection probe.
    pub async fn test_connection(&self) -> Result<ConnectionInfo, ApiError> {
        let project_id = self.session.project_id().await?;
        let flavors = self.list_flavors().await?;
        Ok(ConnectionInfo {
            project_id,
            flavor_count: flavors.len(),
        })
    }
}
