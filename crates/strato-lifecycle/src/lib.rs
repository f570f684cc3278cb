//! VM lifecycle controller for Strato.
//!
//! Sequences the multi-step operations — create, power actions, resize,
//! volume extension, termination — on top of [`CloudClient`], confirming
//! each remote state transition with bounded polling. Waits are cancellable
//! through a caller-supplied [`CancellationToken`] and timeouts are reported
//! as "still in progress", never as hard failures.

#![forbid(unsafe_code)]

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use strato_client::{ApiError, CloudClient};
use strato_proto::{
    BlockDevice, CreateServerRequest, IpPair, RebootKind, ServerAction, ServerRecord, ServerStatus,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ─── Polling policy ───────────────────────────────────────────────────────────

/// Fixed poll interval and per-operation wait budgets.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub interval: Duration,
    pub create_budget: Duration,
    pub power_budget: Duration,
    pub resize_budget: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            create_budget: Duration::from_secs(120),
            power_budget: Duration::from_secs(30),
            resize_budget: Duration::from_secs(120),
        }
    }
}

// ─── Outcomes ─────────────────────────────────────────────────────────────────

/// Result of waiting for a server to reach a target status.
#[derive(Debug)]
pub enum WaitOutcome {
    Reached(ServerRecord),
    /// The server is gone from the remote API; satisfies a DELETED target.
    Gone,
    /// The server entered ERROR; terminal for this operation.
    Failed { message: String },
    TimedOut { last_status: Option<ServerStatus> },
    Cancelled,
}

#[derive(Debug)]
pub enum CreateOutcome {
    Provisioned {
        server: ServerRecord,
        ips: IpPair,
        admin_pass: Option<String>,
    },
    /// The wait budget ran out while the server was still building.
    /// Not a failure; the server may yet come up.
    StillProvisioning {
        server_id: String,
        admin_pass: Option<String>,
    },
    Failed {
        server_id: String,
        message: String,
    },
    Cancelled {
        server_id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    Start,
    Stop,
    Reboot(RebootKind),
}

impl PowerAction {
    fn target(&self) -> ServerStatus {
        match self {
            Self::Start | Self::Reboot(_) => ServerStatus::Active,
            Self::Stop => ServerStatus::Shutoff,
        }
    }

    fn server_action(&self) -> ServerAction {
        match self {
            Self::Start => ServerAction::Start,
            Self::Stop => ServerAction::Stop,
            Self::Reboot(kind) => ServerAction::Reboot(*kind),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Reboot(_) => "reboot",
        }
    }
}

#[derive(Debug)]
pub enum PowerOutcome {
    Completed(ServerRecord),
    Failed { message: String },
    /// The action was submitted and stands; only the confirmation poll
    /// ran out of budget.
    TimedOut { last_status: Option<ServerStatus> },
    Cancelled,
}

#[derive(Debug)]
pub enum ResizeOutcome {
    /// VERIFY_RESIZE was observed and the confirm call succeeded.
    Resized,
    /// The server went straight to ACTIVE; no confirmation step needed.
    AlreadyComplete,
    Failed { message: String },
    /// The resize itself landed but the confirm call failed; reported
    /// distinctly from a resize-submission failure.
    ConfirmFailed { message: String },
    TimedOut,
    Cancelled,
}

/// Outcome of a volume size change request. Shrinks are refused locally;
/// no shrink call is ever sent to the remote API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeChange {
    Extended { from_gb: u64, to_gb: u64 },
    Unchanged { size_gb: u64 },
    ShrinkRefused { current_gb: u64, requested_gb: u64 },
}

impl VolumeChange {
    pub fn describe(&self) -> String {
        match self {
            Self::Extended { from_gb, to_gb } => {
                format!("disk extended from {from_gb}GB to {to_gb}GB")
            }
            Self::Unchanged { size_gb } => format!("disk size unchanged ({size_gb}GB)"),
            Self::ShrinkRefused {
                current_gb,
                requested_gb,
            } => format!(
                "disk size unchanged (shrinking not supported; current {current_gb}GB, requested {requested_gb}GB)"
            ),
        }
    }
}

/// Accumulated per-step results of a combined upgrade, in the order the
/// steps ran.
#[derive(Debug, Default)]
pub struct UpgradeReport {
    pub results: Vec<String>,
    pub errors: Vec<String>,
}

impl UpgradeReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

// ─── Creation spec ────────────────────────────────────────────────────────────

/// Boot-from-volume VM creation parameters.
#[derive(Debug, Clone)]
pub struct CreateVmSpec {
    pub name: String,
    pub flavor_id: String,
    pub image_id: String,
    pub network_id: String,
    pub volume_size_gb: u32,
    pub volume_type: Option<String>,
    pub security_group: Option<String>,
    pub admin_pass: Option<String>,
    pub key_name: Option<String>,
    pub user_data: Option<String>,
    pub availability_zone: Option<String>,
}

impl CreateVmSpec {
    fn to_request(&self) -> CreateServerRequest {
        CreateServerRequest {
            name: self.name.clone(),
            flavor_id: self.flavor_id.clone(),
            network_ids: vec![self.network_id.clone()],
            image_id: None,
            block_device: Some(BlockDevice {
                image_id: self.image_id.clone(),
                volume_size_gb: self.volume_size_gb,
                volume_type: self.volume_type.clone(),
                delete_on_termination: true,
            }),
            security_groups: self.security_group.iter().cloned().collect(),
            admin_pass: self.admin_pass.clone(),
            metadata: HashMap::new(),
            key_name: self.key_name.clone(),
            user_data: self.user_data.clone(),
            availability_zone: self.availability_zone.clone(),
        }
    }
}

// ─── Controller ───────────────────────────────────────────────────────────────

pub struct LifecycleController {
    client: CloudClient,
    policy: PollPolicy,
    /// Per-server operation guards. Two lifecycle operations on the same VM
    /// serialize in-process; cross-process coordination is the host's problem.
    guards: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl LifecycleController {
    pub fn new(client: CloudClient) -> Self {
        Self::with_policy(client, PollPolicy::default())
    }

    pub fn with_policy(client: CloudClient, policy: PollPolicy) -> Self {
        Self {
            client,
            policy,
            guards: Mutex::new(HashMap::new()),
        }
    }

    pub fn client(&self) -> &CloudClient {
        &self.client
    }

    fn guard_handle(&self, server_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut guards = self.guards.lock();
        guards.entry(server_id.to_string()).or_default().clone()
    }

    async fn vm_guard(&self, server_id: &str) -> tokio::sync::OwnedMutexGuard<()> {
        self.guard_handle(server_id).lock_owned().await
    }

    // ── Polling ──────────────────────────────────────────────────────────────

    /// Poll until the server reaches one of `targets`, enters ERROR, the
    /// budget runs out, or `cancel` fires. Transient poll failures are
    /// logged and retried within the budget.
    pub async fn wait_for_status(
        &self,
        server_id: &str,
        targets: &[ServerStatus],
        budget: Duration,
        cancel: &CancellationToken,
    ) -> WaitOutcome {
        let deadline = tokio::time::Instant::now() + budget;
        let mut last_status = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(server_id, "wait cancelled by caller");
                    return WaitOutcome::Cancelled;
                }
                _ = tokio::time::sleep(self.policy.interval) => {}
            }

            match self.client.get_server(server_id).await {
                Ok(server) => {
                    last_status = Some(server.status.clone());
                    if server.status.is_error() {
                        let message = server
                            .fault_message
                            .unwrap_or_else(|| "unknown error".to_string());
                        warn!(server_id, %message, "server entered ERROR state");
                        return WaitOutcome::Failed { message };
                    }
                    if targets.contains(&server.status) {
                        info!(server_id, status = %server.status, "target status reached");
                        return WaitOutcome::Reached(server);
                    }
                }
                Err(e)
                    if e.is_remote_not_found() && targets.contains(&ServerStatus::Deleted) =>
                {
                    info!(server_id, "server no longer present");
                    return WaitOutcome::Gone;
                }
                Err(e) => {
                    warn!(server_id, error = %e, "status poll failed, retrying");
                }
            }

            if tokio::time::Instant::now() >= deadline {
                warn!(server_id, ?last_status, "wait budget exhausted");
                return WaitOutcome::TimedOut { last_status };
            }
        }
    }

    // ── Create ───────────────────────────────────────────────────────────────

    /// Submit a boot-from-volume creation and wait for ACTIVE. A timeout is
    /// reported as still-provisioning, an ERROR status fails immediately
    /// with the remote fault message.
    pub async fn create_vm(
        &self,
        spec: &CreateVmSpec,
        cancel: &CancellationToken,
    ) -> Result<CreateOutcome, ApiError> {
        info!(
            name = %spec.name,
            flavor = %spec.flavor_id,
            image = %spec.image_id,
            volume_gb = spec.volume_size_gb,
            "creating VM"
        );
        let created = self.client.create_server(&spec.to_request()).await?;

        let outcome = match self
            .wait_for_status(
                &created.id,
                &[ServerStatus::Active],
                self.policy.create_budget,
                cancel,
            )
            .await
        {
            WaitOutcome::Reached(server) => {
                let ips = server.ips();
                info!(server_id = %created.id, ipv4 = ips.ipv4.as_deref().unwrap_or("-"), "VM provisioned");
                CreateOutcome::Provisioned {
                    server,
                    ips,
                    admin_pass: created.admin_pass,
                }
            }
            WaitOutcome::Failed { message } => {
                warn!(server_id = %created.id, %message, "VM creation failed");
                CreateOutcome::Failed {
                    server_id: created.id,
                    message,
                }
            }
            WaitOutcome::Gone => CreateOutcome::Failed {
                server_id: created.id,
                message: "server disappeared during provisioning".to_string(),
            },
            WaitOutcome::TimedOut { .. } => {
                info!(server_id = %created.id, "VM still provisioning after wait budget");
                CreateOutcome::StillProvisioning {
                    server_id: created.id,
                    admin_pass: created.admin_pass,
                }
            }
            WaitOutcome::Cancelled => CreateOutcome::Cancelled {
                server_id: created.id,
            },
        };
        Ok(outcome)
    }

    // ── Power ────────────────────────────────────────────────────────────────

    /// Submit a power action and wait for its target status. A timeout does
    /// not revert the action.
    pub async fn power(
        &self,
        server_id: &str,
        action: PowerAction,
        cancel: &CancellationToken,
    ) -> Result<PowerOutcome, ApiError> {
        let _guard = self.vm_guard(server_id).await;
        info!(server_id, action = action.name(), "power action");
        self.client
            .server_action(server_id, &action.server_action())
            .await?;

        let outcome = match self
            .wait_for_status(
                server_id,
                &[action.target()],
                self.policy.power_budget,
                cancel,
            )
            .await
        {
            WaitOutcome::Reached(server) => PowerOutcome::Completed(server),
            WaitOutcome::Gone => PowerOutcome::Failed {
                message: "server no longer exists".to_string(),
            },
            WaitOutcome::Failed { message } => PowerOutcome::Failed { message },
            WaitOutcome::TimedOut { last_status } => {
                warn!(server_id, action = action.name(), "power action confirmation timed out");
                PowerOutcome::TimedOut { last_status }
            }
            WaitOutcome::Cancelled => PowerOutcome::Cancelled,
        };
        Ok(outcome)
    }

    /// Submit-only; the billing side treats suspension as fire-and-forget.
    pub async fn suspend(&self, server_id: &str) -> Result<(), ApiError> {
        let _guard = self.vm_guard(server_id).await;
        self.client
            .server_action(server_id, &ServerAction::Suspend)
            .await
    }

    pub async fn resume(&self, server_id: &str) -> Result<(), ApiError> {
        let _guard = self.vm_guard(server_id).await;
        self.client
            .server_action(server_id, &ServerAction::Resume)
            .await
    }

    // ── Resize ───────────────────────────────────────────────────────────────

    pub async fn resize(
        &self,
        server_id: &str,
        new_flavor_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ResizeOutcome, ApiError> {
        let _guard = self.vm_guard(server_id).await;
        self.resize_locked(server_id, new_flavor_id, cancel).await
    }

    async fn resize_locked(
        &self,
        server_id: &str,
        new_flavor_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ResizeOutcome, ApiError> {
        info!(server_id, flavor = new_flavor_id, "resizing VM");
        self.client
            .server_action(
                server_id,
                &ServerAction::Resize {
                    flavor_id: new_flavor_id.to_string(),
                },
            )
            .await?;

        let outcome = match self
            .wait_for_status(
                server_id,
                &[ServerStatus::VerifyResize, ServerStatus::Active],
                self.policy.resize_budget,
                cancel,
            )
            .await
        {
            WaitOutcome::Reached(server) if server.status == ServerStatus::VerifyResize => {
                match self
                    .client
                    .server_action(server_id, &ServerAction::ConfirmResize)
                    .await
                {
                    Ok(()) => {
                        info!(server_id, "resize confirmed");
                        ResizeOutcome::Resized
                    }
                    Err(e) => {
                        warn!(server_id, error = %e, "resize confirmation failed");
                        ResizeOutcome::ConfirmFailed {
                            message: e.to_string(),
                        }
                    }
                }
            }
            WaitOutcome::Reached(_) => {
                info!(server_id, "resize completed without a confirmation step");
                ResizeOutcome::AlreadyComplete
            }
            WaitOutcome::Gone => ResizeOutcome::Failed {
                message: "server no longer exists".to_string(),
            },
            WaitOutcome::Failed { message } => ResizeOutcome::Failed { message },
            WaitOutcome::TimedOut { .. } => ResizeOutcome::TimedOut,
            WaitOutcome::Cancelled => ResizeOutcome::Cancelled,
        };
        Ok(outcome)
    }

    // ── Volume size ──────────────────────────────────────────────────────────

    /// Compare-and-extend. Exactly one extend call for an increase, a no-op
    /// for an equal size, and a local refusal for a shrink.
    pub async fn change_volume_size(
        &self,
        volume_id: &str,
        requested_gb: u64,
    ) -> Result<VolumeChange, ApiError> {
        let current = self.client.get_volume(volume_id).await?;

        let change = match requested_gb.cmp(&current.size_gb) {
            std::cmp::Ordering::Greater => {
                self.client.extend_volume(volume_id, requested_gb).await?;
                info!(volume_id, from_gb = current.size_gb, to_gb = requested_gb, "volume extended");
                VolumeChange::Extended {
                    from_gb: current.size_gb,
                    to_gb: requested_gb,
                }
            }
            std::cmp::Ordering::Equal => VolumeChange::Unchanged {
                size_gb: current.size_gb,
            },
            std::cmp::Ordering::Less => {
                info!(
                    volume_id,
                    current_gb = current.size_gb,
                    requested_gb,
                    "volume shrink refused"
                );
                VolumeChange::ShrinkRefused {
                    current_gb: current.size_gb,
                    requested_gb,
                }
            }
        };
        Ok(change)
    }

    // ── Combined upgrade ─────────────────────────────────────────────────────

    /// Apply a package change: optional flavor resize followed by an optional
    /// disk size change, accumulating per-step results and errors.
    pub async fn upgrade(
        &self,
        server_id: &str,
        new_flavor_id: Option<&str>,
        new_volume_gb: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<UpgradeReport, ApiError> {
        let _guard = self.vm_guard(server_id).await;
        let server = self.client.get_server(server_id).await?;
        let mut report = UpgradeReport::default();

        if let Some(flavor) = new_flavor_id
            && !flavor.is_empty()
            && flavor != server.flavor_id
        {
            info!(server_id, old_flavor = %server.flavor_id, new_flavor = flavor, "upgrade: resizing");
            match self.resize_locked(server_id, flavor, cancel).await {
                Ok(ResizeOutcome::Resized) => {
                    report.results.push("VM resized successfully".to_string());
                }
                Ok(ResizeOutcome::AlreadyComplete) => {
                    report.results.push("VM resize completed".to_string());
                }
                Ok(ResizeOutcome::Failed { message }) => {
                    report
                        .errors
                        .push(format!("VM entered ERROR state during resize: {message}"));
                }
                Ok(ResizeOutcome::ConfirmFailed { message }) => {
                    report
                        .errors
                        .push(format!("failed to confirm resize: {message}"));
                }
                Ok(ResizeOutcome::TimedOut) => {
                    report
                        .errors
                        .push("resize timed out - check VM status manually".to_string());
                }
                Ok(ResizeOutcome::Cancelled) => {
                    report.errors.push("resize cancelled".to_string());
                }
                Err(e) => {
                    report.errors.push(format!("failed to start resize: {e}"));
                }
            }
        }

        if let Some(requested_gb) = new_volume_gb {
            match self.client.server_volume_attachments(server_id).await {
                Ok(attachments) => match attachments.first() {
                    Some(attachment) => {
                        match self
                            .change_volume_size(&attachment.volume_id, requested_gb)
                            .await
                        {
                            Ok(change) => report.results.push(change.describe()),
                            Err(e) => {
                                report.errors.push(format!("failed to extend disk: {e}"));
                            }
                        }
                    }
                    None => {
                        report
                            .errors
                            .push("no attached volume found for disk change".to_string());
                    }
                },
                Err(e) => {
                    report
                        .errors
                        .push(format!("failed to list volume attachments: {e}"));
                }
            }
        }

        info!(
            server_id,
            results = report.results.len(),
            errors = report.errors.len(),
            "upgrade finished"
        );
        Ok(report)
    }

    // ── Terminate ────────────────────────────────────────────────────────────

    /// Delete the server (a 404 is already-satisfied) and clean up any
    /// leftover ports captured before deletion.
    pub async fn terminate(&self, server_id: &str) -> Result<(), ApiError> {
        let _guard = self.vm_guard(server_id).await;
        info!(server_id, "terminating VM");

        let ports = match self.client.list_server_ports(server_id).await {
            Ok(ports) => ports,
            Err(e) => {
                warn!(server_id, error = %e, "could not list ports before deletion");
                Vec::new()
            }
        };

        self.client.delete_server(server_id).await?;

        for port in ports {
            if let Err(e) = self.client.delete_port(&port.id).await {
                warn!(server_id, port_id = %port.id, error = %e, "port cleanup failed");
            }
        }

        info!(server_id, "VM terminated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strato_client::Credential;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_policy() -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(10),
            create_budget: Duration::from_millis(500),
            power_budget: Duration::from_millis(500),
            resize_budget: Duration::from_millis(500),
        }
    }

    async fn mount_identity(server: &MockServer) {
        let uri = server.uri();
        let expires_at = (chrono::Utc::now() + chrono::Duration::hours(1))
            .to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
        Mock::given(method("POST"))
            .and(path("/v3/auth/tokens"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("X-Subject-Token", "bearer-test")
                    .set_body_json(serde_json::json!({
                        "token": {
                            "expires_at": expires_at,
                            "project": { "id": "proj-1" },
                            "catalog": [
                                { "type": "compute", "endpoints": [ { "interface": "public", "url": format!("{uri}/compute/v2.1") } ] },
                                { "type": "volumev3", "endpoints": [ { "interface": "public", "url": format!("{uri}/volume/v3") } ] }
                            ]
                        }
                    })),
            )
            .mount(server)
            .await;
    }

    fn controller_for(server: &MockServer) -> LifecycleController {
        let credential = Credential::new(&server.uri(), "cred", "secret", None, true);
        let client = CloudClient::new(credential).expect("client");
        LifecycleController::with_policy(client, fast_policy())
    }

    fn server_body(id: &str, status: &str) -> serde_json::Value {
        serde_json::json!({
            "server": {
                "id": id,
                "name": "vm-test",
                "status": status,
                "flavor": { "id": "f-1" },
                "addresses": {
                    "public": [ { "addr": "203.0.113.7", "version": 4 } ]
                }
            }
        })
    }

    #[tokio::test]
    async fn test_create_vm_reaches_active() {
        let server = MockServer::start().await;
        mount_identity(&server).await;
        Mock::given(method("POST"))
            .and(path("/compute/v2.1/servers"))
            .respond_with(ResponseTemplate::new(202).set_body_json(serde_json::json!({
                "server": { "id": "srv-1", "adminPass": "pw-1" }
            })))
            .mount(&server)
            .await;
        // One BUILD poll, then ACTIVE.
        Mock::given(method("GET"))
            .and(path("/compute/v2.1/servers/srv-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(server_body("srv-1", "BUILD")))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/compute/v2.1/servers/srv-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(server_body("srv-1", "ACTIVE")))
            .mount(&server)
            .await;

        let controller = controller_for(&server);
        let spec = CreateVmSpec {
            name: "vm-test".to_string(),
            flavor_id: "f-1".to_string(),
            image_id: "img-1".to_string(),
            network_id: "net-1".to_string(),
            volume_size_gb: 30,
            volume_type: None,
            security_group: None,
            admin_pass: None,
            key_name: None,
            user_data: None,
            availability_zone: None,
        };

        match controller
            .create_vm(&spec, &CancellationToken::new())
            .await
            .expect("create")
        {
            CreateOutcome::Provisioned {
                server,
                ips,
                admin_pass,
            } => {
                assert_eq!(server.id, "srv-1");
                assert_eq!(ips.ipv4.as_deref(), Some("203.0.113.7"));
                assert_eq!(admin_pass.as_deref(), Some("pw-1"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_vm_error_is_terminal() {
        let server = MockServer::start().await;
        mount_identity(&server).await;
        Mock::given(method("POST"))
            .and(path("/compute/v2.1/servers"))
            .respond_with(ResponseTemplate::new(202).set_body_json(serde_json::json!({
                "server": { "id": "srv-err" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/compute/v2.1/servers/srv-err"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "server": {
                    "id": "srv-err",
                    "status": "ERROR",
                    "fault": { "message": "No valid host was found." }
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let controller = controller_for(&server);
        let spec = CreateVmSpec {
            name: "vm-err".to_string(),
            flavor_id: "f-1".to_string(),
            image_id: "img-1".to_string(),
            network_id: "net-1".to_string(),
            volume_size_gb: 30,
            volume_type: None,
            security_group: None,
            admin_pass: None,
            key_name: None,
            user_data: None,
            availability_zone: None,
        };

        match controller
            .create_vm(&spec, &CancellationToken::new())
            .await
            .expect("create")
        {
            CreateOutcome::Failed { message, .. } => {
                assert_eq!(message, "No valid host was found.");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        // expect(1) on the GET mock verifies polling stopped at ERROR.
    }

    #[tokio::test]
    async fn test_create_vm_timeout_is_still_provisioning() {
        let server = MockServer::start().await;
        mount_identity(&server).await;
        Mock::given(method("POST"))
            .and(path("/compute/v2.1/servers"))
            .respond_with(ResponseTemplate::new(202).set_body_json(serde_json::json!({
                "server": { "id": "srv-slow" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/compute/v2.1/servers/srv-slow"))
            .respond_with(ResponseTemplate::new(200).set_body_json(server_body("srv-slow", "BUILD")))
            .mount(&server)
            .await;

        let controller = controller_for(&server);
        let spec = CreateVmSpec {
            name: "vm-slow".to_string(),
            flavor_id: "f-1".to_string(),
            image_id: "img-1".to_string(),
            network_id: "net-1".to_string(),
            volume_size_gb: 30,
            volume_type: None,
            security_group: None,
            admin_pass: None,
            key_name: None,
            user_data: None,
            availability_zone: None,
        };

        match controller
            .create_vm(&spec, &CancellationToken::new())
            .await
            .expect("create")
        {
            CreateOutcome::StillProvisioning { server_id, .. } => {
                assert_eq!(server_id, "srv-slow");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_power_stop_waits_for_shutoff() {
        let server = MockServer::start().await;
        mount_identity(&server).await;
        Mock::given(method("POST"))
            .and(path("/compute/v2.1/servers/srv-1/action"))
            .and(body_partial_json(serde_json::json!({ "os-stop": null })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/compute/v2.1/servers/srv-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(server_body("srv-1", "SHUTOFF")))
            .mount(&server)
            .await;

        let controller = controller_for(&server);
        match controller
            .power("srv-1", PowerAction::Stop, &CancellationToken::new())
            .await
            .expect("power")
        {
            PowerOutcome::Completed(record) => assert_eq!(record.status, ServerStatus::Shutoff),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resize_confirms_on_verify_resize() {
        let server = MockServer::start().await;
        mount_identity(&server).await;
        Mock::given(method("POST"))
            .and(path("/compute/v2.1/servers/srv-1/action"))
            .and(body_partial_json(serde_json::json!({ "resize": { "flavorRef": "f-2" } })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/compute/v2.1/servers/srv-1/action"))
            .and(body_partial_json(serde_json::json!({ "confirmResize": null })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/compute/v2.1/servers/srv-1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(server_body("srv-1", "VERIFY_RESIZE")),
            )
            .mount(&server)
            .await;

        let controller = controller_for(&server);
        match controller
            .resize("srv-1", "f-2", &CancellationToken::new())
            .await
            .expect("resize")
        {
            ResizeOutcome::Resized => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resize_direct_active_needs_no_confirm() {
        let server = MockServer::start().await;
        mount_identity(&server).await;
        Mock::given(method("POST"))
            .and(path("/compute/v2.1/servers/srv-1/action"))
            .and(body_partial_json(serde_json::json!({ "resize": { "flavorRef": "f-2" } })))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/compute/v2.1/servers/srv-1/action"))
            .and(body_partial_json(serde_json::json!({ "confirmResize": null })))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/compute/v2.1/servers/srv-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(server_body("srv-1", "ACTIVE")))
            .mount(&server)
            .await;

        let controller = controller_for(&server);
        match controller
            .resize("srv-1", "f-2", &CancellationToken::new())
            .await
            .expect("resize")
        {
            ResizeOutcome::AlreadyComplete => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    fn volume_body(id: &str, size: u64) -> serde_json::Value {
        serde_json::json!({
            "volume": { "id": id, "size": size, "status": "in-use" }
        })
    }

    #[tokio::test]
    async fn test_volume_extend_issues_exactly_one_call() {
        let server = MockServer::start().await;
        mount_identity(&server).await;
        Mock::given(method("GET"))
            .and(path("/volume/v3/volumes/vol-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(volume_body("vol-1", 30)))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/volume/v3/volumes/vol-1/action"))
            .and(body_partial_json(serde_json::json!({ "os-extend": { "new_size": 50 } })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let controller = controller_for(&server);
        let change = controller
            .change_volume_size("vol-1", 50)
            .await
            .expect("extend");
        assert_eq!(
            change,
            VolumeChange::Extended {
                from_gb: 30,
                to_gb: 50
            }
        );
    }

    #[tokio::test]
    async fn test_volume_equal_size_is_noop() {
        let server = MockServer::start().await;
        mount_identity(&server).await;
        Mock::given(method("GET"))
            .and(path("/volume/v3/volumes/vol-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(volume_body("vol-1", 30)))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/volume/v3/volumes/vol-1/action"))
            .respond_with(ResponseTemplate::new(202))
            .expect(0)
            .mount(&server)
            .await;

        let controller = controller_for(&server);
        let change = controller
            .change_volume_size("vol-1", 30)
            .await
            .expect("noop");
        assert_eq!(change, VolumeChange::Unchanged { size_gb: 30 });
    }

    #[tokio::test]
    async fn test_volume_shrink_never_reaches_remote() {
        let server = MockServer::start().await;
        mount_identity(&server).await;
        Mock::given(method("GET"))
            .and(path("/volume/v3/volumes/vol-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(volume_body("vol-1", 50)))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/volume/v3/volumes/vol-1/action"))
            .respond_with(ResponseTemplate::new(202))
            .expect(0)
            .mount(&server)
            .await;

        let controller = controller_for(&server);
        let change = controller
            .change_volume_size("vol-1", 20)
            .await
            .expect("refused");
        assert_eq!(
            change,
            VolumeChange::ShrinkRefused {
                current_gb: 50,
                requested_gb: 20
            }
        );
        assert!(change.describe().contains("shrinking not supported"));
    }

    #[tokio::test]
    async fn test_wait_cancellation() {
        let server = MockServer::start().await;
        mount_identity(&server).await;
        Mock::given(method("GET"))
            .and(path("/compute/v2.1/servers/srv-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(server_body("srv-1", "BUILD")))
            .mount(&server)
            .await;

        let controller = controller_for(&server);
        let cancel = CancellationToken::new();
        cancel.cancel();

        match controller
            .wait_for_status(
                "srv-1",
                &[ServerStatus::Active],
                Duration::from_secs(5),
                &cancel,
            )
            .await
        {
            WaitOutcome::Cancelled => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wait_for_deleted_accepts_remote_404() {
        let server = MockServer::start().await;
        mount_identity(&server).await;
        Mock::given(method("GET"))
            .and(path("/compute/v2.1/servers/srv-gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let controller = controller_for(&server);
        match controller
            .wait_for_status(
                "srv-gone",
                &[ServerStatus::Deleted],
                Duration::from_millis(200),
                &CancellationToken::new(),
            )
            .await
        {
            WaitOutcome::Gone => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_terminate_cleans_up_ports() {
        let server = MockServer::start().await;
        mount_identity(&server).await;
        // Identity catalog above lacks a network service; terminate should
        // still delete the server and log the port-listing failure.
        Mock::given(method("DELETE"))
            .and(path("/compute/v2.1/servers/srv-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let controller = controller_for(&server);
        controller.terminate("srv-1").await.expect("terminate");
    }
}
