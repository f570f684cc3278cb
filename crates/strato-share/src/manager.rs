//! Share lifecycle: creation, non-consuming status checks, consuming
//! redemption, and guarded revocation.

use crate::store::ShareStore;
use crate::token::generate_token;
use crate::{ConsoleShare, ShareError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use strato_client::CloudClient;
use strato_proto::{ConsoleType, ExpiryChoice, validate_token_format};
use tracing::{info, warn};
use uuid::Uuid;

// ─── Collaborator gates ───────────────────────────────────────────────────────

/// Host-provided check that the billing service owning a share is active.
/// The default gate accepts everything; hosts with a service store wire in
/// their own.
pub trait ServiceGate: Send + Sync {
    fn is_active(&self, service_id: u64) -> bool;
}

pub struct AllowAllServices;

impl ServiceGate for AllowAllServices {
    fn is_active(&self, _service_id: u64) -> bool {
        true
    }
}

// ─── Results ──────────────────────────────────────────────────────────────────

/// Returned once at creation; the raw token is unrecoverable afterwards.
#[derive(Debug, Clone)]
pub struct CreatedShare {
    pub share_id: String,
    pub raw_token: String,
    pub share_url: String,
    pub expires_at: DateTime<Utc>,
}

/// Non-consuming validity check result.
#[derive(Debug, Clone)]
pub struct ShareStatus {
    pub vm_name: String,
    pub expires_at: DateTime<Utc>,
    pub console_type: ConsoleType,
}

/// Consuming redemption result carrying a one-time console URL.
#[derive(Debug, Clone)]
pub struct RedeemedAccess {
    pub console_url: String,
    pub vm_name: String,
    pub expires_at: DateTime<Utc>,
    pub console_type: ConsoleType,
}

// ─── Manager ──────────────────────────────────────────────────────────────────

pub struct ShareManager {
    pub(crate) store: Mutex<ShareStore>,
    client: Arc<CloudClient>,
    share_page_url: String,
    service_gate: Box<dyn ServiceGate>,
}

impl ShareManager {
    pub fn new(client: Arc<CloudClient>, store: ShareStore, share_page_url: impl Into<String>) -> Self {
        Self {
            store: Mutex::new(store),
            client,
            share_page_url: share_page_url.into(),
            service_gate: Box::new(AllowAllServices),
        }
    }

    pub fn with_service_gate(mut self, gate: Box<dyn ServiceGate>) -> Self {
        self.service_gate = gate;
        self
    }

    // ── Create ───────────────────────────────────────────────────────────────

    /// Issue a new share for a VM. The VM's live status must be ACTIVE at
    /// creation time; this is verified remotely, never from a cache.
    pub async fn create(
        &self,
        service_id: u64,
        vm_id: &str,
        expiry: ExpiryChoice,
        console_type: ConsoleType,
        name: Option<String>,
        created_by_user_id: Option<u64>,
    ) -> Result<CreatedShare, ShareError> {
        if !self.service_gate.is_active(service_id) {
            return Err(ShareError::ServiceNotActive);
        }

        let server = match self.client.get_server(vm_id).await {
            Ok(server) => server,
            Err(e) if e.is_remote_not_found() => return Err(ShareError::VmNotFound),
            Err(e) => return Err(ShareError::Api(e)),
        };
        if !server.status.is_active() {
            return Err(ShareError::VmNotActive {
                status: server.status,
            });
        }

        let (raw_token, token_hash) = generate_token();
        let now = Utc::now();
        let expires_at = now + expiry.duration();
        let share = ConsoleShare {
            id: Uuid::new_v4().to_string(),
            token_hash,
            service_id,
            vm_id: vm_id.to_string(),
            created_by_user_id,
            name,
            expires_at,
            console_type,
            revoked: false,
            revoked_at: None,
            revoked_reason: None,
            use_count: 0,
            last_used_at: None,
            last_used_ip: None,
            created_at: now,
            updated_at: now,
        };
        let share_id = share.id.clone();
        self.store.lock().insert(share)?;

        info!(
            share_id = %share_id,
            service_id,
            vm_id,
            expiry = expiry.as_str(),
            "console share created"
        );

        Ok(CreatedShare {
            share_id,
            raw_token: raw_token.clone(),
            share_url: format!("{}?token={raw_token}", self.share_page_url),
            expires_at,
        })
    }

    // ── Status (non-consuming) ───────────────────────────────────────────────

    /// Validity and metadata check. Never increments usage and never
    /// requires the VM to be reachable.
    pub fn status(&self, raw_token: &str) -> Result<ShareStatus, ShareError> {
        let share = self.lookup_valid(raw_token)?;
        Ok(ShareStatus {
            vm_name: share.display_name(),
            expires_at: share.expires_at,
            console_type: share.console_type,
        })
    }

    // ── Redeem (consuming) ───────────────────────────────────────────────────

    /// Redeem a token for a fresh console URL. Re-verifies revocation,
    /// expiry, and the VM's live ACTIVE status — a VM may have been stopped
    /// since the share was created — then records usage.
    pub async fn redeem(
        &self,
        raw_token: &str,
        client_ip: &str,
    ) -> Result<RedeemedAccess, ShareError> {
        let share = self.lookup_valid(raw_token)?;

        let server = match self.client.get_server(&share.vm_id).await {
            Ok(server) => server,
            Err(e) if e.is_remote_not_found() => return Err(ShareError::VmNotFound),
            Err(e) => return Err(ShareError::Api(e)),
        };
        if !server.status.is_active() {
            return Err(ShareError::VmNotActive {
                status: server.status,
            });
        }

        let console_url = self
            .client
            .console_url(&share.vm_id, share.console_type)
            .await
            .map_err(|e| {
                warn!(share_id = %share.id, error = %e, "console URL request failed");
                ShareError::ConsoleError(e.to_string())
            })?;

        self.store.lock().record_usage(&share.id, Some(client_ip))?;
        info!(
            share_id = %share.id,
            vm_id = %share.vm_id,
            ip = client_ip,
            "console share redeemed"
        );

        let vm_name = if server.name.is_empty() {
            share.display_name()
        } else {
            server.name
        };
        Ok(RedeemedAccess {
            console_url,
            vm_name,
            expires_at: share.expires_at,
            console_type: share.console_type,
        })
    }

    // ── Revoke ───────────────────────────────────────────────────────────────

    pub fn revoke(&self, share_id: &str, reason: &str) -> Result<(), ShareError> {
        self.store.lock().revoke(share_id, reason)?;
        info!(share_id, reason, "console share revoked");
        Ok(())
    }

    pub fn get_share(&self, share_id: &str) -> Option<ConsoleShare> {
        self.store.lock().get(share_id).cloned()
    }

    pub fn shares_for_service(&self, service_id: u64) -> Vec<ConsoleShare> {
        self.store
            .lock()
            .list_for_service(service_id)
            .into_iter()
            .cloned()
            .collect()
    }

    // ── Shared validation ────────────────────────────────────────────────────

    /// Format check, hash lookup, revocation, expiry, and the service gate —
    /// the checks shared by `status` and `redeem`, in that order.
    fn lookup_valid(&self, raw_token: &str) -> Result<ConsoleShare, ShareError> {
        if !validate_token_format(raw_token) {
            return Err(ShareError::TokenNotFound);
        }

        let share = self
            .store
            .lock()
            .find_by_raw_token(raw_token)
            .ok_or(ShareError::TokenNotFound)?;

        if share.revoked {
            return Err(ShareError::TokenRevoked);
        }
        if share.is_expired(Utc::now()) {
            return Err(ShareError::TokenExpired);
        }
        if !self.service_gate.is_active(share.service_id) {
            return Err(ShareError::ServiceNotActive);
        }
        Ok(share)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strato_client::Credential;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_identity(server: &MockServer) {
        let uri = server.uri();
        let expires_at = (Utc::now() + chrono::Duration::hours(1))
            .to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
        Mock::given(method("POST"))
            .and(path("/v3/auth/tokens"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("X-Subject-Token", "bearer-test")
                    .set_body_json(serde_json::json!({
                        "token": {
                            "expires_at": expires_at,
                            "catalog": [
                                { "type": "compute", "endpoints": [ { "interface": "public", "url": format!("{uri}/compute/v2.1") } ] }
                            ]
                        }
                    })),
            )
            .mount(server)
            .await;
    }

    async fn mount_server_status(server: &MockServer, vm_id: &str, status: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/compute/v2.1/servers/{vm_id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "server": { "id": vm_id, "name": "vm-console", "status": status }
            })))
            .mount(server)
            .await;
    }

    async fn mount_console(server: &MockServer, vm_id: &str) {
        Mock::given(method("POST"))
            .and(path(format!("/compute/v2.1/servers/{vm_id}/remote-consoles")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "remote_console": { "url": "https://console/session-1" }
            })))
            .mount(server)
            .await;
    }

    fn manager_for(server: &MockServer, dir: &std::path::Path) -> ShareManager {
        let credential = Credential::new(&server.uri(), "cred", "secret", None, true);
        let client = Arc::new(CloudClient::new(credential).expect("client"));
        ShareManager::new(client, ShareStore::new(dir), "https://panel.example/console")
    }

    #[tokio::test]
    async fn test_create_requires_active_vm() {
        let server = MockServer::start().await;
        mount_identity(&server).await;
        mount_server_status(&server, "srv-off", "SHUTOFF").await;
        mount_server_status(&server, "srv-on", "ACTIVE").await;

        let dir = tempfile::tempdir().expect("tempdir");
        let manager = manager_for(&server, dir.path());

        let err = manager
            .create(42, "srv-off", ExpiryChoice::OneDay, ConsoleType::Novnc, None, None)
            .await
            .expect_err("inactive VM must be rejected");
        assert!(matches!(err, ShareError::VmNotActive { .. }), "{err:?}");

        let created = manager
            .create(42, "srv-on", ExpiryChoice::OneDay, ConsoleType::Novnc, None, None)
            .await
            .expect("create");
        assert_eq!(created.raw_token.len(), 64);
        assert!(created.share_url.contains(&created.raw_token));
    }

    #[tokio::test]
    async fn test_raw_token_never_stored() {
        let server = MockServer::start().await;
        mount_identity(&server).await;
        mount_server_status(&server, "srv-on", "ACTIVE").await;

        let dir = tempfile::tempdir().expect("tempdir");
        let manager = manager_for(&server, dir.path());
        let created = manager
            .create(42, "srv-on", ExpiryChoice::OneDay, ConsoleType::Novnc, None, None)
            .await
            .expect("create");

        let store = manager.store.lock();
        let share = store.get(&created.share_id).expect("share");
        assert_ne!(share.token_hash, created.raw_token);
        let on_disk = std::fs::read_to_string(dir.path().join("console_shares.json")).expect("read");
        assert!(!on_disk.contains(&created.raw_token), "raw token must not persist");
    }

    #[tokio::test]
    async fn test_status_is_non_consuming() {
        let server = MockServer::start().await;
        mount_identity(&server).await;
        mount_server_status(&server, "srv-on", "ACTIVE").await;

        let dir = tempfile::tempdir().expect("tempdir");
        let manager = manager_for(&server, dir.path());
        let created = manager
            .create(42, "srv-on", ExpiryChoice::OneDay, ConsoleType::Novnc, None, None)
            .await
            .expect("create");

        let status = manager.status(&created.raw_token).expect("status");
        manager.status(&created.raw_token).expect("status again");
        assert_eq!(status.vm_name, "VM-42");

        let store = manager.store.lock();
        assert_eq!(store.get(&created.share_id).expect("share").use_count, 0);
    }

    #[tokio::test]
    async fn test_redeem_increments_usage_by_one() {
        let server = MockServer::start().await;
        mount_identity(&server).await;
        mount_server_status(&server, "srv-on", "ACTIVE").await;
        mount_console(&server, "srv-on").await;

        let dir = tempfile::tempdir().expect("tempdir");
        let manager = manager_for(&server, dir.path());
        let created = manager
            .create(42, "srv-on", ExpiryChoice::OneDay, ConsoleType::Novnc, None, None)
            .await
            .expect("create");

        let access = manager
            .redeem(&created.raw_token, "198.51.100.9")
            .await
            .expect("redeem");
        assert_eq!(access.console_url, "https://console/session-1");
        assert_eq!(access.vm_name, "vm-console");

        manager
            .redeem(&created.raw_token, "198.51.100.9")
            .await
            .expect("second redeem");

        let store = manager.store.lock();
        let share = store.get(&created.share_id).expect("share");
        assert_eq!(share.use_count, 2);
        assert_eq!(share.last_used_ip.as_deref(), Some("198.51.100.9"));
    }

    #[tokio::test]
    async fn test_redeem_rechecks_vm_state() {
        let server = MockServer::start().await;
        mount_identity(&server).await;
        // ACTIVE for creation, then SHUTOFF for redemption.
        Mock::given(method("GET"))
            .and(path("/compute/v2.1/servers/srv-flip"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "server": { "id": "srv-flip", "name": "vm", "status": "ACTIVE" }
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/compute/v2.1/servers/srv-flip"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "server": { "id": "srv-flip", "name": "vm", "status": "SHUTOFF" }
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let manager = manager_for(&server, dir.path());
        let created = manager
            .create(42, "srv-flip", ExpiryChoice::OneDay, ConsoleType::Novnc, None, None)
            .await
            .expect("create");

        let err = manager
            .redeem(&created.raw_token, "198.51.100.9")
            .await
            .expect_err("stopped VM must fail redemption");
        assert!(
            matches!(&err, ShareError::VmNotActive { status } if status.phrase() == "stopped"),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn test_revoked_share_stops_redeeming() {
        let server = MockServer::start().await;
        mount_identity(&server).await;
        mount_server_status(&server, "srv-on", "ACTIVE").await;
        mount_console(&server, "srv-on").await;

        let dir = tempfile::tempdir().expect("tempdir");
        let manager = manager_for(&server, dir.path());
        let created = manager
            .create(42, "srv-on", ExpiryChoice::OneDay, ConsoleType::Novnc, None, None)
            .await
            .expect("create");

        manager.revoke(&created.share_id, "owner request").expect("revoke");

        let err = manager
            .redeem(&created.raw_token, "198.51.100.9")
            .await
            .expect_err("revoked share must fail");
        assert!(matches!(err, ShareError::TokenRevoked), "{err:?}");

        let err = manager
            .revoke(&created.share_id, "again")
            .expect_err("double revoke must fail");
        assert!(matches!(err, ShareError::AlreadyRevoked(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_expired_share_reports_token_expired() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = manager_for(&server, dir.path());

        // Insert a share whose deadline is already in the past.
        let (raw, hash) = generate_token();
        let mut share = crate::store::tests::make_share("sh-expired", &hash);
        share.expires_at = Utc::now() - chrono::Duration::minutes(1);
        manager.store.lock().insert(share).expect("insert");

        let err = manager.status(&raw).expect_err("expired share must fail");
        assert!(matches!(err, ShareError::TokenExpired), "{err:?}");
    }

    #[tokio::test]
    async fn test_malformed_token_is_not_found() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = manager_for(&server, dir.path());

        let err = manager.status("short").expect_err("bad format");
        assert!(matches!(err, ShareError::TokenNotFound), "{err:?}");
        let err = manager
            .status(&"z".repeat(64))
            .expect_err("non-hex token");
        assert!(matches!(err, ShareError::TokenNotFound), "{err:?}");
    }
}
