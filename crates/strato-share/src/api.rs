//! Public console-share API: the `status` and `access` actions.
//!
//! Both actions are keyed by a 64-hex token and rate-limited per client IP
//! before any token validation. Every failure maps onto the stable
//! machine-readable error-code table with its fixed HTTP status and a
//! non-leaky message; internal causes go to the log, not the response.

use crate::manager::ShareManager;
use crate::{RateLimiter, ShareError};
use serde_json::{Value, json};
use std::sync::Arc;
use strato_proto::ShareErrorCode;
use tracing::warn;

/// One JSON response ready for the host web layer to serialize verbatim.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

pub struct ShareApi {
    manager: Arc<ShareManager>,
    limiter: RateLimiter,
}

impl ShareApi {
    pub fn new(manager: Arc<ShareManager>) -> Self {
        Self::with_limiter(manager, RateLimiter::new())
    }

    pub fn with_limiter(manager: Arc<ShareManager>, limiter: RateLimiter) -> Self {
        Self { manager, limiter }
    }

    /// Non-consuming validity check.
    pub async fn handle_status(&self, token: &str, client_ip: &str) -> ApiResponse {
        if !self.limiter.check(client_ip) {
            return error_response(&ShareError::RateLimited);
        }

        match self.manager.status(token) {
            Ok(status) => ApiResponse {
                status: 200,
                body: json!({
                    "valid": true,
                    "vm_name": status.vm_name,
                    "expires_at": status.expires_at,
                    "console_type": status.console_type,
                }),
            },
            Err(e) => error_response(&e),
        }
    }

    /// Consuming redemption returning a one-time console URL.
    pub async fn handle_access(&self, token: &str, client_ip: &str) -> ApiResponse {
        if !self.limiter.check(client_ip) {
            return error_response(&ShareError::RateLimited);
        }

        match self.manager.redeem(token, client_ip).await {
            Ok(access) => ApiResponse {
                status: 200,
                body: json!({
                    "success": true,
                    "console_url": access.console_url,
                    "console_type": access.console_type,
                    "vm_name": access.vm_name,
                    "expires_at": access.expires_at,
                }),
            },
            Err(e) => error_response(&e),
        }
    }
}

/// Map a failure onto the public error-code table. The response message is
/// always the published one; internal detail stays in the log.
fn error_response(error: &ShareError) -> ApiResponse {
    let code = error.code();
    if code == ShareErrorCode::ServerError || code == ShareErrorCode::ApiError {
        warn!(error = %error, "share API internal failure");
    }

    let message = match error {
        ShareError::VmNotActive { status } => format!(
            "The virtual machine is currently {}. Console access requires the VM to be running.",
            status.phrase()
        ),
        _ => code.default_message().to_string(),
    };

    let mut body = json!({
        "success": false,
        "error": message,
        "error_code": code.as_str(),
        "message": message,
    });
    if let ShareError::VmNotActive { status } = error {
        body["vm_status"] = json!(status.as_str());
    }

    ApiResponse {
        status: code.http_status(),
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ShareStore;
    use crate::token::generate_token;
    use chrono::Duration;
    use strato_client::{CloudClient, Credential};
    use strato_proto::ServerStatus;

    fn offline_manager(dir: &std::path::Path) -> Arc<ShareManager> {
        // Points at a dead endpoint; fine for paths that never hit the API.
        let credential = Credential::new("127.0.0.1:9", "cred", "secret", None, false);
        let client = Arc::new(CloudClient::new(credential).expect("client"));
        Arc::new(ShareManager::new(
            client,
            ShareStore::new(dir),
            "https://panel.example/console",
        ))
    }

    #[tokio::test]
    async fn test_unknown_token_is_404_token_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let api = ShareApi::new(offline_manager(dir.path()));

        let resp = api.handle_status(&"a".repeat(64), "198.51.100.1").await;
        assert_eq!(resp.status, 404);
        assert_eq!(resp.body["error_code"], "TOKEN_NOT_FOUND");
        assert_eq!(resp.body["success"], false);
    }

    #[tokio::test]
    async fn test_status_returns_metadata_without_touching_the_vm() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = offline_manager(dir.path());

        let (raw, hash) = generate_token();
        let mut share = crate::store::tests::make_share("sh-1", &hash);
        share.name = Some("build box".to_string());
        manager.store.lock().insert(share).expect("insert");

        let api = ShareApi::new(manager.clone());
        let resp = api.handle_status(&raw, "198.51.100.1").await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body["valid"], true);
        assert_eq!(resp.body["vm_name"], "build box");
        assert_eq!(resp.body["console_type"], "novnc");

        let store = manager.store.lock();
        assert_eq!(store.get("sh-1").expect("share").use_count, 0);
    }

    #[tokio::test]
    async fn test_expired_share_is_403_token_expired() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = offline_manager(dir.path());

        let (raw, hash) = generate_token();
        let mut share = crate::store::tests::make_share("sh-old", &hash);
        share.expires_at = chrono::Utc::now() - Duration::minutes(5);
        manager.store.lock().insert(share).expect("insert");

        let api = ShareApi::new(manager);
        let resp = api.handle_status(&raw, "198.51.100.1").await;
        assert_eq!(resp.status, 403);
        assert_eq!(resp.body["error_code"], "TOKEN_EXPIRED");
    }

    #[tokio::test]
    async fn test_revoked_share_is_403_token_revoked() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = offline_manager(dir.path());

        let (raw, hash) = generate_token();
        manager
            .store
            .lock()
            .insert(crate::store::tests::make_share("sh-rev", &hash))
            .expect("insert");
        manager.store.lock().revoke("sh-rev", "owner request").expect("revoke");

        let api = ShareApi::new(manager);
        let resp = api.handle_access(&raw, "198.51.100.1").await;
        assert_eq!(resp.status, 403);
        assert_eq!(resp.body["error_code"], "TOKEN_REVOKED");
    }

    #[tokio::test]
    async fn test_sixty_first_request_from_one_ip_is_rate_limited() {
        let dir = tempfile::tempdir().expect("tempdir");
        let api = ShareApi::new(offline_manager(dir.path()));
        let token = "a".repeat(64);

        for i in 1..=60 {
            let resp = api.handle_status(&token, "203.0.113.50").await;
            assert_ne!(resp.status, 429, "request {i} must not be limited");
        }
        let resp = api.handle_status(&token, "203.0.113.50").await;
        assert_eq!(resp.status, 429);
        assert_eq!(resp.body["error_code"], "RATE_LIMITED");

        // A different IP is unaffected.
        let resp = api.handle_status(&token, "203.0.113.51").await;
        assert_ne!(resp.status, 429);
    }

    #[test]
    fn test_vm_not_active_message_carries_status() {
        let resp = error_response(&ShareError::VmNotActive {
            status: ServerStatus::Shutoff,
        });
        assert_eq!(resp.status, 503);
        assert_eq!(resp.body["error_code"], "VM_NOT_ACTIVE");
        assert_eq!(resp.body["vm_status"], "SHUTOFF");
        assert!(
            resp.body["message"]
                .as_str()
                .expect("message")
                .contains("currently stopped")
        );
    }
}
