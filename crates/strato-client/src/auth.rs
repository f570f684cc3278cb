//! Application-credential exchange and bearer-token caching.

use crate::catalog::ServiceCatalog;
use crate::credential::Credential;
use chrono::{DateTime, Duration, Utc};
use strato_gateway::{GatewayError, HttpGateway};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Tokens are refreshed once they are within this margin of expiry.
const REFRESH_MARGIN_SECS: i64 = 60;

// ─── Token ────────────────────────────────────────────────────────────────────

/// Short-lived bearer token plus the catalog that arrived with it.
/// Replaced wholesale on re-authentication, never mutated in place.
#[derive(Clone)]
pub struct AuthToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
    pub project_id: Option<String>,
    pub catalog: ServiceCatalog,
}

impl AuthToken {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at - Duration::seconds(REFRESH_MARGIN_SECS)
    }
}

/// The bearer value never appears in logs.
impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthToken")
            .field("value", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("project_id", &self.project_id)
            .field("catalog", &self.catalog.service_types())
            .finish()
    }
}

// ─── Errors ───────────────────────────────────────────────────────────────────

/// Authentication failures, each cause distinguishable so callers can tell
/// bad credentials from a bad URL from a dead network.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("authentication transport failure: {0}")]
    Transport(#[from] GatewayError),

    #[error("invalid credentials - check credential ID and secret")]
    InvalidCredentials,

    #[error("identity endpoint not found - check server URL format")]
    EndpointNotFound,

    #[error("authentication rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("no token header in authentication response")]
    MissingTokenHeader,

    #[error("malformed token response: {0}")]
    MalformedResponse(String),
}

// ─── Session ──────────────────────────────────────────────────────────────────

/// Owns the credential and the cached token. The check-and-refresh sequence
/// runs under one async mutex so concurrent callers never double-authenticate
/// or observe a half-replaced cache.
pub struct AuthSession {
    credential: Credential,
    gateway: HttpGateway,
    cached: Mutex<Option<AuthToken>>,
}

impl AuthSession {
    pub fn new(credential: Credential, gateway: HttpGateway) -> Self {
        Self {
            credential,
            gateway,
            cached: Mutex::new(None),
        }
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Return the cached token while it is more than 60s from expiry;
    /// otherwise perform a fresh exchange and replace the cache atomically.
    pub async fn authenticate(&self) -> Result<AuthToken, AuthError> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref()
            && token.is_fresh(Utc::now())
        {
            debug!(expires_at = %token.expires_at, "reusing cached token");
            return Ok(token.clone());
        }

        let token = self.exchange().await?;
        info!(
            project_id = token.project_id.as_deref().unwrap_or("-"),
            expires_at = %token.expires_at,
            services = token.catalog.service_types().len(),
            "authenticated"
        );
        *cached = Some(token.clone());
        Ok(token)
    }

    pub async fn project_id(&self) -> Result<Option<String>, AuthError> {
        Ok(self.authenticate().await?.project_id)
    }

    async fn exchange(&self) -> Result<AuthToken, AuthError> {
        let body = serde_json::json!({
            "auth": {
                "identity": {
                    "methods": ["application_credential"],
                    "application_credential": {
                        "id": self.credential.credential_id(),
                        "secret": self.credential.credential_secret(),
                    },
                },
            },
        });

        let url = format!("{}/auth/tokens", self.credential.identity_url());
        let resp = self.gateway.post(&url, &body, &[]).await?;

        match resp.status {
            401 => return Err(AuthError::InvalidCredentials),
            404 => return Err(AuthError::EndpointNotFound),
            status if !resp.is_success() => {
                return Err(AuthError::Rejected {
                    status,
                    message: resp.error_message(),
                });
            }
            _ => {}
        }

        let value = resp
            .header("x-subject-token")
            .ok_or(AuthError::MissingTokenHeader)?
            .to_string();

        let payload = resp
            .json()
            .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;
        let token = payload
            .get("token")
            .ok_or_else(|| AuthError::MalformedResponse("no token object in response".to_string()))?;

        let expires_at = token["expires_at"]
            .as_str()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| AuthError::MalformedResponse("missing or invalid expires_at".to_string()))?;

        let project_id = token["project"]["id"].as_str().map(String::from);

        // Only public-interface endpoints are retained, keyed by service type.
        let mut catalog = ServiceCatalog::default();
        if let Some(services) = token["catalog"].as_array() {
            for service in services {
                let Some(service_type) = service["type"].as_str() else {
                    continue;
                };
                if let Some(endpoints) = service["endpoints"].as_array()
                    && let Some(public) = endpoints
                        .iter()
                        .find(|e| e["interface"].as_str() == Some("public"))
                    && let Some(url) = public["url"].as_str()
                {
                    catalog.insert(service_type, url.trim_end_matches('/'));
                }
            }
        }

        Ok(AuthToken {
            value,
            expires_at,
            project_id,
            catalog,
        })
    }
}
