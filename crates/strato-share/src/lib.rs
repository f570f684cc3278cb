//! Console-share subsystem for Strato.
//!
//! Issues cryptographically random share tokens for ephemeral VM console
//! access, stores only their SHA-256 hashes, and redeems them through a
//! rate-limited public API with a stable error-code contract. Shares are
//! soft-revoked and never deleted by the system.

#![forbid(unsafe_code)]

mod api;
mod limiter;
mod manager;
mod store;
mod token;

pub use api::{ApiResponse, ShareApi};
pub use limiter::{CounterStore, InMemoryCounterStore, RateLimiter};
pub use manager::{
    AllowAllServices, CreatedShare, RedeemedAccess, ServiceGate, ShareManager, ShareStatus,
};
pub use store::ShareStore;
pub use token::{constant_time_eq, generate_token, hash_token};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strato_client::ApiError;
use strato_proto::{ConsoleType, ServerStatus, ShareErrorCode};

// ─── Share record ─────────────────────────────────────────────────────────────

/// One console share. The raw token is surfaced exactly once at creation;
/// only its hash lives here. Mutations are limited to usage recording and
/// soft revocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleShare {
    pub id: String,
    pub token_hash: String,
    pub service_id: u64,
    pub vm_id: String,
    pub created_by_user_id: Option<u64>,
    pub name: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub console_type: ConsoleType,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<String>,
    pub use_count: u64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_used_ip: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConsoleShare {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    /// Display name for share pages: the creator-given label or a service
    /// placeholder. Never requires a remote call.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("VM-{}", self.service_id))
    }
}

// ─── Errors ───────────────────────────────────────────────────────────────────

/// Failures of share operations. Public-API-facing variants map 1:1 onto
/// [`ShareErrorCode`]; management-only variants surface to operators.
#[derive(Debug, thiserror::Error)]
pub enum ShareError {
    #[error("share token not found")]
    TokenNotFound,

    #[error("share token has been revoked")]
    TokenRevoked,

    #[error("share token has expired")]
    TokenExpired,

    #[error("virtual machine not found")]
    VmNotFound,

    #[error("virtual machine is {}", status.phrase())]
    VmNotActive { status: ServerStatus },

    #[error("associated service is not active")]
    ServiceNotActive,

    #[error("console unavailable: {0}")]
    ConsoleError(String),

    #[error("rate limited")]
    RateLimited,

    #[error("cloud API failure: {0}")]
    Api(#[from] ApiError),

    #[error("share storage failure: {0}")]
    Storage(String),

    #[error("share '{0}' not found")]
    ShareNotFound(String),

    #[error("share '{0}' is already revoked")]
    AlreadyRevoked(String),
}

impl ShareError {
    /// Public error code for this failure. Management-only variants fold
    /// into `SERVER_ERROR`; they never travel the public API in practice.
    pub fn code(&self) -> ShareErrorCode {
        match self {
            Self::TokenNotFound => ShareErrorCode::TokenNotFound,
            Self::TokenRevoked => ShareErrorCode::TokenRevoked,
            Self::TokenExpired => ShareErrorCode::TokenExpired,
            Self::VmNotFound => ShareErrorCode::VmNotFound,
            Self::VmNotActive { .. } => ShareErrorCode::VmNotActive,
            Self::ServiceNotActive => ShareErrorCode::ServiceNotActive,
            Self::ConsoleError(_) => ShareErrorCode::ConsoleError,
            Self::RateLimited => ShareErrorCode::RateLimited,
            Self::Api(_) => ShareErrorCode::ApiError,
            Self::Storage(_) | Self::ShareNotFound(_) | Self::AlreadyRevoked(_) => {
                ShareErrorCode::ServerError
            }
        }
    }
}
