//! Authenticated cloud API client for Strato.
//!
//! Composes the credential exchange ([`AuthSession`]), service-catalog
//! resolution ([`ServiceCatalog`]), and HTTP dispatch (`strato-gateway`)
//! into [`CloudClient`], the typed façade every higher layer talks to.

#![forbid(unsafe_code)]

mod auth;
mod catalog;
mod client;
mod credential;

pub use auth::{AuthError, AuthSession, AuthToken};
pub use catalog::{CatalogError, ServiceCatalog};
pub use client::{CloudClient, ConnectionInfo};
pub use credential::Credential;

use strato_gateway::GatewayError;

/// Failure of one cloud API operation, with a typed cause so callers can
/// tell "credentials are wrong" from "URL is wrong" from "network is down".
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Transport(#[from] GatewayError),

    #[error("remote API error ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("malformed API response: {0}")]
    MalformedResponse(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Programmer/configuration error: a required field was not supplied.
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

impl ApiError {
    /// True when the remote side reported 404 for the addressed resource.
    pub fn is_remote_not_found(&self) -> bool {
        matches!(self, Self::Remote { status: 404, .. })
    }
}
