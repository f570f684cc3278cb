//! Service-catalog resolution with storage-service alias fallback.

use std::collections::HashMap;

/// Alias chains for block-storage naming variants across deployments.
/// Tried in declared order after an exact match fails.
const STORAGE_ALIASES: &[(&str, &[&str])] = &[
    ("volume", &["volumev3", "volumev2", "block-storage"]),
    ("volumev3", &["volume", "block-storage"]),
];

/// Public-interface endpoints keyed by service type, captured at
/// authentication time and replaced wholesale on every re-authentication.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceCatalog {
    endpoints: HashMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("service endpoint not found: {service} (available: {})", available.join(", "))]
    NotFound {
        service: String,
        available: Vec<String>,
    },
}

impl ServiceCatalog {
    pub fn new(endpoints: HashMap<String, String>) -> Self {
        Self { endpoints }
    }

    pub fn insert(&mut self, service_type: impl Into<String>, url: impl Into<String>) {
        self.endpoints.insert(service_type.into(), url.into());
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Service types present, sorted for stable diagnostics.
    pub fn service_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.endpoints.keys().cloned().collect();
        types.sort();
        types
    }

    /// Resolve a logical service type to its endpoint URL: exact match first,
    /// then the declared alias chain, failing only after exhausting all.
    pub fn resolve(&self, service: &str) -> Result<&str, CatalogError> {
        if let Some(url) = self.endpoints.get(service) {
            return Ok(url);
        }

        if let Some((_, aliases)) = STORAGE_ALIASES.iter().find(|(name, _)| *name == service) {
            for alias in *aliases {
                if let Some(url) = self.endpoints.get(*alias) {
                    return Ok(url);
                }
            }
        }

        Err(CatalogError::NotFound {
            service: service.to_string(),
            available: self.service_types(),
        })
    }
}
