//! Application-credential configuration and endpoint URL normalization.

/// Long-lived application credential plus the identity endpoint it is
/// exchanged at. Immutable for the lifetime of a session.
#[derive(Clone)]
pub struct Credential {
    identity_url: String,
    credential_id: String,
    credential_secret: String,
    tls_verify: bool,
}

impl Credential {
    /// Build a credential from operator-supplied server settings.
    ///
    /// `host` may be a bare hostname or a full URL; a bare hostname gets its
    /// scheme from `tls_verify`. `path` is an optional prefix such as
    /// `/openstack/14` for deployments behind a management proxy. The
    /// identity `/v3` suffix is appended when absent.
    pub fn new(
        host: &str,
        credential_id: impl Into<String>,
        credential_secret: impl Into<String>,
        path: Option<&str>,
        tls_verify: bool,
    ) -> Self {
        let host = host.trim();
        let mut url = if host.starts_with("http://") || host.starts_with("https://") {
            host.trim_end_matches('/').to_string()
        } else {
            let scheme = if tls_verify { "https" } else { "http" };
            format!("{scheme}://{}", host.trim_end_matches('/'))
        };

        if let Some(path) = path {
            let path = path.trim().trim_matches('/');
            if !path.is_empty() {
                url = format!("{url}/{path}");
            }
        }

        let url = url.trim_end_matches('/').to_string();
        let identity_url = if url.contains("/v3") {
            url
        } else {
            format!("{url}/v3")
        };

        Self {
            identity_url,
            credential_id: credential_id.into(),
            credential_secret: credential_secret.into(),
            tls_verify,
        }
    }

    /// Identity endpoint, always carrying the `/v3` segment.
    pub fn identity_url(&self) -> &str {
        &self.identity_url
    }

    /// Deployment base URL without the identity suffix.
    pub fn base_url(&self) -> &str {
        self.identity_url
            .strip_suffix("/v3")
            .unwrap_or(&self.identity_url)
    }

    pub fn credential_id(&self) -> &str {
        &self.credential_id
    }

    pub fn credential_secret(&self) -> &str {
        &self.credential_secret
    }

    pub fn tls_verify(&self) -> bool {
        self.tls_verify
    }
}

/// The secret never appears in logs.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("identity_url", &self.identity_url)
            .field("credential_id", &self.credential_id)
            .field("credential_secret", &"[REDACTED]")
            .field("tls_verify", &self.tls_verify)
            .finish()
    }
}
