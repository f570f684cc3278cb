//! HTTP gateway for Strato.
//!
//! One configured [`reqwest`] client behind a small request surface: fixed
//! timeout, TLS-verification policy, bounded redirects, JSON content
//! negotiation, and normalization of the heterogeneous error envelopes the
//! remote services return.

#![forbid(unsafe_code)]

use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

pub use reqwest::Method;

// ─── Configuration ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub timeout: Duration,
    pub tls_verify: bool,
    pub max_redirects: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            tls_verify: true,
            max_redirects: 5,
        }
    }
}

// ─── Errors ───────────────────────────────────────────────────────────────────

/// Transport-level failures. Non-2xx responses are not errors at this layer;
/// callers classify those from the returned [`GatewayResponse`].
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("TLS error: {0} (certificate validation failed - try disabling strict TLS verification)")]
    Tls(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

// ─── Response ─────────────────────────────────────────────────────────────────

/// Captured response: status, body, and lowercased header map.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: u16,
    pub body: String,
    pub headers: HashMap<String, String>,
}

/// Ordered field paths tried when extracting a human-readable message from
/// an error body. First present wins.
const ERROR_MESSAGE_PATHS: &[&[&str]] = &[
    &["error", "message"],
    &["badRequest", "message"],
    &["message"],
    &["error"],
];

impl GatewayResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.body)
    }

    /// Best available error message for a non-2xx response.
    pub fn error_message(&self) -> String {
        if let Ok(body) = self.json() {
            for path in ERROR_MESSAGE_PATHS {
                if let Some(message) = lookup_str(&body, path) {
                    return message.to_string();
                }
            }
        }
        format!("HTTP error: {}", self.status)
    }
}

fn lookup_str<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    let mut current = value;
    for segment in path {
        current = current.get(segment)?;
    }
    current.as_str()
}

// ─── Gateway ──────────────────────────────────────────────────────────────────

/// HTTP request dispatcher shared by every remote operation.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .danger_accept_invalid_certs(!config.tls_verify)
            .default_headers(headers)
            .build()
            .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;

        Ok(Self {
            client,
            timeout: config.timeout,
        })
    }

    /// Issue one request. `body` is JSON-encoded when present; `extra_headers`
    /// are applied on top of the JSON negotiation defaults.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        extra_headers: &[(&str, &str)],
    ) -> Result<GatewayResponse, GatewayError> {
        let mut request = self.client.request(method.clone(), url);

        if let Some(body) = body {
            request = request.json(body);
        }
        for (name, value) in extra_headers {
            request = request.header(*name, *value);
        }

        debug!(%method, url, "dispatching request");

        let response = request.send().await.map_err(|e| self.classify(e))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_ascii_lowercase(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.text().await.map_err(|e| self.classify(e))?;

        debug!(%method, url, status, "response received");

        Ok(GatewayResponse {
            status,
            body,
            headers,
        })
    }

    pub async fn get(&self, url: &str, extra_headers: &[(&str, &str)]) -> Result<GatewayResponse, GatewayError> {
        self.request(Method::GET, url, None, extra_headers).await
    }

    pub async fn post(
        &self,
        url: &str,
        body: &Value,
        extra_headers: &[(&str, &str)],
    ) -> Result<GatewayResponse, GatewayError> {
        self.request(Method::POST, url, Some(body), extra_headers).await
    }

    pub async fn delete(&self, url: &str, extra_headers: &[(&str, &str)]) -> Result<GatewayResponse, GatewayError> {
        self.request(Method::DELETE, url, None, extra_headers).await
    }

    fn classify(&self, error: reqwest::Error) -> GatewayError {
        if error.is_timeout() {
            return GatewayError::Timeout(self.timeout);
        }
        if error.is_builder() {
            return GatewayError::InvalidRequest(error.to_string());
        }

        let chain = error_chain(&error);
        let lowered = chain.to_ascii_lowercase();
        if lowered.contains("certificate") || lowered.contains("tls") || lowered.contains("handshake") {
            GatewayError::Tls(chain)
        } else {
            GatewayError::Connect(chain)
        }
    }
}

/// Flatten an error and its sources into one message, innermost last.
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut parts = vec![error.to_string()];
    let mut source = error.source();
    while let Some(inner) = source {
        parts.push(inner.to_string());
        source = inner.source();
    }
    parts.join(": ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn response(status: u16, body: &str) -> GatewayResponse {
        GatewayResponse {
            status,
            body: body.to_string(),
            headers: HashMap::new(),
        }
    }

    // ── Error-envelope extraction ─────────────────────────────────────────────

    #[test]
    fn test_error_message_prefers_nested_error_message() {
        let resp = response(
            400,
            r#"{"error":{"message":"flavor not found"},"message":"outer"}"#,
        );
        assert_eq!(resp.error_message(), "flavor not found");
    }

    #[test]
    fn test_error_message_bad_request_envelope() {
        let resp = response(400, r#"{"badRequest":{"message":"invalid network"}}"#);
        assert_eq!(resp.error_message(), "invalid network");
    }

    #[test]
    fn test_error_message_flat_message() {
        let resp = response(409, r#"{"message":"conflict"}"#);
        assert_eq!(resp.error_message(), "conflict");
    }

    #[test]
    fn test_error_message_flat_error_string() {
        let resp = response(500, r#"{"error":"boom"}"#);
        assert_eq!(resp.error_message(), "boom");
    }

    #[test]
    fn test_error_message_falls_back_to_status() {
        assert_eq!(response(502, "not json").error_message(), "HTTP error: 502");
        assert_eq!(response(503, r#"{"other":1}"#).error_message(), "HTTP error: 503");
    }

    #[test]
    fn test_is_success_bounds() {
        assert!(response(200, "").is_success());
        assert!(response(204, "").is_success());
        assert!(!response(302, "").is_success());
        assert!(!response(404, "").is_success());
    }

    // ── Request flow ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_request_captures_status_body_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"ok":true}"#)
                    .insert_header("X-Subject-Token", "tok-123"),
            )
            .mount(&server)
            .await;

        let gateway = HttpGateway::new(&GatewayConfig::default()).expect("gateway");
        let resp = gateway
            .get(&format!("{}/ping", server.uri()), &[])
            .await
            .expect("request");

        assert_eq!(resp.status, 200);
        assert_eq!(resp.header("x-subject-token"), Some("tok-123"));
        assert_eq!(resp.header("X-Subject-Token"), Some("tok-123"));
        assert!(resp.json().expect("json")["ok"].as_bool().expect("bool"));
    }

    #[tokio::test]
    async fn test_request_sends_json_body_and_extra_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/servers"))
            .and(header("content-type", "application/json"))
            .and(header("X-Auth-Token", "tok-abc"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = HttpGateway::new(&GatewayConfig::default()).expect("gateway");
        let resp = gateway
            .post(
                &format!("{}/servers", server.uri()),
                &serde_json::json!({"server": {"name": "vm-1"}}),
                &[("X-Auth-Token", "tok-abc")],
            )
            .await
            .expect("request");

        assert_eq!(resp.status, 202);
    }

    #[tokio::test]
    async fn test_non_2xx_is_not_a_gateway_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(
                ResponseTemplate::new(404).set_body_string(r#"{"error":{"message":"gone"}}"#),
            )
            .mount(&server)
            .await;

        let gateway = HttpGateway::new(&GatewayConfig::default()).expect("gateway");
        let resp = gateway
            .get(&format!("{}/missing", server.uri()), &[])
            .await
            .expect("transport must succeed");

        assert!(!resp.is_success());
        assert_eq!(resp.error_message(), "gone");
    }

    #[tokio::test]
    async fn test_connect_failure_classified() {
        // Port 9 (discard) on localhost should refuse the connection.
        let gateway = HttpGateway::new(&GatewayConfig {
            timeout: Duration::from_secs(2),
            ..GatewayConfig::default()
        })
        .expect("gateway");

        let err = gateway
            .get("http://127.0.0.1:9/unreachable", &[])
            .await
            .expect_err("must fail");

        assert!(
            matches!(err, GatewayError::Connect(_) | GatewayError::Timeout(_)),
            "unexpected classification: {err:?}"
        );
    }
}
