//! Shared wiremock harness for Strato integration tests.
//!
//! Stands up a mock cloud whose identity endpoint routes every service in
//! the catalog back to the mock server itself, so full client → lifecycle →
//! share flows run against controlled remote behavior.

#![forbid(unsafe_code)]

use chrono::Utc;
use serde_json::Value;
use std::time::Duration;
use strato_client::{CloudClient, Credential};
use strato_lifecycle::PollPolicy;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Start a mock cloud with a full service catalog mounted on its identity
/// endpoint. Compute lives under `/compute/v2.1`, network under `/network`
/// (unversioned, exercising the version-segment append), image under
/// `/image`, block storage under `/volume/v3`.
pub async fn mock_cloud() -> MockServer {
    let server = MockServer::start().await;
    mount_identity(&server, 3600).await;
    server
}

/// Mount the identity exchange with an expectation of exactly `exchanges`
/// credential exchanges; used to prove token caching.
pub async fn mount_identity_counted(server: &MockServer, exchanges: u64) {
    let uri = server.uri();
    let expires_at = (Utc::now() + chrono::Duration::hours(1))
        .to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
    Mock::given(method("POST"))
        .and(path("/v3/auth/tokens"))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("X-Subject-Token", "bearer-counted")
                .set_body_json(serde_json::json!({
                    "token": {
                        "expires_at": expires_at,
                        "catalog": [
                            { "type": "compute", "endpoints": [ { "interface": "public", "url": format!("{uri}/compute/v2.1") } ] }
                        ]
                    }
                })),
        )
        .expect(exchanges)
        .mount(server)
        .await;
}

/// Mount the identity exchange with a token lasting `expires_in_secs`.
pub async fn mount_identity(server: &MockServer, expires_in_secs: i64) {
    let uri = server.uri();
    let expires_at = (Utc::now() + chrono::Duration::seconds(expires_in_secs))
        .to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
    Mock::given(method("POST"))
        .and(path("/v3/auth/tokens"))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("X-Subject-Token", "bearer-integration")
                .set_body_json(serde_json::json!({
                    "token": {
                        "expires_at": expires_at,
                        "project": { "id": "proj-integration" },
                        "catalog": [
                            { "type": "compute", "endpoints": [ { "interface": "public", "url": format!("{uri}/compute/v2.1") } ] },
                            { "type": "network", "endpoints": [ { "interface": "public", "url": format!("{uri}/network") } ] },
                            { "type": "image", "endpoints": [ { "interface": "public", "url": format!("{uri}/image") } ] },
                            { "type": "volumev3", "endpoints": [ { "interface": "public", "url": format!("{uri}/volume/v3") } ] }
                        ]
                    }
                })),
        )
        .mount(server)
        .await;
}

pub fn client_for(server: &MockServer) -> CloudClient {
    let credential = Credential::new(&server.uri(), "cred-it", "secret-it", None, true);
    CloudClient::new(credential).expect("client")
}

/// Millisecond-scale polling so state-machine tests finish quickly.
pub fn fast_policy() -> PollPolicy {
    PollPolicy {
        interval: Duration::from_millis(10),
        create_budget: Duration::from_millis(500),
        power_budget: Duration::from_millis(500),
        resize_budget: Duration::from_millis(500),
    }
}

pub fn server_body(id: &str, status: &str) -> Value {
    serde_json::json!({
        "server": {
            "id": id,
            "name": format!("vm-{id}"),
            "status": status,
            "flavor": { "id": "f-1" },
            "addresses": {
                "public": [
                    { "addr": "203.0.113.20", "version": 4 },
                    { "addr": "2001:db8::20", "version": 6 }
                ]
            }
        }
    })
}

pub fn volume_body(id: &str, size_gb: u64) -> Value {
    serde_json::json!({
        "volume": { "id": id, "size": size_gb, "status": "in-use" }
    })
}

/// Mount `GET /servers/{id}` returning `statuses` in order, the last one
/// repeating indefinitely.
pub async fn mount_server_statuses(server: &MockServer, id: &str, statuses: &[&str]) {
    let route = format!("/compute/v2.1/servers/{id}");
    if let Some((last, head)) = statuses.split_last() {
        for status in head {
            Mock::given(method("GET"))
                .and(path(route.clone()))
                .respond_with(ResponseTemplate::new(200).set_body_json(server_body(id, status)))
                .up_to_n_times(1)
                .mount(server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_json(server_body(id, last)))
            .mount(server)
            .await;
    }
}
