//! # Integration Tests for the HTTP Lease Transport
//!
//! Runs `HttpLeaseTransport` against wiremock servers to verify request
//! construction, response parsing and the mapping of every failure mode
//! onto the library's error taxonomy.

use floatlease_core::error::codes;
use floatlease_core::traits::{LeaseRequest, LeaseTransport};
use floatlease_core::{Error, Scope, ServerLocation};
use floatlease_http::HttpLeaseTransport;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn location_of(server: &MockServer) -> ServerLocation {
    let addr = server.address();
    ServerLocation::new(addr.ip().to_string(), addr.port(), Scope::User)
}

fn transport() -> HttpLeaseTransport {
    HttpLeaseTransport::new(Duration::from_secs(2), Duration::from_secs(5)).expect("transport")
}

fn lease_request() -> LeaseRequest {
    LeaseRequest {
        product_guid: "2e1b6a2c-0000-4000-8000-000000000001".to_string(),
        fingerprint: "fp-http".to_string(),
        handle_id: "handle-7".to_string(),
        username: "alice".to_string(),
        library_version: "0.1.0".to_string(),
        lease_id: None,
    }
}

#[tokio::test]
async fn request_parses_grant() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/lease"))
        .and(body_partial_json(serde_json::json!({
            "handle_id": "handle-7",
            "fingerprint": "fp-http",
            "username": "alice"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": 0,
            "lease_id": "L-100",
            "lease_duration_secs": 300,
            "server_time": "2026-05-01T12:00:00Z",
            "features": { "max-streams": "4", "edition": "pro" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let grant = transport()
        .request(&location_of(&server), &lease_request())
        .await
        .expect("grant");

    assert_eq!(grant.lease_id.as_deref(), Some("L-100"));
    assert_eq!(grant.duration, Duration::from_secs(300));
    assert_eq!(grant.features.get("edition").map(String::as_str), Some("pro"));
    assert_eq!(grant.features.len(), 2);
    assert_eq!(
        grant.server_time.map(|t| t.to_rfc3339()),
        Some("2026-05-01T12:00:00+00:00".to_string())
    );
}

#[tokio::test]
async fn renew_sends_lease_id() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/lease/renew"))
        .and(body_partial_json(serde_json::json!({ "lease_id": "L-100" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": 0,
            "lease_id": "L-100",
            "lease_duration_secs": 120
        })))
        .expect(1)
        .mount(&server)
        .await;

    let request = lease_request().with_lease_id(Some("L-100".to_string()));
    let grant = transport()
        .renew(&location_of(&server), &request)
        .await
        .expect("renewal");

    assert_eq!(grant.duration, Duration::from_secs(120));
    assert!(grant.features.is_empty());
}

#[tokio::test]
async fn drop_accepts_ok_status() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/lease/drop"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": 0 })))
        .expect(1)
        .mount(&server)
        .await;

    let request = lease_request().with_lease_id(Some("L-100".to_string()));
    transport()
        .drop_lease(&location_of(&server), &request)
        .await
        .expect("drop");
}

#[tokio::test]
async fn denial_status_maps_to_library_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/lease"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "status": codes::NO_FREE_LEASES })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let result = transport()
        .request(&location_of(&server), &lease_request())
        .await;
    assert!(matches!(result, Err(Error::NoFreeLeases)));
}

#[tokio::test]
async fn client_error_with_denial_body_keeps_the_code() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/lease"))
        .respond_with(
            ResponseTemplate::new(403)
                .set_body_json(serde_json::json!({ "status": codes::USERNAME_NOT_ALLOWED })),
        )
        .mount(&server)
        .await;

    let result = transport()
        .request(&location_of(&server), &lease_request())
        .await;
    assert!(matches!(result, Err(Error::UsernameNotAllowed)));
}

#[tokio::test]
async fn server_error_is_transient_fail() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/lease/renew"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .expect(1)
        .mount(&server)
        .await;

    let err = transport()
        .renew(&location_of(&server), &lease_request())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Fail(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn upgrade_required_maps_to_upgrade_library() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/lease"))
        .respond_with(ResponseTemplate::new(426))
        .mount(&server)
        .await;

    let err = transport()
        .request(&location_of(&server), &lease_request())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UpgradeLibrary));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn malformed_body_is_fail() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/lease"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy</html>"))
        .mount(&server)
        .await;

    let result = transport()
        .request(&location_of(&server), &lease_request())
        .await;
    assert!(matches!(result, Err(Error::Fail(_))));
}

#[tokio::test]
async fn grant_without_duration_is_fail() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/lease"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": 0,
            "lease_id": "L-1"
        })))
        .mount(&server)
        .await;

    let result = transport()
        .request(&location_of(&server), &lease_request())
        .await;
    assert!(matches!(result, Err(Error::Fail(_))));
}

#[tokio::test]
async fn slow_server_times_out() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/lease"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "status": 0, "lease_duration_secs": 60 }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let transport =
        HttpLeaseTransport::new(Duration::from_secs(1), Duration::from_secs(1)).expect("transport");
    let result = transport
        .request(&location_of(&server), &lease_request())
        .await;
    assert!(matches!(result, Err(Error::ConnectionTimeout)));
}

#[tokio::test]
async fn refused_connection_is_connection_error() {
    // Bind then release a port so nothing is listening on it
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);

    let location = ServerLocation::new("127.0.0.1", port, Scope::User);
    let err = transport()
        .request(&location, &lease_request())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Connection(_)));
    assert!(err.is_network());
}
