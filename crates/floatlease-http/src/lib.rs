// # HTTP Lease Transport
//
// This crate talks to the floating-license server over HTTP/JSON.
//
// ## Endpoints
//
// - Request: POST `/v1/lease`
// - Renew:   POST `/v1/lease/renew`
// - Drop:    POST `/v1/lease/drop`
//
// Every call carries a `LeaseRequest` JSON body. The server answers with
// `{status, lease_id?, lease_duration_secs?, server_time?, features?}` where
// `status` is a library return code (0 = OK).
//
// ## Error Mapping
//
// - Connect failures → `Connection` (transient)
// - Timeouts → `ConnectionTimeout` (transient)
// - HTTP 426 → `UpgradeLibrary`
// - HTTP 5xx, unparseable or incomplete bodies → `Fail` (transient)
// - Nonzero `status` → the matching library error
//
// ## Forbidden Capabilities
//
// - ❌ Retry or back off (owned by the dispatcher)
// - ❌ Spawn tasks or threads (violates shutdown determinism)
// - ❌ Cache grants or server locations

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use floatlease_core::traits::{LeaseGrant, LeaseRequest, LeaseTransport};
use floatlease_core::{ClientConfig, Error, FeatureMap, Result, ServerLocation};
use serde::Deserialize;
use std::time::Duration;

/// Path of the request endpoint
const LEASE_PATH: &str = "/v1/lease";

/// Path of the renew endpoint
const RENEW_PATH: &str = "/v1/lease/renew";

/// Path of the drop endpoint
const DROP_PATH: &str = "/v1/lease/drop";

/// HTTP status the server uses to refuse outdated clients
const UPGRADE_REQUIRED: u16 = 426;

/// Response body shared by all endpoints
#[derive(Debug, Deserialize)]
struct LeaseResponse {
    status: u32,
    #[serde(default)]
    lease_id: Option<String>,
    #[serde(default)]
    lease_duration_secs: Option<u64>,
    #[serde(default)]
    server_time: Option<DateTime<Utc>>,
    #[serde(default)]
    features: Option<FeatureMap>,
}

impl LeaseResponse {
    /// Turn a nonzero status into the matching error
    fn check_status(self) -> Result<Self> {
        match Error::from_code(self.status) {
            None => Ok(self),
            Some(err) => Err(err),
        }
    }

    /// Build a grant from a successful response
    ///
    /// A grant without a positive duration is malformed.
    fn into_grant(self) -> Result<LeaseGrant> {
        let secs = match self.lease_duration_secs {
            Some(secs) if secs > 0 => secs,
            _ => return Err(Error::fail("response carries no lease duration")),
        };

        Ok(LeaseGrant {
            lease_id: self.lease_id,
            duration: Duration::from_secs(secs),
            features: self.features.unwrap_or_default(),
            server_time: self.server_time,
        })
    }
}

/// HTTP/JSON lease transport
///
/// Single-shot: each trait call is one POST. Connect and total timeouts
/// come from the client configuration.
pub struct HttpLeaseTransport {
    client: reqwest::Client,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl std::fmt::Debug for HttpLeaseTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpLeaseTransport")
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl HttpLeaseTransport {
    /// Create a transport with explicit timeouts
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .user_agent(concat!("floatlease/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            connect_timeout,
            request_timeout,
        })
    }

    /// Create a transport using the timeouts of a client configuration
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Self::new(config.connect_timeout(), config.request_timeout())
    }

    /// POST a request body and parse the answer
    async fn post(
        &self,
        location: &ServerLocation,
        path: &str,
        request: &LeaseRequest,
    ) -> Result<LeaseResponse> {
        let url = format!("http://{}{}", location.authority(), path);
        tracing::debug!("POST {} (handle {})", url, request.handle_id);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| send_error(location, e))?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| send_error(location, e))?;

        if !status.is_success() {
            return match status.as_u16() {
                UPGRADE_REQUIRED => Err(Error::UpgradeLibrary),
                500..=599 => Err(Error::fail(format!(
                    "Lease server error (transient): {}",
                    status
                ))),
                _ => {
                    // Some servers report a denial with a 4xx and a regular body
                    let denial = serde_json::from_slice::<LeaseResponse>(&body)
                        .ok()
                        .and_then(|parsed| Error::from_code(parsed.status));
                    Err(denial.unwrap_or_else(|| {
                        Error::fail(format!("Unexpected HTTP status from lease server: {}", status))
                    }))
                }
            };
        }

        let parsed: LeaseResponse = serde_json::from_slice(&body)
            .map_err(|e| Error::fail(format!("Failed to parse lease response: {}", e)))?;

        tracing::debug!("Lease server answered status {:#x}", parsed.status);
        parsed.check_status()
    }
}

/// Classify a reqwest failure
fn send_error(location: &ServerLocation, err: reqwest::Error) -> Error {
    if err.is_timeout() {
        tracing::debug!("Lease server {} timed out", location);
        Error::ConnectionTimeout
    } else if err.is_decode() || err.is_body() {
        Error::fail(format!("Failed to read lease response: {}", err))
    } else {
        Error::connection(format!("Failed to reach {}: {}", location, err))
    }
}

#[async_trait]
impl LeaseTransport for HttpLeaseTransport {
    async fn request(
        &self,
        location: &ServerLocation,
        request: &LeaseRequest,
    ) -> Result<LeaseGrant> {
        self.post(location, LEASE_PATH, request).await?.into_grant()
    }

    async fn renew(&self, location: &ServerLocation, request: &LeaseRequest) -> Result<LeaseGrant> {
        self.post(location, RENEW_PATH, request).await?.into_grant()
    }

    async fn drop_lease(&self, location: &ServerLocation, request: &LeaseRequest) -> Result<()> {
        self.post(location, DROP_PATH, request).await?;
        Ok(())
    }

    fn transport_name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use floatlease_core::error::codes;

    fn response(json: serde_json::Value) -> LeaseResponse {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_grant_requires_duration() {
        let missing = response(serde_json::json!({ "status": 0 }));
        assert!(matches!(missing.into_grant(), Err(Error::Fail(_))));

        let zero = response(serde_json::json!({ "status": 0, "lease_duration_secs": 0 }));
        assert!(matches!(zero.into_grant(), Err(Error::Fail(_))));
    }

    #[test]
    fn test_grant_defaults_to_no_features() {
        let grant = response(serde_json::json!({ "status": 0, "lease_duration_secs": 60 }))
            .into_grant()
            .unwrap();
        assert_eq!(grant.duration, Duration::from_secs(60));
        assert!(grant.features.is_empty());
        assert_eq!(grant.lease_id, None);
    }

    #[test]
    fn test_status_maps_to_error() {
        let denied = response(serde_json::json!({ "status": codes::USERNAME_NOT_ALLOWED }));
        assert!(matches!(denied.check_status(), Err(Error::UsernameNotAllowed)));

        let odd = response(serde_json::json!({ "status": 0x7f }));
        assert!(matches!(odd.check_status(), Err(Error::Unknown(0x7f))));
    }

    #[test]
    fn test_transport_name() {
        let transport =
            HttpLeaseTransport::new(Duration::from_secs(1), Duration::from_secs(2)).unwrap();
        assert_eq!(transport.transport_name(), "http");
        assert!(format!("{:?}", transport).contains("request_timeout"));
    }
}
