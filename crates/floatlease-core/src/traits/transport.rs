// # Lease Transport Trait
//
// Defines the interface for talking to the floating-license server.
//
// ## Implementations
//
// - HTTP/JSON: `floatlease-http` crate
//
// ## Usage
//
// ```rust,ignore
// use floatlease_core::traits::{LeaseTransport, LeaseRequest};
//
// let grant = transport.request(&location, &request).await?;
// println!("lease for {:?}", grant.duration);
// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::lease::{FeatureMap, LeaseHandle, ServerLocation};

/// Version string sent to the server so it can refuse outdated clients
pub const LIBRARY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Body of a request, renew or drop call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRequest {
    /// Product GUID from the data file
    pub product_guid: String,
    /// Installation fingerprint
    pub fingerprint: String,
    /// Client handle id
    pub handle_id: String,
    /// Name of the user requesting the seat (checked against the server whitelist)
    pub username: String,
    /// Client library version
    pub library_version: String,
    /// Lease id from the grant (renew and drop only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_id: Option<String>,
}

impl LeaseRequest {
    /// Build a request for a handle
    pub fn for_handle(handle: &LeaseHandle) -> Self {
        Self {
            product_guid: handle.product_guid().to_string(),
            fingerprint: handle.fingerprint().to_string(),
            handle_id: handle.id().to_string(),
            username: current_username(),
            library_version: LIBRARY_VERSION.to_string(),
            lease_id: None,
        }
    }

    /// Attach the lease id returned by the server
    pub fn with_lease_id(mut self, lease_id: Option<String>) -> Self {
        self.lease_id = lease_id;
        self
    }
}

/// Successful answer to a request or renewal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseGrant {
    /// Server-assigned lease id
    pub lease_id: Option<String>,
    /// How long the lease is valid from now
    pub duration: Duration,
    /// Complete feature set for this lease
    pub features: FeatureMap,
    /// Server clock at the time of the grant
    pub server_time: Option<chrono::DateTime<chrono::Utc>>,
}

impl LeaseGrant {
    /// Create a grant without features
    pub fn new(duration: Duration) -> Self {
        Self {
            lease_id: None,
            duration,
            features: FeatureMap::new(),
            server_time: None,
        }
    }

    /// Set the lease id
    pub fn with_lease_id(mut self, lease_id: impl Into<String>) -> Self {
        self.lease_id = Some(lease_id.into());
        self
    }

    /// Add a feature
    pub fn with_feature(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.features.insert(name.into(), value.into());
        self
    }

    /// Set the server time
    pub fn with_server_time(mut self, server_time: chrono::DateTime<chrono::Utc>) -> Self {
        self.server_time = Some(server_time);
        self
    }

    /// Reject a grant that lapses the moment it is applied
    pub fn validate(self) -> Result<Self, crate::Error> {
        if self.duration.is_zero() {
            return Err(crate::Error::fail("lease grant has zero duration"));
        }
        Ok(self)
    }
}

/// Trait for lease server transports
///
/// Each method is a single round trip. Implementations apply their own
/// connect and total timeouts and map every outcome to exactly one of:
/// a grant, a terminal denial, or a transient failure
/// ([`Error::is_transient`](crate::Error::is_transient)).
///
/// ## Forbidden Capabilities
/// - ❌ Retry or back off (owned by the dispatcher)
/// - ❌ Touch lease state (owned by the state machine)
/// - ❌ Spawn tasks
///
/// A malformed or incomplete response must be reported as
/// [`Error::Fail`](crate::Error::Fail), never as a grant.
#[async_trait]
pub trait LeaseTransport: Send + Sync {
    /// Ask the server for a new lease
    async fn request(
        &self,
        location: &ServerLocation,
        request: &LeaseRequest,
    ) -> Result<LeaseGrant, crate::Error>;

    /// Extend an existing lease
    ///
    /// The returned feature set replaces the previous one entirely.
    async fn renew(
        &self,
        location: &ServerLocation,
        request: &LeaseRequest,
    ) -> Result<LeaseGrant, crate::Error>;

    /// Release the seat held by this lease
    async fn drop_lease(
        &self,
        location: &ServerLocation,
        request: &LeaseRequest,
    ) -> Result<(), crate::Error>;

    /// Get the transport name (for logging/debugging)
    fn transport_name(&self) -> &'static str;
}

/// Name of the user running this process
fn current_username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default()
}
