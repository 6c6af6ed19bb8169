//! Lease data model
//!
//! Plain data types shared by the state machine, the dispatcher, the stores
//! and the transports.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};

/// Feature name to value mapping delivered with a lease
///
/// An empty value means the feature is absent. Ordered so that two maps
/// compare by content.
pub type FeatureMap = BTreeMap<String, String>;

/// Where a server location is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Visible to the current user only
    User,
    /// Visible to every user on the machine
    System,
}

impl Scope {
    /// Flag value selecting the system scope
    pub const SYSTEM_FLAG: u32 = 0x01;
    /// Flag value selecting the user scope
    pub const USER_FLAG: u32 = 0x02;

    /// Parse scope flags
    ///
    /// Exactly one of [`Scope::SYSTEM_FLAG`] and [`Scope::USER_FLAG`] must be set.
    pub fn from_flags(flags: u32) -> Result<Self> {
        let known = Self::SYSTEM_FLAG | Self::USER_FLAG;
        if flags & !known != 0 {
            return Err(Error::invalid_flags(format!("unknown scope flags {:#x}", flags)));
        }

        match (flags & Self::SYSTEM_FLAG != 0, flags & Self::USER_FLAG != 0) {
            (true, false) => Ok(Scope::System),
            (false, true) => Ok(Scope::User),
            (true, true) => Err(Error::invalid_flags(
                "system and user scope are mutually exclusive",
            )),
            (false, false) => Err(Error::invalid_flags("a scope flag is required")),
        }
    }

    /// The flag value for this scope
    pub fn flag(self) -> u32 {
        match self {
            Scope::System => Self::SYSTEM_FLAG,
            Scope::User => Self::USER_FLAG,
        }
    }

    /// The other scope
    pub fn other(self) -> Self {
        match self {
            Scope::System => Scope::User,
            Scope::User => Scope::System,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::User => f.write_str("user"),
            Scope::System => f.write_str("system"),
        }
    }
}

impl std::str::FromStr for Scope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "user" => Ok(Scope::User),
            "system" => Ok(Scope::System),
            other => match other.parse::<u32>() {
                Ok(flags) => Scope::from_flags(flags),
                Err(_) => Err(Error::invalid_flags(format!("unknown scope '{}'", s))),
            },
        }
    }
}

/// Address of the floating-license server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerLocation {
    /// Host name or IP address
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Scope the location was saved under
    pub scope: Scope,
}

impl ServerLocation {
    /// Create a new server location
    pub fn new(host: impl Into<String>, port: u16, scope: Scope) -> Self {
        Self {
            host: host.into(),
            port,
            scope,
        }
    }

    /// `host:port`, with IPv6 literals bracketed
    pub fn authority(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for ServerLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.authority(), self.scope)
    }
}

/// Opaque identifier binding a client to a product and an installation
///
/// Produced by a [`HandleResolver`](crate::traits::HandleResolver) and
/// immutable for the lifetime of the client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseHandle {
    id: String,
    product_guid: String,
    fingerprint: String,
}

impl LeaseHandle {
    /// Create a handle
    pub fn new(
        id: impl Into<String>,
        product_guid: impl Into<String>,
        fingerprint: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            product_guid: product_guid.into(),
            fingerprint: fingerprint.into(),
        }
    }

    /// The handle id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Product GUID the handle was resolved for
    pub fn product_guid(&self) -> &str {
        &self.product_guid
    }

    /// Installation fingerprint the handle is bound to
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl fmt::Display for LeaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Client-side lease lifecycle state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaseState {
    /// No lease, none requested
    #[default]
    None,
    /// Request sent, waiting for the server
    Pending,
    /// Lease granted and current
    Active,
    /// Renewal failed transiently, retrying before expiry
    Renewing,
    /// Lease lapsed without a successful renewal
    Expired,
    /// Lease released by the caller
    Dropped,
}

impl LeaseState {
    /// Whether a lease is currently held and usable
    pub fn is_held(self) -> bool {
        matches!(self, LeaseState::Active | LeaseState::Renewing)
    }

    /// Whether a new request must be refused
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            LeaseState::Pending | LeaseState::Active | LeaseState::Renewing
        )
    }
}

impl fmt::Display for LeaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LeaseState::None => "none",
            LeaseState::Pending => "pending",
            LeaseState::Active => "active",
            LeaseState::Renewing => "renewing",
            LeaseState::Expired => "expired",
            LeaseState::Dropped => "dropped",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of the lease
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lease {
    /// Current state
    pub state: LeaseState,
    /// Server-assigned lease id, if the server sent one
    pub lease_id: Option<String>,
    /// When the lease lapses unless renewed
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Features delivered with the last grant or renewal
    pub features: FeatureMap,
}

/// Notification kinds delivered to the registered callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeaseEventKind {
    /// The lease expired and could not be renewed
    Expired,
    /// The lease expired because the server could not be reached
    ExpiredNetwork,
    /// A renewal delivered a different feature set
    FeaturesChanged,
}

impl LeaseEventKind {
    /// Callback status code used by the licensing library
    pub fn code(self) -> u32 {
        match self {
            LeaseEventKind::Expired => 0x00,
            LeaseEventKind::ExpiredNetwork => 0x01,
            LeaseEventKind::FeaturesChanged => 0x02,
        }
    }

    /// Whether this notification means the lease is gone
    pub fn is_expiry(self) -> bool {
        matches!(self, LeaseEventKind::Expired | LeaseEventKind::ExpiredNetwork)
    }
}
