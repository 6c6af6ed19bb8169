//! Error types for the lease client
//!
//! Every return code of the licensing library has its own variant, so callers
//! can match exhaustively instead of inspecting integers. The numeric codes are
//! still reachable through [`Error::code`] and [`Error::from_code`] because the
//! lease server speaks them on the wire.

use thiserror::Error;

/// Result type alias for lease client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric return codes understood by the lease server
pub mod codes {
    pub const OK: u32 = 0x00;
    pub const FAIL: u32 = 0x01;
    pub const NO_SERVER: u32 = 0x02;
    pub const NO_CALLBACK: u32 = 0x03;
    pub const INET: u32 = 0x04;
    pub const NO_FREE_LEASES: u32 = 0x05;
    pub const LEASE_EXISTS: u32 = 0x06;
    pub const WRONG_TIME: u32 = 0x07;
    pub const DATA_FILE: u32 = 0x08;
    pub const INVALID_HANDLE: u32 = 0x09;
    pub const NO_LEASE: u32 = 0x0A;
    pub const COM: u32 = 0x0B;
    pub const INSUFFICIENT_BUFFER: u32 = 0x0C;
    pub const PERMISSION: u32 = 0x0D;
    pub const INVALID_FLAGS: u32 = 0x0E;
    pub const WRONG_SERVER_PRODUCT: u32 = 0x0F;
    pub const INET_TIMEOUT: u32 = 0x10;
    pub const UPGRADE_LIBRARY: u32 = 0x11;
    pub const USERNAME_NOT_ALLOWED: u32 = 0x12;
    pub const ENABLE_NETWORK_ADAPTERS: u32 = 0x1C;
}

/// Core error type for the lease client
#[derive(Error, Debug)]
pub enum Error {
    /// Generic failure reported by the server or the client
    #[error("Lease operation failed: {0}")]
    Fail(String),

    /// No server location has been saved
    #[error("No lease server configured. Save a server location before requesting a lease")]
    NoServer,

    /// A callback is required but none was registered
    #[error("No lease callback registered")]
    NoCallback,

    /// Connection to the lease server failed
    #[error("Connection to the lease server failed: {0}")]
    Connection(String),

    /// The server has no free seats left
    #[error("No free leases available on the lease server")]
    NoFreeLeases,

    /// A lease is already held (or being requested) for this handle
    #[error("A lease already exists for this handle")]
    LeaseExists,

    /// The system clock disagrees with the server or was turned back
    #[error("System date and time are wrong or have been tampered with")]
    WrongTime,

    /// The product data file could not be loaded or does not match the product
    #[error("Product data file failed to load: {0}")]
    DataFile(String),

    /// The handle is not valid (never resolved or already shut down)
    #[error("Invalid lease handle")]
    InvalidHandle,

    /// There is no lease to operate on
    #[error("No lease is held for this handle")]
    NoLease,

    /// Hardware id generation failed in the platform management layer
    #[error("Hardware id could not be generated by the platform management service")]
    Com,

    /// The caller-supplied output buffer is too small
    #[error("Output buffer too small: {required} bytes required")]
    InsufficientBuffer {
        /// Size the buffer must have, in bytes
        required: usize,
    },

    /// Elevated privilege is needed for the requested scope
    #[error("Insufficient permission for system scope. Use user scope or run elevated")]
    Permission,

    /// Flags were missing, unknown or mutually exclusive
    #[error("Invalid flags: {0}")]
    InvalidFlags(String),

    /// The server cannot hand out leases for this product version
    #[error("The lease server does not serve this product version")]
    WrongServerProduct,

    /// The connection timed out
    #[error("Connection to the lease server timed out")]
    ConnectionTimeout,

    /// The client library is too old for the server
    #[error("The lease server requires a newer client library")]
    UpgradeLibrary,

    /// The current user is not on the server's whitelist
    #[error("The current username is not allowed to request a lease")]
    UsernameNotAllowed,

    /// No usable hardware identifiers could be read
    #[error("Hardware identifiers unavailable. Enable the network adapters and retry")]
    EnableNetworkAdapters,

    /// A return code this client does not know about
    #[error("Unknown lease server return code {0:#x}")]
    Unknown(u32),

    /// Server location store errors
    #[error("Server location store error: {0}")]
    StateStore(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a generic failure
    pub fn fail(msg: impl Into<String>) -> Self {
        Self::Fail(msg.into())
    }

    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a data file error
    pub fn data_file(msg: impl Into<String>) -> Self {
        Self::DataFile(msg.into())
    }

    /// Create an invalid flags error
    pub fn invalid_flags(msg: impl Into<String>) -> Self {
        Self::InvalidFlags(msg.into())
    }

    /// Create a state store error
    pub fn state_store(msg: impl Into<String>) -> Self {
        Self::StateStore(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Map a server return code to an error
    ///
    /// Returns `None` for [`codes::OK`].
    pub fn from_code(code: u32) -> Option<Self> {
        let err = match code {
            codes::OK => return None,
            codes::FAIL => Self::fail("server returned FAIL"),
            codes::NO_SERVER => Self::NoServer,
            codes::NO_CALLBACK => Self::NoCallback,
            codes::INET => Self::connection("server reported a connection failure"),
            codes::NO_FREE_LEASES => Self::NoFreeLeases,
            codes::LEASE_EXISTS => Self::LeaseExists,
            codes::WRONG_TIME => Self::WrongTime,
            codes::DATA_FILE => Self::data_file("server rejected the product details"),
            codes::INVALID_HANDLE => Self::InvalidHandle,
            codes::NO_LEASE => Self::NoLease,
            codes::COM => Self::Com,
            codes::INSUFFICIENT_BUFFER => Self::InsufficientBuffer { required: 0 },
            codes::PERMISSION => Self::Permission,
            codes::INVALID_FLAGS => Self::invalid_flags("server rejected the request flags"),
            codes::WRONG_SERVER_PRODUCT => Self::WrongServerProduct,
            codes::INET_TIMEOUT => Self::ConnectionTimeout,
            codes::UPGRADE_LIBRARY => Self::UpgradeLibrary,
            codes::USERNAME_NOT_ALLOWED => Self::UsernameNotAllowed,
            codes::ENABLE_NETWORK_ADAPTERS => Self::EnableNetworkAdapters,
            other => Self::Unknown(other),
        };
        Some(err)
    }

    /// The return code this error corresponds to
    ///
    /// Ambient errors (store, config, I/O) report as [`codes::FAIL`].
    pub fn code(&self) -> u32 {
        match self {
            Self::Fail(_) => codes::FAIL,
            Self::NoServer => codes::NO_SERVER,
            Self::NoCallback => codes::NO_CALLBACK,
            Self::Connection(_) => codes::INET,
            Self::NoFreeLeases => codes::NO_FREE_LEASES,
            Self::LeaseExists => codes::LEASE_EXISTS,
            Self::WrongTime => codes::WRONG_TIME,
            Self::DataFile(_) => codes::DATA_FILE,
            Self::InvalidHandle => codes::INVALID_HANDLE,
            Self::NoLease => codes::NO_LEASE,
            Self::Com => codes::COM,
            Self::InsufficientBuffer { .. } => codes::INSUFFICIENT_BUFFER,
            Self::Permission => codes::PERMISSION,
            Self::InvalidFlags(_) => codes::INVALID_FLAGS,
            Self::WrongServerProduct => codes::WRONG_SERVER_PRODUCT,
            Self::ConnectionTimeout => codes::INET_TIMEOUT,
            Self::UpgradeLibrary => codes::UPGRADE_LIBRARY,
            Self::UsernameNotAllowed => codes::USERNAME_NOT_ALLOWED,
            Self::EnableNetworkAdapters => codes::ENABLE_NETWORK_ADAPTERS,
            Self::Unknown(code) => *code,
            Self::StateStore(_)
            | Self::Config(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Other(_) => codes::FAIL,
        }
    }

    /// Whether the dispatcher may retry after this error
    ///
    /// Connection failures, timeouts and generic server failures are transient.
    /// Everything else is a terminal answer.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::ConnectionTimeout | Self::Fail(_)
        )
    }

    /// Whether the error came from the network layer rather than the server
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::ConnectionTimeout)
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
