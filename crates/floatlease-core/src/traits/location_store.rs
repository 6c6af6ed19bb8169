// # Server Location Store Trait
//
// Defines the interface for persisting the lease server address.
//
// ## Purpose
//
// The server location is written once (typically by an installer) and read
// on every lease request. One location is kept per scope.
//
// ## Implementations
//
// - File-based: `FileLocationStore` (one JSON record per scope)
// - In-memory: `MemoryLocationStore` (tests and embedding)
//
// ## Privilege Rule
//
// Writing the system scope needs an elevated process the first time only.
// Once an elevated process has written (or provisioned) the system record,
// unprivileged processes may read and overwrite it.

use async_trait::async_trait;

use crate::lease::{Scope, ServerLocation};

/// Trait for server location store implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
///
/// Implementations never swallow errors: a failed write is reported to the
/// caller as [`Error::Permission`](crate::Error::Permission) or
/// [`Error::StateStore`](crate::Error::StateStore).
#[async_trait]
pub trait ServerLocationStore: Send + Sync {
    /// Load the location saved under `scope`
    ///
    /// # Returns
    ///
    /// - `Ok(Some(location))`: A location is saved
    /// - `Ok(None)`: Nothing saved (or the record is only provisioned)
    /// - `Err(Error)`: Storage error
    async fn load(&self, scope: Scope) -> Result<Option<ServerLocation>, crate::Error>;

    /// Save a location, replacing any previous one in the same scope
    async fn save(&self, location: &ServerLocation) -> Result<(), crate::Error>;

    /// Create the record for `scope` without a location
    ///
    /// Used by elevated installers to open the system scope for later
    /// unprivileged writes.
    async fn provision(&self, scope: Scope) -> Result<(), crate::Error>;

    /// Remove the location saved under `scope`
    async fn clear(&self, scope: Scope) -> Result<(), crate::Error>;

    /// Get the store name (for logging/debugging)
    fn store_name(&self) -> &'static str;
}

/// Whether the current process runs with elevated privilege
#[cfg(unix)]
pub fn process_is_elevated() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() == 0 }
}

/// Whether the current process runs with elevated privilege
#[cfg(not(unix))]
pub fn process_is_elevated() -> bool {
    false
}
