// # Memory Location Store
//
// In-memory implementation of ServerLocationStore.
//
// ## Purpose
//
// Keeps server locations for the lifetime of the process. Used by tests and
// by embedders that configure the server programmatically on every start.
//
// ## Privilege Model
//
// Each handle carries its own elevation flag while sharing the records with
// every clone made through `with_elevation`. This models several processes
// with different privileges looking at the same machine-wide record.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::lease::{Scope, ServerLocation};
use crate::traits::ServerLocationStore;

/// Saved record per scope
///
/// `Some(None)` is a provisioned record without a location.
type Records = HashMap<Scope, Option<ServerLocation>>;

/// In-memory server location store
///
/// # Example
///
/// ```rust,no_run
/// use floatlease_core::lease::{Scope, ServerLocation};
/// use floatlease_core::store::MemoryLocationStore;
/// use floatlease_core::traits::ServerLocationStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryLocationStore::new();
///     store.save(&ServerLocation::new("lease.example.com", 8080, Scope::User)).await?;
///
///     let location = store.load(Scope::User).await?;
///     assert_eq!(location.map(|l| l.port), Some(8080));
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MemoryLocationStore {
    inner: Arc<RwLock<Records>>,
    elevated: bool,
}

impl MemoryLocationStore {
    /// Create an empty store running with elevated privilege
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            elevated: true,
        }
    }

    /// A handle on the same records with a different privilege level
    pub fn with_elevation(&self, elevated: bool) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            elevated,
        }
    }

    /// Whether this handle writes with elevated privilege
    pub fn is_elevated(&self) -> bool {
        self.elevated
    }

    fn check_write(&self, records: &Records, scope: Scope) -> Result<(), Error> {
        if scope == Scope::System && !self.elevated && !records.contains_key(&scope) {
            tracing::debug!("Refusing first write to system scope without elevation");
            return Err(Error::Permission);
        }
        Ok(())
    }
}

impl Default for MemoryLocationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServerLocationStore for MemoryLocationStore {
    async fn load(&self, scope: Scope) -> Result<Option<ServerLocation>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.get(&scope).cloned().flatten())
    }

    async fn save(&self, location: &ServerLocation) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        self.check_write(&guard, location.scope)?;
        guard.insert(location.scope, Some(location.clone()));
        Ok(())
    }

    async fn provision(&self, scope: Scope) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        self.check_write(&guard, scope)?;
        guard.entry(scope).or_insert(None);
        Ok(())
    }

    async fn clear(&self, scope: Scope) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        if let Some(record) = guard.get_mut(&scope) {
            *record = None;
        }
        Ok(())
    }

    fn store_name(&self) -> &'static str {
        "memory"
    }
}
