// # floatlease-core
//
// Core library for the floating-license lease client.
//
// ## Architecture Overview
//
// A lease is a time-bounded grant of one license seat by a server. This
// library requests, renews and releases such leases:
// - **ServerLocationStore**: Trait for persisting the server address per scope
// - **LeaseTransport**: Trait for the request/renew/drop round trips
// - **HandleResolver**: Trait binding a product and installation to a handle
// - **LeaseStateMachine**: Serialized owner of the lease lifecycle and features
// - **NotificationDispatcher**: Background renewal task delivering notifications
// - **LeaseClient**: Entry point coordinating the above for one handle
//
// ## Design Principles
//
// 1. **One Lock**: Every lease transition goes through the state machine's mutex
// 2. **Engine-Owned Retries**: Transports never retry; the dispatcher does
// 3. **Message Passing**: Every notification is also posted on a channel
// 4. **Explicit Lifecycle**: Clients are constructed and shut down explicitly

pub mod activation;
pub mod client;
pub mod config;
pub mod dates;
pub mod dispatcher;
pub mod error;
pub mod features;
pub mod lease;
pub mod machine;
pub mod store;
pub mod traits;

// Re-export core types for convenience
pub use activation::{DataFileResolver, Fingerprint, ProductDetails};
pub use client::LeaseClient;
pub use config::{ClientConfig, RenewalPolicy};
pub use dates::DateCheck;
pub use dispatcher::{CallbackRegistration, ClientEvent};
pub use error::{Error, Result};
pub use lease::{
    FeatureMap, Lease, LeaseEventKind, LeaseHandle, LeaseState, Scope, ServerLocation,
};
pub use store::{FileLocationStore, MemoryLocationStore};
pub use traits::{HandleResolver, LeaseTransport, ServerLocationStore};
