//! Core traits for the lease client
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`LeaseTransport`]: Request, renew and drop leases on the server
//! - [`ServerLocationStore`]: Persist the server location per scope
//! - [`HandleResolver`]: Bind a product and installation to a handle

pub mod handle_resolver;
pub mod location_store;
pub mod transport;

pub use handle_resolver::HandleResolver;
pub use location_store::{ServerLocationStore, process_is_elevated};
pub use transport::{LIBRARY_VERSION, LeaseGrant, LeaseRequest, LeaseTransport};
