// # Handle Resolver Trait
//
// Defines the interface to the activation subsystem that binds a product
// and an installation fingerprint to a lease handle.
//
// ## Implementations
//
// - `DataFileResolver`: validates the product against a product data file

use crate::activation::Fingerprint;
use crate::lease::LeaseHandle;

/// Trait for handle resolvers
///
/// Resolution may fail with [`Error::DataFile`](crate::Error::DataFile) when
/// the product data is missing or does not describe the requested product.
pub trait HandleResolver: Send + Sync {
    /// Resolve a handle for `product_guid` on the installation identified by `fingerprint`
    fn resolve(
        &self,
        product_guid: &str,
        fingerprint: &Fingerprint,
    ) -> Result<LeaseHandle, crate::Error>;
}
