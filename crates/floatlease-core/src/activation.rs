//! Product data and installation fingerprinting
//!
//! The product data file names the product a client may lease seats for.
//! The fingerprint identifies this installation to the server; it is stable
//! across restarts and changes when the machine identity changes.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::env;
use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};
use crate::lease::LeaseHandle;
use crate::traits::HandleResolver;

/// Files that hold a persistent machine id on Linux
const MACHINE_ID_PATHS: &[&str] = &["/etc/machine-id", "/var/lib/dbus/machine-id"];

/// Contents of a product data file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDetails {
    /// Product GUID
    pub guid: String,
    /// Product version the server must serve
    #[serde(default)]
    pub version: Option<String>,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
}

impl ProductDetails {
    /// Load product details from a data file
    ///
    /// A missing, unreadable or malformed file is a [`Error::DataFile`].
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::data_file(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let details: ProductDetails = serde_json::from_str(&content).map_err(|e| {
            Error::data_file(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        if details.guid.trim().is_empty() {
            return Err(Error::data_file(format!(
                "{} does not name a product GUID",
                path.display()
            )));
        }

        tracing::debug!("Loaded product details for {}", details.guid);
        Ok(details)
    }

    /// Whether these details describe `guid`
    pub fn matches(&self, guid: &str) -> bool {
        normalize_guid(&self.guid) == normalize_guid(guid)
    }
}

/// Stable identifier for this installation
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Generate the fingerprint of the current machine
    ///
    /// Combines OS, architecture, hostname and machine id. Fails with
    /// [`Error::EnableNetworkAdapters`] when neither a hostname nor a machine
    /// id can be read, since the remaining components are not unique.
    pub fn generate() -> Result<Self> {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .filter(|h| !h.is_empty());
        let machine_id = read_machine_id();

        if hostname.is_none() && machine_id.is_none() {
            return Err(Error::EnableNetworkAdapters);
        }

        let mut components = vec![env::consts::OS.to_string(), env::consts::ARCH.to_string()];
        components.extend(hostname);
        components.extend(machine_id);

        Ok(Self::from_components(&components))
    }

    /// Derive a fingerprint from arbitrary identifying components
    pub fn from_components<S: AsRef<str>>(components: &[S]) -> Self {
        let mut hasher = Sha256::new();
        for (i, component) in components.iter().enumerate() {
            if i > 0 {
                hasher.update(b"|");
            }
            hasher.update(component.as_ref().as_bytes());
        }
        let hash = hasher.finalize();

        Self(URL_SAFE_NO_PAD.encode(&hash[..16]))
    }

    /// The fingerprint string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for logs
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({}…)", self.short())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolves handles against a loaded product data file
#[derive(Debug, Clone)]
pub struct DataFileResolver {
    details: ProductDetails,
}

impl DataFileResolver {
    /// Create a resolver from already loaded details
    pub fn new(details: ProductDetails) -> Self {
        Self { details }
    }

    /// Load the data file and create a resolver
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(ProductDetails::from_path(path)?))
    }

    /// The loaded product details
    pub fn details(&self) -> &ProductDetails {
        &self.details
    }
}

impl HandleResolver for DataFileResolver {
    fn resolve(&self, product_guid: &str, fingerprint: &Fingerprint) -> Result<LeaseHandle> {
        if !self.details.matches(product_guid) {
            return Err(Error::data_file(format!(
                "data file is for product {}, not {}",
                self.details.guid, product_guid
            )));
        }

        let id = handle_id(&self.details.guid, fingerprint);
        tracing::debug!(
            "Resolved handle {} for product {} on {}",
            id,
            self.details.guid,
            fingerprint.short()
        );

        Ok(LeaseHandle::new(id, self.details.guid.clone(), fingerprint.as_str()))
    }
}

/// Handle id derived from product and fingerprint
fn handle_id(product_guid: &str, fingerprint: &Fingerprint) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_guid(product_guid).as_bytes());
    hasher.update(b"|");
    hasher.update(fingerprint.as_str().as_bytes());
    let hash = hasher.finalize();
    URL_SAFE_NO_PAD.encode(&hash[..9])
}

fn normalize_guid(guid: &str) -> String {
    guid.trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .to_ascii_lowercase()
}

fn read_machine_id() -> Option<String> {
    MACHINE_ID_PATHS.iter().find_map(|path| {
        std::fs::read_to_string(path)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const GUID: &str = "9a7b4c1e-1f2d-4e0a-9d1c-5b6e7f8a9b0c";

    fn write_data_file(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("product.dat");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_load_product_details() {
        let dir = tempdir().unwrap();
        let path = write_data_file(
            dir.path(),
            &format!(r#"{{"guid": "{}", "version": "4.1"}}"#, GUID),
        );

        let details = ProductDetails::from_path(&path).unwrap();
        assert_eq!(details.guid, GUID);
        assert_eq!(details.version.as_deref(), Some("4.1"));
    }

    #[test]
    fn test_missing_data_file() {
        let dir = tempdir().unwrap();
        let result = ProductDetails::from_path(dir.path().join("missing.dat"));
        assert!(matches!(result, Err(Error::DataFile(_))));
    }

    #[test]
    fn test_corrupt_data_file() {
        let dir = tempdir().unwrap();
        let path = write_data_file(dir.path(), "\u{0}\u{1}not json");
        assert!(matches!(ProductDetails::from_path(&path), Err(Error::DataFile(_))));
    }

    #[test]
    fn test_guid_matching_ignores_braces_and_case() {
        let details = ProductDetails {
            guid: GUID.to_string(),
            version: None,
            name: None,
        };
        assert!(details.matches(&format!("{{{}}}", GUID.to_uppercase())));
        assert!(!details.matches("00000000-0000-0000-0000-000000000000"));
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = Fingerprint::from_components(&["linux", "x86_64", "host-a"]);
        let b = Fingerprint::from_components(&["linux", "x86_64", "host-a"]);
        let c = Fingerprint::from_components(&["linux", "x86_64", "host-b"]);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.short().len(), 8);
    }

    #[test]
    fn test_fingerprint_debug_is_abbreviated() {
        let fp = Fingerprint::from_components(&["linux", "host"]);
        let debug = format!("{:?}", fp);
        assert!(!debug.contains(fp.as_str()));
    }

    #[test]
    fn test_resolver_binds_product_and_fingerprint() {
        let resolver = DataFileResolver::new(ProductDetails {
            guid: GUID.to_string(),
            version: None,
            name: None,
        });
        let fp = Fingerprint::from_components(&["linux", "host-a"]);

        let handle = resolver.resolve(GUID, &fp).unwrap();
        assert_eq!(handle.product_guid(), GUID);
        assert_eq!(handle.fingerprint(), fp.as_str());

        let again = resolver.resolve(GUID, &fp).unwrap();
        assert_eq!(handle.id(), again.id());

        let other_fp = Fingerprint::from_components(&["linux", "host-b"]);
        let other = resolver.resolve(GUID, &other_fp).unwrap();
        assert_ne!(handle.id(), other.id());
    }

    #[test]
    fn test_resolver_rejects_other_product() {
        let resolver = DataFileResolver::new(ProductDetails {
            guid: GUID.to_string(),
            version: None,
            name: None,
        });
        let fp = Fingerprint::from_components(&["linux", "host-a"]);

        let result = resolver.resolve("00000000-0000-0000-0000-000000000000", &fp);
        assert!(matches!(result, Err(Error::DataFile(_))));
    }
}
