//! Feature cache
//!
//! Holds the feature set of the current lease. The map is never edited in
//! place: each grant or renewal swaps in a new map, so readers always see a
//! complete snapshot from one server response.

use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{Error, Result};
use crate::lease::FeatureMap;

/// Copy-on-write store for lease features
#[derive(Debug, Default)]
pub struct FeatureCache {
    current: RwLock<Arc<FeatureMap>>,
}

impl FeatureCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// The current feature set
    pub fn snapshot(&self) -> Arc<FeatureMap> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Value of a feature, or an empty string if absent
    pub fn get(&self, name: &str) -> String {
        self.snapshot().get(name).cloned().unwrap_or_default()
    }

    /// Whether a feature has a non-empty value
    pub fn has(&self, name: &str) -> bool {
        !self.get(name).is_empty()
    }

    /// Copy a feature value into `buf` as a NUL-terminated string
    ///
    /// Returns the number of bytes the value needs including the terminator.
    /// An empty `buf` only queries that size; a non-empty buffer that is too
    /// small fails with [`Error::InsufficientBuffer`].
    pub fn read_into(&self, name: &str, buf: &mut [u8]) -> Result<usize> {
        let value = self.get(name);
        let required = value.len() + 1;

        if buf.is_empty() {
            return Ok(required);
        }
        if buf.len() < required {
            return Err(Error::InsufficientBuffer { required });
        }

        buf[..value.len()].copy_from_slice(value.as_bytes());
        buf[value.len()] = 0;
        Ok(required)
    }

    /// Replace the whole feature set
    ///
    /// Returns `true` if the new set differs from the previous one.
    pub(crate) fn replace(&self, next: FeatureMap) -> bool {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let changed = **guard != next;
        *guard = Arc::new(next);
        changed
    }

    /// Forget all features
    pub(crate) fn clear(&self) {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(FeatureMap::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(pairs: &[(&str, &str)]) -> FeatureMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_empty_value_means_absent() {
        let cache = FeatureCache::new();
        cache.replace(features(&[("max-streams", "4"), ("beta", "")]));

        assert!(cache.has("max-streams"));
        assert_eq!(cache.get("max-streams"), "4");
        assert!(!cache.has("beta"));
        assert!(!cache.has("missing"));
        assert_eq!(cache.get("missing"), "");
    }

    #[test]
    fn test_replace_is_wholesale() {
        let cache = FeatureCache::new();
        cache.replace(features(&[("a", "1"), ("b", "2")]));
        cache.replace(features(&[("b", "3")]));

        let snapshot = cache.snapshot();
        assert_eq!(*snapshot, features(&[("b", "3")]));
        assert!(!cache.has("a"));
    }

    #[test]
    fn test_replace_reports_content_change() {
        let cache = FeatureCache::new();
        assert!(cache.replace(features(&[("a", "1")])));
        assert!(!cache.replace(features(&[("a", "1")])));
        assert!(cache.replace(features(&[("a", "2")])));
        assert!(cache.replace(FeatureMap::new()));
        assert!(!cache.replace(FeatureMap::new()));
    }

    #[test]
    fn test_snapshot_survives_replace() {
        let cache = FeatureCache::new();
        cache.replace(features(&[("a", "1")]));

        let before = cache.snapshot();
        cache.replace(features(&[("a", "2")]));

        assert_eq!(before.get("a").map(String::as_str), Some("1"));
        assert_eq!(cache.get("a"), "2");
    }

    #[test]
    fn test_two_phase_buffer_query() {
        let cache = FeatureCache::new();
        cache.replace(features(&[("edition", "pro")]));

        let required = cache.read_into("edition", &mut []).unwrap();
        assert_eq!(required, 4);

        let mut small = [0u8; 2];
        assert!(matches!(
            cache.read_into("edition", &mut small),
            Err(Error::InsufficientBuffer { required: 4 })
        ));

        let mut buf = vec![0u8; required];
        assert_eq!(cache.read_into("edition", &mut buf).unwrap(), 4);
        assert_eq!(&buf, b"pro\0");
    }

    #[test]
    fn test_clear() {
        let cache = FeatureCache::new();
        cache.replace(features(&[("a", "1")]));
        cache.clear();
        assert!(cache.snapshot().is_empty());
    }
}
