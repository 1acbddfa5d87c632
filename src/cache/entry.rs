//! Cache Entry Module
//!
//! Defines a stored value together with its invalidation metadata.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::cache::pattern_matches;

// == Cache Entry ==
/// A single stored value with the keys and patterns it depends on.
///
/// Entries are replaced wholesale on re-set, never mutated in place.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The stored value
    pub value: V,
    /// Storage timestamp (Unix milliseconds)
    pub stored_at: i64,
    /// Keys whose change invalidates this entry
    pub dependencies: HashSet<String>,
    /// Glob patterns whose matching keys invalidate this entry
    pub patterns: HashSet<String>,
    /// Monotonic storage instant, used for expiry
    stored_instant: Instant,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates a new entry stamped with the current time.
    pub fn new<D, P>(value: V, dependencies: D, patterns: P) -> Self
    where
        D: IntoIterator<Item = String>,
        P: IntoIterator<Item = String>,
    {
        Self {
            value,
            stored_at: Utc::now().timestamp_millis(),
            dependencies: dependencies.into_iter().collect(),
            patterns: patterns.into_iter().collect(),
            stored_instant: Instant::now(),
        }
    }

    // == Is Expired ==
    /// Checks whether the entry is stale under `ttl`.
    ///
    /// Stale once its age strictly exceeds `ttl`. A zero `ttl` makes every
    /// entry stale on the next read.
    pub fn is_expired(&self, ttl: Duration) -> bool {
        ttl.is_zero() || self.stored_instant.elapsed() > ttl
    }

    // == Depends On ==
    /// True if a change to `key` must drop this entry.
    pub fn depends_on(&self, key: &str) -> bool {
        self.dependencies.contains(key)
            || self
                .patterns
                .iter()
                .any(|pattern| pattern_matches(pattern, key))
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn plain(value: &str) -> CacheEntry<String> {
        CacheEntry::new(value.to_string(), Vec::new(), Vec::new())
    }

    #[test]
    fn test_entry_creation() {
        let entry = plain("test_value");

        assert_eq!(entry.value, "test_value");
        assert!(entry.stored_at > 0);
        assert!(entry.dependencies.is_empty());
        assert!(entry.patterns.is_empty());
        assert!(!entry.is_expired(Duration::from_secs(60)));
    }

    #[test]
    fn test_entry_expiration() {
        let entry = plain("test_value");
        let ttl = Duration::from_millis(100);

        assert!(!entry.is_expired(ttl));
        sleep(Duration::from_millis(150));
        assert!(entry.is_expired(ttl));
    }

    #[test]
    fn test_zero_ttl_is_always_expired() {
        let entry = plain("test_value");
        assert!(entry.is_expired(Duration::ZERO));
    }

    #[test]
    fn test_depends_on_dependency_key() {
        let entry = CacheEntry::new(1, vec!["user:42".to_string()], Vec::new());
        assert!(entry.depends_on("user:42"));
        assert!(!entry.depends_on("user:4"));
    }

    #[test]
    fn test_depends_on_pattern() {
        let entry = CacheEntry::new(1, Vec::new(), vec!["cache:user:42:*".to_string()]);
        assert!(entry.depends_on("cache:user:42:anything"));
        assert!(!entry.depends_on("cache:user:99:anything"));
    }
}
