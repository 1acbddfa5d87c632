//! Invalidation Options Module
//!
//! Metadata describing what a cached value depends on, and the target of an
//! explicit invalidation.

use std::sync::Arc;

use crate::cache::pattern_matches;
use crate::events::CacheEvent;

/// Caller-supplied predicate deciding whether `event` invalidates the value
/// cached under `key`.
pub type InvalidationPredicate = Arc<dyn Fn(&str, &CacheEvent) -> bool + Send + Sync>;

// == Invalidation Options ==
/// Dependency metadata attached to an entry on `set`.
///
/// The keyed cache stores `dependencies` and `patterns`; `auto_refresh` and
/// `invalidation_fn` are read by the fetch layer.
#[derive(Clone, Default)]
pub struct InvalidationOptions {
    /// Exact keys this value depends on
    pub dependencies: Vec<String>,
    /// Glob patterns of keys this value depends on
    pub patterns: Vec<String>,
    /// Refetch on a matching event instead of just dropping the entry
    pub auto_refresh: bool,
    /// Extra match rule, consulted for auto-refresh only
    pub invalidation_fn: Option<InvalidationPredicate>,
}

impl InvalidationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an exact dependency key.
    pub fn depends_on(mut self, key: impl Into<String>) -> Self {
        self.dependencies.push(key.into());
        self
    }

    /// Adds a dependency pattern.
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    pub fn auto_refresh(mut self, enabled: bool) -> Self {
        self.auto_refresh = enabled;
        self
    }

    /// Sets the custom match predicate.
    pub fn when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&str, &CacheEvent) -> bool + Send + Sync + 'static,
    {
        self.invalidation_fn = Some(Arc::new(predicate));
        self
    }

    // == Matches Event ==
    /// Whether `event` concerns the value cached under `key`.
    ///
    /// True if the event key is a dependency, matches a pattern, or the
    /// predicate accepts it.
    pub fn matches_event(&self, key: &str, event: &CacheEvent) -> bool {
        if let Some(changed) = event.key.as_deref() {
            if self.dependencies.iter().any(|dep| dep == changed) {
                return true;
            }
            if self
                .patterns
                .iter()
                .any(|pattern| pattern_matches(pattern, changed))
            {
                return true;
            }
        }

        self.invalidation_fn
            .as_ref()
            .is_some_and(|predicate| predicate(key, event))
    }
}

impl std::fmt::Debug for InvalidationOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationOptions")
            .field("dependencies", &self.dependencies)
            .field("patterns", &self.patterns)
            .field("auto_refresh", &self.auto_refresh)
            .field("invalidation_fn", &self.invalidation_fn.is_some())
            .finish()
    }
}

// == Invalidate Target ==
/// Selects the entries an explicit `invalidate` removes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidateTarget {
    pub key: Option<String>,
    pub pattern: Option<String>,
}

impl InvalidateTarget {
    /// Targets a single key.
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            pattern: None,
        }
    }

    /// Targets every key matching a glob pattern.
    pub fn pattern(pattern: impl Into<String>) -> Self {
        Self {
            key: None,
            pattern: Some(pattern.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_none() && self.pattern.is_none()
    }
}
