//! Cache Event Module
//!
//! Notifications carried by the event bus.

use chrono::Utc;
use serde::{Deserialize, Serialize};

// == Event Kind ==
/// What happened to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheEventKind {
    Set,
    Delete,
    Clear,
    Invalidate,
}

// == Cache Event ==
/// A single notification published on the bus.
///
/// Events are immutable once built; the timestamp is taken at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEvent {
    /// Event type
    #[serde(rename = "type")]
    pub kind: CacheEventKind,
    /// Affected key, if the event concerns a single key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Affected key pattern, for pattern invalidations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Publication time (Unix milliseconds)
    pub timestamp: i64,
    /// Id of the cache instance that published the event, if any
    #[serde(skip)]
    pub origin: Option<u64>,
}

impl CacheEvent {
    fn build(kind: CacheEventKind, key: Option<String>, pattern: Option<String>) -> Self {
        Self {
            kind,
            key,
            pattern,
            timestamp: Utc::now().timestamp_millis(),
            origin: None,
        }
    }

    /// Tags the event with the id of the publishing cache.
    pub fn with_origin(mut self, origin: u64) -> Self {
        self.origin = Some(origin);
        self
    }

    /// A value was stored under `key`.
    pub fn set(key: impl Into<String>) -> Self {
        Self::build(CacheEventKind::Set, Some(key.into()), None)
    }

    /// `key` was removed (or announced as changed).
    pub fn delete(key: impl Into<String>) -> Self {
        Self::build(CacheEventKind::Delete, Some(key.into()), None)
    }

    /// The whole cache was emptied.
    pub fn clear() -> Self {
        Self::build(CacheEventKind::Clear, None, None)
    }

    /// An explicit invalidation by key and/or pattern.
    pub fn invalidate(key: Option<String>, pattern: Option<String>) -> Self {
        Self::build(CacheEventKind::Invalidate, key, pattern)
    }

    /// True for the event kinds that drive the dependency cascade.
    pub fn is_change(&self) -> bool {
        matches!(self.kind, CacheEventKind::Set | CacheEventKind::Delete)
    }
}
