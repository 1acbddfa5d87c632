//! Response DTOs for the cache admin API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;
use serde_json::Value;

use crate::cache::CacheStats;

/// Response body for GET /get/:key
#[derive(Debug, Clone, Serialize)]
pub struct GetResponse {
    pub key: String,
    pub value: Value,
}

impl GetResponse {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Response body for PUT /set
#[derive(Debug, Clone, Serialize)]
pub struct SetResponse {
    /// Success message
    pub message: String,
    /// The key that was set
    pub key: String,
}

impl SetResponse {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' set successfully", key),
            key,
        }
    }
}

/// Response body for DELETE /del/:key
///
/// The delete event is published even when nothing was stored, so `removed`
/// only reports whether this cache held the key.
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    pub message: String,
    pub key: String,
    pub removed: bool,
}

impl DeleteResponse {
    pub fn new(key: impl Into<String>, removed: bool) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' deleted", key),
            key,
            removed,
        }
    }
}

/// Response body for POST /invalidate
#[derive(Debug, Clone, Serialize)]
pub struct InvalidateResponse {
    /// Number of entries removed
    pub removed: usize,
}

/// Response body for POST /clear
#[derive(Debug, Clone, Serialize)]
pub struct ClearResponse {
    pub message: String,
}

impl ClearResponse {
    pub fn cleared() -> Self {
        Self {
            message: "Cache cleared".to_string(),
        }
    }
}

/// Response body for GET /keys
#[derive(Debug, Clone, Serialize)]
pub struct KeysResponse {
    pub count: usize,
    pub keys: Vec<String>,
}

impl KeysResponse {
    pub fn new(keys: Vec<String>) -> Self {
        Self {
            count: keys.len(),
            keys,
        }
    }
}

/// Response body for GET /stats
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub cascade_removals: u64,
    /// Current number of entries, stale ones included
    pub total_entries: usize,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
}

impl From<CacheStats> for StatsResponse {
    fn from(stats: CacheStats) -> Self {
        Self {
            hit_rate: stats.hit_rate(),
            hits: stats.hits,
            misses: stats.misses,
            evictions: stats.evictions,
            expirations: stats.expirations,
            cascade_removals: stats.cascade_removals,
            total_entries: stats.total_entries,
        }
    }
}

/// Response body for GET /health
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
    /// Listeners attached to the event bus
    pub bus_listeners: usize,
}

impl HealthResponse {
    pub fn healthy(bus_listeners: usize) -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            bus_listeners,
        }
    }
}
