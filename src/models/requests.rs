//! Request DTOs for the cache admin API
//!
//! Defines the structure of incoming HTTP request bodies and query strings.

use serde::Deserialize;
use serde_json::Value;

use crate::cache::{InvalidateTarget, InvalidationOptions, MAX_KEY_LENGTH};

/// Request body for the SET operation (PUT /set)
#[derive(Debug, Clone, Deserialize)]
pub struct SetRequest {
    /// The cache key
    pub key: String,
    /// Any JSON value
    pub value: Value,
    /// Keys whose change invalidates this entry
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Key patterns whose matches invalidate this entry
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl SetRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.key.is_empty() {
            return Some("Key cannot be empty".to_string());
        }
        if self.key.len() > MAX_KEY_LENGTH {
            return Some(format!(
                "Key exceeds maximum length of {} bytes",
                MAX_KEY_LENGTH
            ));
        }
        None
    }

    /// Dependency metadata to store with the value, if any was sent.
    pub fn invalidation(&self) -> Option<InvalidationOptions> {
        if self.dependencies.is_empty() && self.patterns.is_empty() {
            return None;
        }
        Some(InvalidationOptions {
            dependencies: self.dependencies.clone(),
            patterns: self.patterns.clone(),
            ..InvalidationOptions::default()
        })
    }
}

/// Request body for POST /invalidate
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvalidateRequest {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub pattern: Option<String>,
}

impl InvalidateRequest {
    pub fn validate(&self) -> Option<String> {
        if self.target().is_empty() {
            return Some("Either key or pattern is required".to_string());
        }
        None
    }

    pub fn target(&self) -> InvalidateTarget {
        InvalidateTarget {
            key: self.key.clone(),
            pattern: self.pattern.clone(),
        }
    }
}

/// Query string for GET /events/last
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LastEventQuery {
    #[serde(default)]
    pub key: Option<String>,
}
