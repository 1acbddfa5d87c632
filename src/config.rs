//! Configuration Module
//!
//! Handles loading and managing cache configuration from environment variables.

use std::env;
use std::time::Duration;

/// Cache and server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of entries per keyed cache
    pub max_size: usize,
    /// Entry lifetime in milliseconds
    pub ttl_ms: u64,
    /// HTTP server port
    pub server_port: u16,
    /// Background expiry sweep interval in milliseconds, 0 disables the sweeper
    pub sweep_interval_ms: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_MAX_SIZE` - Maximum entries per cache (default: 100)
    /// - `CACHE_TTL_MS` - Entry lifetime in milliseconds (default: 300000)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `SWEEP_INTERVAL_MS` - Expiry sweep frequency, 0 = lazy expiry only (default: 0)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_size: parse_env("CACHE_MAX_SIZE").unwrap_or(defaults.max_size),
            ttl_ms: parse_env("CACHE_TTL_MS").unwrap_or(defaults.ttl_ms),
            server_port: parse_env("SERVER_PORT").unwrap_or(defaults.server_port),
            sweep_interval_ms: parse_env("SWEEP_INTERVAL_MS").unwrap_or(defaults.sweep_interval_ms),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Sweep interval, or `None` when the sweeper is disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_ms > 0).then(|| Duration::from_millis(self.sweep_interval_ms))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_size: 100,
            ttl_ms: 300_000,
            server_port: 3000,
            sweep_interval_ms: 0,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}
