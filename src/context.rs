//! Cache Context Module
//!
//! The one event bus of the process plus the configuration every cache is
//! built from. Constructed once at startup and handed to collaborators.

use crate::cache::KeyedCache;
use crate::config::Config;
use crate::events::EventBus;
use crate::fetch::CachedFetcher;

// == Cache Context ==
#[derive(Debug, Clone)]
pub struct CacheContext {
    bus: EventBus,
    config: Config,
}

impl CacheContext {
    pub fn new(config: Config) -> Self {
        Self {
            bus: EventBus::new(),
            config,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Builds a keyed cache on the shared bus with the configured bounds.
    pub fn keyed_cache<V>(&self) -> KeyedCache<V>
    where
        V: Clone + Send + 'static,
    {
        KeyedCache::new(&self.bus, self.config.max_size, self.config.ttl())
    }

    /// Builds a fetcher over a fresh keyed cache on the shared bus.
    pub fn fetcher<V>(&self) -> CachedFetcher<V>
    where
        V: Clone + Send + 'static,
    {
        CachedFetcher::new(self.keyed_cache())
    }
}

impl Default for CacheContext {
    fn default() -> Self {
        Self::new(Config::default())
    }
}
