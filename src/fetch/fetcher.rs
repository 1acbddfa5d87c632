//! Cached Fetch Module
//!
//! Get-or-fetch over a keyed cache: serve fresh cached values, otherwise run
//! the caller's producer and store its result with its invalidation metadata.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, trace, warn};

use crate::cache::{InvalidateTarget, InvalidationOptions, KeyedCache};
use crate::fetch::metrics::MeasureGuard;
use crate::fetch::{CachedQuery, MeasureKind, MetricsSink, TracingMetrics};

// == Fetch Options ==
/// Per-call options for [`CachedFetcher::resolve`].
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Run the producer even if a fresh value is cached
    pub skip_cache: bool,
    /// Metadata stored with the produced value
    pub invalidation: Option<InvalidationOptions>,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip_cache(mut self, skip: bool) -> Self {
        self.skip_cache = skip;
        self
    }

    pub fn invalidation(mut self, invalidation: InvalidationOptions) -> Self {
        self.invalidation = Some(invalidation);
        self
    }

    /// Whether matching events should trigger a refetch.
    pub fn auto_refresh(&self) -> bool {
        self.invalidation
            .as_ref()
            .is_some_and(|invalidation| invalidation.auto_refresh)
    }
}

// == Cached Fetcher ==
/// Consumer-facing fetch contract over a [`KeyedCache`].
///
/// Concurrent misses on the same key are not collapsed: each caller runs its
/// own producer and the last store wins.
pub struct CachedFetcher<V> {
    cache: KeyedCache<V>,
    metrics: Arc<dyn MetricsSink>,
}

impl<V> Clone for CachedFetcher<V> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<V> CachedFetcher<V>
where
    V: Clone + Send + 'static,
{
    /// Creates a fetcher reporting measurements through `tracing`.
    pub fn new(cache: KeyedCache<V>) -> Self {
        Self::with_metrics(cache, Arc::new(TracingMetrics::new()))
    }

    pub fn with_metrics(cache: KeyedCache<V>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self { cache, metrics }
    }

    pub fn cache(&self) -> &KeyedCache<V> {
        &self.cache
    }

    // == Resolve ==
    /// Returns the cached value for `key` if fresh, otherwise runs `producer`,
    /// caches its result and returns it.
    ///
    /// A producer error is returned unchanged and nothing is cached.
    pub async fn resolve<F, Fut, E>(
        &self,
        key: &str,
        producer: F,
        options: &FetchOptions,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: Display,
    {
        self.resolve_as(key, producer, options, MeasureKind::Fetch)
            .await
    }

    pub(crate) async fn resolve_as<F, Fut, E>(
        &self,
        key: &str,
        producer: F,
        options: &FetchOptions,
        kind: MeasureKind,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: Display,
    {
        if !options.skip_cache {
            if let Some(value) = self.cache.get(key) {
                trace!(key = %key, "Cache hit");
                return Ok(value);
            }
        }

        debug!(key = %key, skip_cache = options.skip_cache, kind = ?kind, "Running producer");
        // Closed as cancelled if this future is dropped mid-producer.
        let measure = MeasureGuard::start(self.metrics.as_ref(), key, kind);

        match producer().await {
            Ok(value) => {
                self.cache
                    .set(key, value.clone(), options.invalidation.as_ref());
                measure.finish(json!({ "key": key, "success": true }));
                Ok(value)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Producer failed, nothing cached");
                measure.finish(json!({ "key": key, "success": false, "error": e.to_string() }));
                Err(e)
            }
        }
    }

    // == Invalidate Now ==
    /// Drops the entry for `key` and publishes an `Invalidate` for it.
    pub fn invalidate_now(&self, key: &str) {
        self.cache.invalidate(&InvalidateTarget::key(key));
    }
}

impl<V> CachedFetcher<V>
where
    V: Clone + Send + Sync + 'static,
{
    // == Query ==
    /// Binds `key`, `producer` and `options` into a [`CachedQuery`].
    ///
    /// With `auto_refresh` set, the query subscribes to the bus until dropped.
    pub fn query<F, Fut, E>(
        &self,
        key: impl Into<String>,
        producer: F,
        options: FetchOptions,
    ) -> CachedQuery<V, E>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        CachedQuery::new(self.clone(), key.into(), producer, options)
    }
}

impl<V> std::fmt::Debug for CachedFetcher<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedFetcher")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
