//! Cached Query Module
//!
//! A key bound to its producer and options. Owns the auto-refresh bus
//! subscription and releases it on drop.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::events::{CacheEvent, CacheEventKind, Subscription};
use crate::fetch::{CachedFetcher, FetchOptions, MeasureKind};

type Producer<V, E> = Arc<dyn Fn() -> BoxFuture<'static, Result<V, E>> + Send + Sync>;

// == Query State ==
/// Latest observable outcome of a query.
#[derive(Debug, Clone)]
pub struct QueryState<V> {
    /// Last successfully produced or cached value
    pub data: Option<V>,
    /// Message of the last failed run, cleared by the next success
    pub error: Option<String>,
    /// A run is in progress
    pub loading: bool,
    /// When `data` was last replaced (Unix milliseconds)
    pub updated_at: Option<i64>,
}

impl<V> Default for QueryState<V> {
    fn default() -> Self {
        Self {
            data: None,
            error: None,
            loading: false,
            updated_at: None,
        }
    }
}

struct QueryCore<V, E> {
    key: String,
    fetcher: CachedFetcher<V>,
    producer: Producer<V, E>,
    options: FetchOptions,
    state: watch::Sender<QueryState<V>>,
}

impl<V, E> QueryCore<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Display + Send + 'static,
{
    async fn run(&self, options: &FetchOptions, kind: MeasureKind) -> Result<V, E> {
        self.state.send_modify(|state| state.loading = true);

        let producer = &self.producer;
        let result = self
            .fetcher
            .resolve_as(&self.key, || producer(), options, kind)
            .await;

        self.state.send_modify(|state| {
            state.loading = false;
            match &result {
                Ok(value) => {
                    state.data = Some(value.clone());
                    state.error = None;
                    state.updated_at = Some(Utc::now().timestamp_millis());
                }
                Err(e) => state.error = Some(e.to_string()),
            }
        });
        result
    }

    fn refresh_options(&self) -> FetchOptions {
        FetchOptions {
            skip_cache: true,
            invalidation: self.options.invalidation.clone(),
        }
    }

    /// Whether `event` should trigger a refetch of this query.
    fn should_refresh(&self, event: &CacheEvent) -> bool {
        // Our own store would otherwise retrigger us forever.
        if event.kind == CacheEventKind::Set && event.key.as_deref() == Some(self.key.as_str()) {
            return false;
        }
        self.options
            .invalidation
            .as_ref()
            .is_some_and(|invalidation| invalidation.matches_event(&self.key, event))
    }
}

// == Cached Query ==
/// Calling-context handle for one cached key.
///
/// When the options request auto-refresh, a matching event on the bus
/// refetches the value in the background on the runtime the query was created
/// in. Dropping the query unsubscribes and aborts in-flight refreshes.
pub struct CachedQuery<V, E> {
    core: Arc<QueryCore<V, E>>,
    refreshes: Arc<Mutex<JoinSet<()>>>,
    subscription: Option<Subscription>,
}

impl<V, E> CachedQuery<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Display + Send + 'static,
{
    pub(crate) fn new<F, Fut>(
        fetcher: CachedFetcher<V>,
        key: String,
        producer: F,
        options: FetchOptions,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let producer: Producer<V, E> = Arc::new(move || producer().boxed());
        let (state, _) = watch::channel(QueryState::default());
        let auto_refresh = options.auto_refresh();

        let core = Arc::new(QueryCore {
            key,
            fetcher,
            producer,
            options,
            state,
        });
        let refreshes = Arc::new(Mutex::new(JoinSet::new()));

        let subscription = if auto_refresh {
            Self::subscribe_refresh(&core, &refreshes)
        } else {
            None
        };

        Self {
            core,
            refreshes,
            subscription,
        }
    }

    fn subscribe_refresh(
        core: &Arc<QueryCore<V, E>>,
        refreshes: &Arc<Mutex<JoinSet<()>>>,
    ) -> Option<Subscription> {
        let Ok(handle) = Handle::try_current() else {
            warn!(
                key = %core.key,
                "Auto-refresh needs a tokio runtime, using passive invalidation"
            );
            return None;
        };

        let listener_core = core.clone();
        let refreshes = refreshes.clone();
        let subscription = core.fetcher.cache().bus().subscribe(move |event| {
            if !listener_core.should_refresh(event) {
                return Ok(());
            }
            debug!(
                key = %listener_core.key,
                trigger = ?event.key,
                kind = ?event.kind,
                "Refreshing invalidated query"
            );

            let core = listener_core.clone();
            let mut tasks = refreshes.lock();
            // Reap finished refreshes so the set does not grow.
            while tasks.try_join_next().is_some() {}
            tasks.spawn_on(
                async move {
                    let options = core.refresh_options();
                    if let Err(e) = core.run(&options, MeasureKind::Refresh).await {
                        warn!(key = %core.key, error = %e, "Background refresh failed");
                    }
                },
                &handle,
            );
            Ok(())
        });
        Some(subscription)
    }

    // == Fetch ==
    /// Resolves the key through the cache, running the producer on a miss.
    pub async fn fetch(&self) -> Result<V, E> {
        self.core
            .run(&self.core.options, MeasureKind::Fetch)
            .await
    }

    // == Refetch ==
    /// Runs the producer regardless of the cached value.
    pub async fn refetch(&self) -> Result<V, E> {
        let options = self.core.refresh_options();
        self.core.run(&options, MeasureKind::Fetch).await
    }

    // == Invalidate ==
    /// Drops the cached value and publishes an `Invalidate` for the key.
    pub fn invalidate(&self) {
        self.core.fetcher.invalidate_now(&self.core.key);
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> QueryState<V> {
        self.core.state.borrow().clone()
    }

    /// Receiver notified whenever the state changes, background refreshes
    /// included.
    pub fn watch(&self) -> watch::Receiver<QueryState<V>> {
        self.core.state.subscribe()
    }

    pub fn key(&self) -> &str {
        &self.core.key
    }

    /// Whether this query holds a live auto-refresh subscription.
    pub fn is_auto_refreshing(&self) -> bool {
        self.subscription
            .as_ref()
            .is_some_and(|subscription| subscription.is_active())
    }
}

impl<V, E> Drop for CachedQuery<V, E> {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        self.refreshes.lock().abort_all();
    }
}

impl<V, E> std::fmt::Debug for CachedQuery<V, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedQuery")
            .field("key", &self.core.key)
            .field("auto_refresh", &self.subscription.is_some())
            .finish_non_exhaustive()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{InvalidationOptions, KeyedCache};
    use crate::events::EventBus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn fetcher() -> CachedFetcher<usize> {
        CachedFetcher::new(KeyedCache::new(&EventBus::new(), 100, Duration::from_secs(60)))
    }

    /// Producer returning how many times it has been called.
    fn counting_producer(
        calls: Arc<AtomicUsize>,
    ) -> impl Fn() -> BoxFuture<'static, Result<usize, String>> + Send + Sync + 'static {
        move || {
            let calls = calls.clone();
            async move { Ok(calls.fetch_add(1, Ordering::SeqCst) + 1) }.boxed()
        }
    }

    async fn wait_for_calls(calls: &AtomicUsize, expected: usize) {
        for _ in 0..100 {
            if calls.load(Ordering::SeqCst) >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_fetch_updates_state() {
        let fetcher = fetcher();
        let calls = Arc::new(AtomicUsize::new(0));
        let query = fetcher.query("n", counting_producer(calls.clone()), FetchOptions::new());

        assert!(query.state().data.is_none());
        assert_eq!(query.fetch().await, Ok(1));
        assert_eq!(query.fetch().await, Ok(1));

        let state = query.state();
        assert_eq!(state.data, Some(1));
        assert!(!state.loading);
        assert!(state.updated_at.is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refetch_bypasses_cache() {
        let fetcher = fetcher();
        let calls = Arc::new(AtomicUsize::new(0));
        let query = fetcher.query("n", counting_producer(calls.clone()), FetchOptions::new());

        assert_eq!(query.fetch().await, Ok(1));
        assert_eq!(query.refetch().await, Ok(2));
        assert_eq!(fetcher.cache().get("n"), Some(2));
    }

    #[tokio::test]
    async fn test_failure_recorded_in_state() {
        let fetcher = fetcher();
        let query = fetcher.query(
            "bad",
            || async { Err::<usize, _>("unavailable".to_string()) },
            FetchOptions::new(),
        );

        assert!(query.fetch().await.is_err());
        let state = query.state();
        assert_eq!(state.error.as_deref(), Some("unavailable"));
        assert!(state.data.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_then_fetch_reruns_producer() {
        let fetcher = fetcher();
        let calls = Arc::new(AtomicUsize::new(0));
        let query = fetcher.query("n", counting_producer(calls.clone()), FetchOptions::new());

        query.fetch().await.unwrap();
        query.invalidate();
        assert!(!fetcher.cache().has("n"));
        assert_eq!(query.fetch().await, Ok(2));
    }

    #[tokio::test]
    async fn test_auto_refresh_refetches_on_dependency_change() {
        let fetcher = fetcher();
        let calls = Arc::new(AtomicUsize::new(0));
        let options = FetchOptions::new().invalidation(
            InvalidationOptions::new()
                .depends_on("user:42")
                .auto_refresh(true),
        );
        let query = fetcher.query("report", counting_producer(calls.clone()), options);
        assert!(query.is_auto_refreshing());

        query.fetch().await.unwrap();
        fetcher.cache().set("user:42", 0, None);

        wait_for_calls(&calls, 2).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        // Let the refresh task store its result and publish state.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fetcher.cache().get("report"), Some(2));
        assert_eq!(query.state().data, Some(2));
    }

    #[tokio::test]
    async fn test_auto_refresh_with_predicate() {
        let fetcher = fetcher();
        let calls = Arc::new(AtomicUsize::new(0));
        let options = FetchOptions::new().invalidation(
            InvalidationOptions::new()
                .auto_refresh(true)
                .when(|_, event| event.kind == CacheEventKind::Clear),
        );
        let query = fetcher.query("dashboard", counting_producer(calls.clone()), options);

        query.fetch().await.unwrap();
        fetcher.cache().clear();

        wait_for_calls(&calls, 2).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_own_writes_do_not_trigger_refresh() {
        let fetcher = fetcher();
        let calls = Arc::new(AtomicUsize::new(0));
        let options = FetchOptions::new().invalidation(
            InvalidationOptions::new()
                .pattern("item:*")
                .auto_refresh(true),
        );
        let query = fetcher.query("item:1", counting_producer(calls.clone()), options);

        query.fetch().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_passive_invalidation_waits_for_next_fetch() {
        let fetcher = fetcher();
        let calls = Arc::new(AtomicUsize::new(0));
        let options = FetchOptions::new()
            .invalidation(InvalidationOptions::new().depends_on("user:42"));
        let query = fetcher.query("report", counting_producer(calls.clone()), options);
        assert!(!query.is_auto_refreshing());

        query.fetch().await.unwrap();
        fetcher.cache().delete("user:42");
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!fetcher.cache().has("report"));
        assert_eq!(query.fetch().await, Ok(2));
    }

    #[tokio::test]
    async fn test_drop_releases_subscription() {
        let fetcher = fetcher();
        let bus = fetcher.cache().bus().clone();
        let baseline = bus.listener_count();

        let calls = Arc::new(AtomicUsize::new(0));
        let options = FetchOptions::new()
            .invalidation(InvalidationOptions::new().depends_on("x").auto_refresh(true));
        let query = fetcher.query("q", counting_producer(calls.clone()), options);
        assert_eq!(bus.listener_count(), baseline + 1);

        drop(query);
        assert_eq!(bus.listener_count(), baseline);

        fetcher.cache().delete("x");
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_watch_sees_background_refresh() {
        let fetcher = fetcher();
        let calls = Arc::new(AtomicUsize::new(0));
        let options = FetchOptions::new().invalidation(
            InvalidationOptions::new()
                .depends_on("user:42")
                .auto_refresh(true),
        );
        let query = fetcher.query("report", counting_producer(calls.clone()), options);
        query.fetch().await.unwrap();

        let mut rx = query.watch();
        assert_eq!(rx.borrow_and_update().data, Some(1));

        fetcher.cache().set("user:42", 0, None);

        let refreshed = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                rx.changed().await.unwrap();
                let state = rx.borrow_and_update().clone();
                if state.data == Some(2) {
                    return state;
                }
            }
        })
        .await
        .unwrap();

        assert!(!refreshed.loading);
        assert!(refreshed.error.is_none());
        assert!(refreshed.updated_at.is_some());
    }

    #[test]
    fn test_auto_refresh_outside_runtime_falls_back() {
        let fetcher = fetcher();
        let calls = Arc::new(AtomicUsize::new(0));
        let options = FetchOptions::new()
            .invalidation(InvalidationOptions::new().depends_on("x").auto_refresh(true));
        let query = fetcher.query("q", counting_producer(calls), options);
        assert!(!query.is_auto_refreshing());
    }
}
