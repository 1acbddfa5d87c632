//! Integration Tests for Event-Driven Invalidation
//!
//! Exercises the bus, keyed caches and cached fetch together through the
//! public crate API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reactive_cache::{
    CacheContext, CacheEvent, CacheEventKind, Config, EventBus, FetchOptions, InvalidateTarget,
    InvalidationOptions, KeyedCache,
};

// == Helper Functions ==

fn context(max_size: usize, ttl_ms: u64) -> CacheContext {
    CacheContext::new(Config {
        max_size,
        ttl_ms,
        ..Config::default()
    })
}

async fn wait_until(condition: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

// == Cross-Cache Cascade Tests ==

#[test]
fn test_change_in_one_cache_invalidates_another() {
    let ctx = context(100, 60_000);
    let users: KeyedCache<String> = ctx.keyed_cache();
    let reports: KeyedCache<u32> = ctx.keyed_cache();

    reports.set(
        "report:weekly",
        7,
        Some(&InvalidationOptions::new().depends_on("user:42")),
    );
    users.set("user:42", "Ada".to_string(), None);

    assert!(!reports.has("report:weekly"));
    assert_eq!(reports.stats().cascade_removals, 1);
    assert!(users.has("user:42"));
}

#[test]
fn test_pattern_cascade_across_caches() {
    let ctx = context(100, 60_000);
    let source: KeyedCache<u8> = ctx.keyed_cache();
    let derived: KeyedCache<u8> = ctx.keyed_cache();

    derived.set(
        "listing",
        1,
        Some(&InvalidationOptions::new().pattern("product:*:price")),
    );

    source.set("product:9:name", 0, None);
    assert!(derived.has("listing"));

    source.set("product:9:price", 0, None);
    assert!(!derived.has("listing"));
}

#[test]
fn test_same_key_changed_through_another_cache() {
    let ctx = context(100, 60_000);
    let profiles: KeyedCache<u8> = ctx.keyed_cache();
    let admin: KeyedCache<u8> = ctx.keyed_cache();
    let options = InvalidationOptions::new().pattern("cache:user:42:*");

    profiles.set("cache:user:42:profile", 1, Some(&options));
    assert!(profiles.has("cache:user:42:profile"));

    admin.delete("cache:user:42:profile");
    assert!(!profiles.has("cache:user:42:profile"));

    profiles.set("cache:user:42:profile", 2, Some(&options));
    admin.set("cache:user:42:profile", 3, None);
    assert!(!profiles.has("cache:user:42:profile"));
    assert_eq!(admin.get("cache:user:42:profile"), Some(3));
}

#[test]
fn test_chain_propagates_hop_by_hop() {
    let ctx = context(100, 60_000);
    let cache: KeyedCache<u8> = ctx.keyed_cache();

    cache.set("b", 1, Some(&InvalidationOptions::new().depends_on("a")));
    cache.set("c", 2, Some(&InvalidationOptions::new().depends_on("b")));
    cache.set("d", 3, Some(&InvalidationOptions::new().depends_on("c")));

    cache.delete("a");

    assert!(cache.is_empty());
    assert_eq!(ctx.bus().last_event(Some("d")).map(|e| e.kind), Some(CacheEventKind::Delete));
}

#[test]
fn test_invalidate_does_not_cascade() {
    let ctx = context(100, 60_000);
    let cache: KeyedCache<u8> = ctx.keyed_cache();
    cache.set("a", 1, None);
    cache.set("b", 2, Some(&InvalidationOptions::new().depends_on("a")));

    assert_eq!(cache.invalidate(&InvalidateTarget::key("a")), 1);

    assert!(cache.has("b"));
    let event = ctx.bus().last_event(None).unwrap();
    assert_eq!(event.kind, CacheEventKind::Invalidate);
    assert_eq!(event.key.as_deref(), Some("a"));
}

#[test]
fn test_destroyed_cache_stops_cascading() {
    let ctx = context(100, 60_000);
    let cache: KeyedCache<u8> = ctx.keyed_cache();
    cache.set("b", 1, Some(&InvalidationOptions::new().depends_on("a")));

    cache.destroy();
    ctx.bus().publish(CacheEvent::delete("a"));

    assert!(cache.has("b"));
}

// == Listener Isolation Tests ==

#[test]
fn test_failing_listeners_do_not_block_cascade() {
    let ctx = context(100, 60_000);
    let _failing = ctx.bus().subscribe(|_| anyhow::bail!("listener failed"));
    let _panicking = ctx.bus().subscribe(|_| panic!("listener panicked"));
    let cache: KeyedCache<u8> = ctx.keyed_cache();

    cache.set("b", 1, Some(&InvalidationOptions::new().depends_on("a")));
    cache.set("a", 1, None);

    assert!(!cache.has("b"));
}

#[test]
fn test_dropping_cache_releases_bus_listener() {
    let bus = EventBus::new();
    {
        let _cache: KeyedCache<u8> = KeyedCache::new(&bus, 10, Duration::from_secs(60));
        assert_eq!(bus.listener_count(), 1);
    }
    assert_eq!(bus.listener_count(), 0);
}

// == Capacity and TTL Tests ==

#[test]
fn test_capacity_evicts_oldest_silently() {
    let ctx = context(2, 60_000);
    let cache: KeyedCache<u8> = ctx.keyed_cache();

    cache.set("first", 1, None);
    cache.set("second", 2, None);
    cache.set("third", 3, None);

    assert_eq!(cache.keys(), vec!["second", "third"]);
    assert_eq!(cache.stats().evictions, 1);
    // Eviction publishes nothing for the evicted key.
    assert_eq!(
        ctx.bus().last_event(Some("first")).map(|e| e.kind),
        Some(CacheEventKind::Set)
    );
}

#[tokio::test]
async fn test_ttl_expiry_is_observed_on_read() {
    let ctx = context(10, 30);
    let cache: KeyedCache<u8> = ctx.keyed_cache();
    cache.set("k", 1, None);
    assert_eq!(cache.get("k"), Some(1));

    tokio::time::sleep(Duration::from_millis(60)).await;

    assert_eq!(cache.get("k"), None);
    assert_eq!(cache.stats().expirations, 1);
}

#[tokio::test]
async fn test_sweep_task_purges_and_notifies() {
    let ctx = context(10, 20);
    let cache: KeyedCache<u8> = ctx.keyed_cache();
    let dependents: KeyedCache<u8> = KeyedCache::new(ctx.bus(), 10, Duration::from_secs(60));
    cache.set("session", 1, None);
    dependents.set("view", 1, Some(&InvalidationOptions::new().depends_on("session")));

    let handle = reactive_cache::spawn_sweep_task(cache.clone(), Duration::from_millis(10));

    let swept = wait_until(|| cache.size() == 0 && !dependents.has("view")).await;
    handle.abort();
    assert!(swept);
}

// == Cached Fetch Tests ==

#[tokio::test]
async fn test_fetch_dropped_by_upstream_change() {
    let ctx = context(100, 60_000);
    let users: KeyedCache<String> = ctx.keyed_cache();
    let fetcher = ctx.fetcher::<usize>();
    let calls = AtomicUsize::new(0);
    let counter = &calls;
    let options = FetchOptions::new().invalidation(InvalidationOptions::new().depends_on("user:1"));

    for _ in 0..2 {
        fetcher
            .resolve(
                "user:1:posts",
                move || async move { Ok::<_, String>(counter.fetch_add(1, Ordering::SeqCst)) },
                &options,
            )
            .await
            .unwrap();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    users.set("user:1", "renamed".to_string(), None);

    fetcher
        .resolve(
            "user:1:posts",
            move || async move { Ok::<_, String>(counter.fetch_add(1, Ordering::SeqCst)) },
            &options,
        )
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_auto_refresh_versus_passive_query() {
    let ctx = context(100, 60_000);
    let fetcher = ctx.fetcher::<usize>();
    let active_calls = Arc::new(AtomicUsize::new(0));
    let passive_calls = Arc::new(AtomicUsize::new(0));

    let active = {
        let calls = active_calls.clone();
        fetcher.query(
            "active",
            move || {
                let calls = calls.clone();
                async move { Ok::<_, String>(calls.fetch_add(1, Ordering::SeqCst) + 1) }
            },
            FetchOptions::new().invalidation(
                InvalidationOptions::new()
                    .depends_on("source")
                    .auto_refresh(true),
            ),
        )
    };
    let passive = {
        let calls = passive_calls.clone();
        fetcher.query(
            "passive",
            move || {
                let calls = calls.clone();
                async move { Ok::<_, String>(calls.fetch_add(1, Ordering::SeqCst) + 1) }
            },
            FetchOptions::new().invalidation(InvalidationOptions::new().depends_on("source")),
        )
    };

    active.fetch().await.unwrap();
    passive.fetch().await.unwrap();

    fetcher.cache().delete("source");

    let refreshed = wait_until(|| fetcher.cache().get("active") == Some(2)).await;
    assert!(refreshed);
    assert_eq!(active.state().data, Some(2));

    assert!(!fetcher.cache().has("passive"));
    assert_eq!(passive_calls.load(Ordering::SeqCst), 1);
    assert_eq!(passive.fetch().await, Ok(2));
}

#[tokio::test]
async fn test_dropped_query_stops_refreshing() {
    let ctx = context(100, 60_000);
    let fetcher = ctx.fetcher::<usize>();
    let calls = Arc::new(AtomicUsize::new(0));
    let listeners_before = ctx.bus().listener_count();

    let query = {
        let calls = calls.clone();
        fetcher.query(
            "q",
            move || {
                let calls = calls.clone();
                async move { Ok::<_, String>(calls.fetch_add(1, Ordering::SeqCst)) }
            },
            FetchOptions::new()
                .invalidation(InvalidationOptions::new().depends_on("dep").auto_refresh(true)),
        )
    };
    query.fetch().await.unwrap();
    assert_eq!(ctx.bus().listener_count(), listeners_before + 1);

    drop(query);
    assert_eq!(ctx.bus().listener_count(), listeners_before);

    fetcher.cache().set("dep", 0, None);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
