//! Keyed Cache Module
//!
//! Bounded, TTL-aware key/value store wired to the event bus. Writes and
//! deletes seen on the bus drop every entry that depends on the changed key.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::cache::{
    pattern_matches, CacheEntry, CacheStats, InvalidateTarget, InvalidationOptions,
};
use crate::events::{CacheEvent, CacheEventKind, EventBus, Subscription};

static NEXT_CACHE_ID: AtomicU64 = AtomicU64::new(1);

struct StoreState<V> {
    /// Entries in insertion order; the front is the next eviction candidate
    entries: IndexMap<String, CacheEntry<V>>,
    stats: CacheStats,
}

struct Shared<V> {
    /// Stamped on the `Set` events this cache publishes
    id: u64,
    state: Mutex<StoreState<V>>,
    bus: EventBus,
    max_size: usize,
    ttl: Duration,
    /// Cascade listener on the bus; `None` once destroyed
    subscription: Mutex<Option<Subscription>>,
}

// == Keyed Cache ==
/// Keyed store with TTL expiry, FIFO capacity eviction and
/// dependency-driven invalidation.
///
/// Cloning is cheap; clones share entries and the bus subscription. The
/// subscription is released by [`KeyedCache::destroy`] or when the last clone
/// is dropped.
pub struct KeyedCache<V> {
    shared: Arc<Shared<V>>,
}

impl<V> Clone for KeyedCache<V> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<V> KeyedCache<V>
where
    V: Clone + Send + 'static,
{
    // == Constructor ==
    /// Creates a cache on `bus` holding at most `max_size` entries for `ttl`
    /// each, and subscribes its cascade listener.
    pub fn new(bus: &EventBus, max_size: usize, ttl: Duration) -> Self {
        let shared = Arc::new(Shared {
            id: NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(StoreState {
                entries: IndexMap::new(),
                stats: CacheStats::new(),
            }),
            bus: bus.clone(),
            max_size,
            ttl,
            subscription: Mutex::new(None),
        });

        // The listener holds a weak handle so the bus never keeps the cache alive.
        let weak: Weak<Shared<V>> = Arc::downgrade(&shared);
        let subscription = bus.subscribe(move |event| {
            if let Some(shared) = weak.upgrade() {
                KeyedCache { shared }.cascade(event);
            }
            Ok(())
        });
        *shared.subscription.lock() = Some(subscription);

        Self { shared }
    }

    // == Get ==
    /// Returns the value under `key` if present and fresh.
    ///
    /// An expired entry is removed and a `Delete` is published for it.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut state = self.shared.state.lock();
        let ttl = self.shared.ttl;
        let lookup = state.entries.get(key).map(|entry| {
            if entry.is_expired(ttl) {
                None
            } else {
                Some(entry.value.clone())
            }
        });

        match lookup {
            Some(Some(value)) => {
                state.stats.record_hit();
                Some(value)
            }
            Some(None) => {
                state.entries.shift_remove(key);
                state.stats.record_expirations(1);
                state.stats.record_miss();
                drop(state);

                debug!(key = %key, "Expired entry removed on read");
                self.shared.bus.publish(CacheEvent::delete(key));
                None
            }
            None => {
                state.stats.record_miss();
                None
            }
        }
    }

    // == Has ==
    /// Same expiry semantics as [`KeyedCache::get`], without cloning the value.
    pub fn has(&self, key: &str) -> bool {
        let mut state = self.shared.state.lock();
        let expired = match state.entries.get(key) {
            None => return false,
            Some(entry) => entry.is_expired(self.shared.ttl),
        };
        if !expired {
            return true;
        }

        state.entries.shift_remove(key);
        state.stats.record_expirations(1);
        drop(state);

        debug!(key = %key, "Expired entry removed on lookup");
        self.shared.bus.publish(CacheEvent::delete(key));
        false
    }

    // == Set ==
    /// Stores `value` under `key` with optional dependency metadata and
    /// publishes a `Set`.
    ///
    /// At capacity the oldest inserted key is evicted first. Eviction order is
    /// insertion order, not access order; re-setting a key keeps its position.
    pub fn set(
        &self,
        key: impl Into<String>,
        value: V,
        invalidation: Option<&InvalidationOptions>,
    ) {
        let key = key.into();
        let entry = match invalidation {
            Some(options) => CacheEntry::new(
                value,
                options.dependencies.iter().cloned(),
                options.patterns.iter().cloned(),
            ),
            None => CacheEntry::new(value, Vec::new(), Vec::new()),
        };

        {
            let mut state = self.shared.state.lock();
            if state.entries.len() >= self.shared.max_size {
                if let Some((evicted, _)) = state.entries.shift_remove_index(0) {
                    state.stats.record_eviction();
                    debug!(key = %evicted, max_size = self.shared.max_size, "Evicted oldest entry");
                }
            }
            state.entries.insert(key.clone(), entry);
        }

        self.shared
            .bus
            .publish(CacheEvent::set(key).with_origin(self.shared.id));
    }

    // == Delete ==
    /// Removes `key` and publishes a `Delete`, whether or not it was present.
    ///
    /// Returns true if an entry was removed.
    pub fn delete(&self, key: &str) -> bool {
        let removed = self.shared.state.lock().entries.shift_remove(key).is_some();
        self.shared.bus.publish(CacheEvent::delete(key));
        removed
    }

    // == Clear ==
    /// Removes every entry and publishes a single `Clear`.
    pub fn clear(&self) {
        self.shared.state.lock().entries.clear();
        self.shared.bus.publish(CacheEvent::clear());
    }

    // == Invalidate ==
    /// Removes the targeted key and/or every key matching the targeted
    /// pattern, then publishes one `Invalidate`.
    ///
    /// Returns the number of entries removed.
    pub fn invalidate(&self, target: &InvalidateTarget) -> usize {
        let removed = {
            let mut state = self.shared.state.lock();
            let before = state.entries.len();
            if let Some(key) = &target.key {
                state.entries.shift_remove(key);
            }
            if let Some(pattern) = &target.pattern {
                state.entries.retain(|key, _| !pattern_matches(pattern, key));
            }
            before - state.entries.len()
        };

        debug!(key = ?target.key, pattern = ?target.pattern, removed, "Invalidated entries");
        self.shared.bus.publish(CacheEvent::invalidate(
            target.key.clone(),
            target.pattern.clone(),
        ));
        removed
    }

    // == Keys ==
    /// Returns all currently valid keys in insertion order, removing expired
    /// entries met along the way.
    pub fn keys(&self) -> Vec<String> {
        let (valid, expired) = {
            let mut state = self.shared.state.lock();
            let expired = Self::take_expired(&mut state, self.shared.ttl);
            let valid: Vec<String> = state.entries.keys().cloned().collect();
            (valid, expired)
        };

        self.publish_expired(&expired);
        valid
    }

    // == Purge Expired ==
    /// Removes every expired entry, publishing a `Delete` for each.
    ///
    /// Returns the number of entries removed.
    pub fn purge_expired(&self) -> usize {
        let expired = {
            let mut state = self.shared.state.lock();
            Self::take_expired(&mut state, self.shared.ttl)
        };

        self.publish_expired(&expired);
        expired.len()
    }

    // == Size ==
    /// Raw entry count, including stale entries not yet noticed.
    pub fn size(&self) -> usize {
        self.shared.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    // == Stats ==
    pub fn stats(&self) -> CacheStats {
        let state = self.shared.state.lock();
        let mut stats = state.stats.clone();
        stats.total_entries = state.entries.len();
        stats
    }

    // == Destroy ==
    /// Unsubscribes the cascade listener. Entries are kept.
    pub fn destroy(&self) {
        if self.shared.subscription.lock().take().is_some() {
            debug!("Keyed cache detached from event bus");
        }
    }

    /// The bus this cache publishes to and listens on.
    pub fn bus(&self) -> &EventBus {
        &self.shared.bus
    }

    pub fn ttl(&self) -> Duration {
        self.shared.ttl
    }

    pub fn max_size(&self) -> usize {
        self.shared.max_size
    }

    // == Cascade ==
    /// Drops entries depending on the key changed by a `Set` or `Delete`.
    ///
    /// Each removal goes through [`KeyedCache::delete`], so its own `Delete`
    /// reaches the bus and further dependents are dropped hop by hop.
    ///
    /// The entry just written by this cache's own `Set` is left alone; a change
    /// to the same key coming from anywhere else is treated like any other.
    fn cascade(&self, event: &CacheEvent) {
        if !event.is_change() {
            return;
        }
        let Some(changed) = event.key.as_deref() else {
            return;
        };

        let own_set =
            event.kind == CacheEventKind::Set && event.origin == Some(self.shared.id);

        let dependents: Vec<String> = {
            let state = self.shared.state.lock();
            state
                .entries
                .iter()
                .filter(|(key, entry)| {
                    !(own_set && key.as_str() == changed) && entry.depends_on(changed)
                })
                .map(|(key, _)| key.clone())
                .collect()
        };

        for key in dependents {
            // A previous hop may already have taken it out.
            if self.delete(&key) {
                self.shared.state.lock().stats.record_cascade_removal();
                debug!(key = %key, changed = %changed, "Dependent entry invalidated");
            }
        }
    }

    fn take_expired(state: &mut StoreState<V>, ttl: Duration) -> Vec<String> {
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(ttl))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            state.entries.shift_remove(key);
        }
        state.stats.record_expirations(expired.len());
        expired
    }

    fn publish_expired(&self, expired: &[String]) {
        for key in expired {
            self.shared.bus.publish(CacheEvent::delete(key.as_str()));
        }
    }
}

impl<V> std::fmt::Debug for KeyedCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedCache")
            .field("entries", &self.shared.state.lock().entries.len())
            .field("max_size", &self.shared.max_size)
            .field("ttl", &self.shared.ttl)
            .finish_non_exhaustive()
    }
}
