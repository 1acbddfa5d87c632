//! Event Bus Module
//!
//! Process-wide publish/subscribe channel for cache events with synchronous
//! fan-out and per-listener failure isolation.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::events::CacheEvent;

/// A bus listener. Returning `Err` is logged and does not stop delivery.
pub type Listener = Arc<dyn Fn(&CacheEvent) -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
struct BusState {
    /// Registered listeners in registration order
    listeners: Vec<(u64, Listener)>,
    next_id: u64,
    /// Latest event per key (overwritten, not a log)
    last_by_key: HashMap<String, CacheEvent>,
    /// Latest event overall
    last_event: Option<CacheEvent>,
}

// == Event Bus ==
/// Shared publish/subscribe channel.
///
/// Cloning is cheap and every clone refers to the same bus.
#[derive(Clone, Default)]
pub struct EventBus {
    state: Arc<Mutex<BusState>>,
}

impl EventBus {
    // == Constructor ==
    pub fn new() -> Self {
        Self::default()
    }

    // == Subscribe ==
    /// Registers a listener and returns the handle that removes it.
    ///
    /// Each call is an independent registration, even for the same closure.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&CacheEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe_listener(Arc::new(listener))
    }

    /// Registers an already shared listener.
    pub fn subscribe_listener(&self, listener: Listener) -> Subscription {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.listeners.push((id, listener));
        debug!(listener_id = id, total = state.listeners.len(), "Bus listener subscribed");

        Subscription {
            bus: Arc::downgrade(&self.state),
            id,
            active: true,
        }
    }

    // == Publish ==
    /// Records `event` as the latest (per key and global) and delivers it to
    /// every listener registered at the time of the call.
    ///
    /// Delivery iterates a snapshot, so listeners may publish, subscribe or
    /// unsubscribe re-entrantly. Returns the number of listeners that
    /// completed without error.
    pub fn publish(&self, event: CacheEvent) -> usize {
        let snapshot: Vec<(u64, Listener)> = {
            let mut state = self.state.lock();
            if let Some(key) = &event.key {
                state.last_by_key.insert(key.clone(), event.clone());
            }
            state.last_event = Some(event.clone());
            state.listeners.clone()
        };

        let mut delivered = 0;
        for (id, listener) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener(&event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    warn!(
                        listener_id = id,
                        kind = ?event.kind,
                        key = ?event.key,
                        error = %e,
                        "Bus listener failed"
                    );
                }
                Err(panic) => {
                    let panic_msg = if let Some(s) = panic.downcast_ref::<&str>() {
                        s.to_string()
                    } else if let Some(s) = panic.downcast_ref::<String>() {
                        s.clone()
                    } else {
                        "Unknown panic".to_string()
                    };
                    error!(
                        listener_id = id,
                        kind = ?event.kind,
                        key = ?event.key,
                        panic = %panic_msg,
                        "Bus listener panicked"
                    );
                }
            }
        }
        delivered
    }

    // == Last Event ==
    /// Returns the latest event for `key`, or the latest event overall when
    /// `key` is `None`.
    pub fn last_event(&self, key: Option<&str>) -> Option<CacheEvent> {
        let state = self.state.lock();
        match key {
            Some(key) => state.last_by_key.get(key).cloned(),
            None => state.last_event.clone(),
        }
    }

    /// Number of currently registered listeners.
    pub fn listener_count(&self) -> usize {
        self.state.lock().listeners.len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("EventBus")
            .field("listeners", &state.listeners.len())
            .field("tracked_keys", &state.last_by_key.len())
            .finish_non_exhaustive()
    }
}

// == Subscription ==
/// Removal capability for a bus listener.
///
/// Dropping the handle unsubscribes, so a subscription lives exactly as long
/// as its owner.
#[must_use = "dropping a Subscription immediately unsubscribes the listener"]
pub struct Subscription {
    bus: Weak<Mutex<BusState>>,
    id: u64,
    active: bool,
}

impl Subscription {
    /// Explicitly removes the listener.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    /// Whether the listener is still registered on a live bus.
    pub fn is_active(&self) -> bool {
        self.active && self.bus.strong_count() > 0
    }

    fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;

        // A bus that is already gone has nothing left to remove.
        if let Some(state) = self.bus.upgrade() {
            let mut state = state.lock();
            state.listeners.retain(|(id, _)| *id != self.id);
            debug!(
                listener_id = self.id,
                total = state.listeners.len(),
                "Bus listener unsubscribed"
            );
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}
