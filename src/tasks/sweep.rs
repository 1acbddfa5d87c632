//! Expiry Sweep Task
//!
//! Background task that periodically removes expired cache entries. Expiry
//! stays lazy without it; the sweep only frees slots held by stale entries
//! nobody reads.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::KeyedCache;

/// Spawns a background task that purges expired entries from `cache` every
/// `interval`.
///
/// Each purged key gets a `Delete` on the bus, exactly like a lazy expiry.
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
///
/// # Example
/// ```ignore
/// let cache = context.keyed_cache::<serde_json::Value>();
/// let sweep_handle = spawn_sweep_task(cache.clone(), Duration::from_secs(30));
/// // Later, during shutdown:
/// sweep_handle.abort();
/// ```
pub fn spawn_sweep_task<V>(cache: KeyedCache<V>, interval: Duration) -> JoinHandle<()>
where
    V: Clone + Send + 'static,
{
    tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "Starting expiry sweep task");

        loop {
            tokio::time::sleep(interval).await;

            let removed = cache.purge_expired();
            if removed > 0 {
                info!(removed, "Expiry sweep removed stale entries");
            } else {
                debug!("Expiry sweep found no stale entries");
            }
        }
    })
}
