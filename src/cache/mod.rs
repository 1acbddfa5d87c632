//! Cache Module
//!
//! Keyed in-memory cache with TTL expiry, capacity eviction and
//! dependency/pattern invalidation driven by the event bus.

mod entry;
mod invalidation;
mod pattern;
mod stats;
mod store;


// Re-export public types
pub use entry::CacheEntry;
pub use invalidation::{InvalidateTarget, InvalidationOptions, InvalidationPredicate};
pub use pattern::pattern_matches;
pub use stats::CacheStats;
pub use store::KeyedCache;

// == Public Constants ==
/// Maximum allowed key length in bytes, enforced at the HTTP boundary
pub const MAX_KEY_LENGTH: usize = 256;
