//! Reactive Cache - keyed caches that invalidate each other over an event bus
//!
//! Every cache change is published on a shared [`EventBus`]. Entries record
//! the keys and key patterns they were derived from and drop themselves when
//! one of those changes. [`CachedFetcher`] layers get-or-fetch on top, with
//! optional auto-refresh of bound queries.

pub mod api;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod fetch;
pub mod models;
pub mod tasks;

pub use api::AppState;
pub use cache::{InvalidateTarget, InvalidationOptions, KeyedCache};
pub use config::Config;
pub use context::CacheContext;
pub use events::{CacheEvent, CacheEventKind, EventBus, Subscription};
pub use fetch::{CachedFetcher, CachedQuery, FetchOptions, QueryState};
pub use tasks::spawn_sweep_task;
