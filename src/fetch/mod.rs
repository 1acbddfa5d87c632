//! Fetch Module
//!
//! Get-or-fetch contract built on the keyed cache, with optional
//! auto-refresh when a dependency changes.

mod fetcher;
mod metrics;
mod query;

pub use fetcher::{CachedFetcher, FetchOptions};
pub use metrics::{MeasureId, MeasureKind, MetricsSink, NoopMetrics, TracingMetrics};
pub use query::{CachedQuery, QueryState};
