//! Fetch Metrics Module
//!
//! Measurement hooks reported around producer calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

// == Measure Kind ==
/// Why a producer ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasureKind {
    /// Caller-initiated fetch after a miss or with `skip_cache`
    Fetch,
    /// Refetch triggered by an invalidation event
    Refresh,
}

/// Handle for one started measurement.
///
/// Two measurements with the same name (concurrent fetches of one key) get
/// distinct ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeasureId(pub u64);

// == Metrics Sink ==
/// External sink receiving fetch start/end notifications.
pub trait MetricsSink: Send + Sync {
    /// Marks the start of measurement `name`.
    fn start_measure(&self, name: &str) -> MeasureId;

    /// Closes the measurement started as `id`. `metadata` carries at least
    /// `success`.
    fn end_measure(&self, id: MeasureId, name: &str, kind: MeasureKind, metadata: Value);
}

/// Discards every measurement.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn start_measure(&self, _name: &str) -> MeasureId {
        MeasureId(0)
    }

    fn end_measure(&self, _id: MeasureId, _name: &str, _kind: MeasureKind, _metadata: Value) {}
}

// == Tracing Metrics ==
/// Logs each measurement's duration and outcome through `tracing`.
#[derive(Debug, Default)]
pub struct TracingMetrics {
    next_id: AtomicU64,
    started: Mutex<HashMap<MeasureId, Instant>>,
}

impl TracingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of measurements started and not yet ended.
    pub fn open_measures(&self) -> usize {
        self.started.lock().len()
    }
}

impl MetricsSink for TracingMetrics {
    fn start_measure(&self, _name: &str) -> MeasureId {
        let id = MeasureId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.started.lock().insert(id, Instant::now());
        id
    }

    fn end_measure(&self, id: MeasureId, name: &str, kind: MeasureKind, metadata: Value) {
        let elapsed_ms = self
            .started
            .lock()
            .remove(&id)
            .map(|start| start.elapsed().as_secs_f64() * 1000.0);

        info!(
            measure = %name,
            kind = ?kind,
            elapsed_ms = ?elapsed_ms,
            metadata = %metadata,
            "Measurement finished"
        );
    }
}

// == Measure Guard ==
/// Open measurement that is always closed: explicitly with
/// [`MeasureGuard::finish`], or as cancelled when dropped unfinished.
pub(crate) struct MeasureGuard<'a> {
    sink: &'a dyn MetricsSink,
    id: MeasureId,
    name: String,
    key: &'a str,
    kind: MeasureKind,
    finished: bool,
}

impl<'a> MeasureGuard<'a> {
    pub(crate) fn start(sink: &'a dyn MetricsSink, key: &'a str, kind: MeasureKind) -> Self {
        let name = format!("fetch:{}", key);
        let id = sink.start_measure(&name);
        Self {
            sink,
            id,
            name,
            key,
            kind,
            finished: false,
        }
    }

    pub(crate) fn finish(mut self, metadata: Value) {
        self.finished = true;
        self.sink.end_measure(self.id, &self.name, self.kind, metadata);
    }
}

impl Drop for MeasureGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.sink.end_measure(
                self.id,
                &self.name,
                self.kind,
                json!({ "key": self.key, "success": false, "cancelled": true }),
            );
        }
    }
}
