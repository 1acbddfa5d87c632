//! API Handlers
//!
//! HTTP request handlers for each cache admin endpoint.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::Value;
use tracing::debug;

use crate::cache::KeyedCache;
use crate::context::CacheContext;
use crate::error::{CacheError, Result};
use crate::events::CacheEvent;
use crate::models::{
    ClearResponse, DeleteResponse, GetResponse, HealthResponse, InvalidateRequest,
    InvalidateResponse, KeysResponse, LastEventQuery, SetRequest, SetResponse, StatsResponse,
};

/// Application state shared across all handlers.
///
/// The keyed cache synchronizes internally, so handlers share it by cloning.
#[derive(Clone, Debug)]
pub struct AppState {
    pub cache: KeyedCache<Value>,
}

impl AppState {
    pub fn new(cache: KeyedCache<Value>) -> Self {
        Self { cache }
    }

    /// Builds the admin cache on the context's shared bus.
    pub fn from_context(context: &CacheContext) -> Self {
        Self::new(context.keyed_cache())
    }
}

/// Handler for PUT /set
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let invalidation = req.invalidation();
    state
        .cache
        .set(req.key.clone(), req.value, invalidation.as_ref());

    Ok(Json(SetResponse::new(req.key)))
}

/// Handler for GET /get/:key
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>> {
    match state.cache.get(&key) {
        Some(value) => Ok(Json(GetResponse::new(key, value))),
        None => Err(CacheError::NotFound(key)),
    }
}

/// Handler for DELETE /del/:key
///
/// Always succeeds: the delete event reaches dependents whether or not this
/// cache held the key.
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Json<DeleteResponse> {
    let removed = state.cache.delete(&key);
    Json(DeleteResponse::new(key, removed))
}

/// Handler for POST /invalidate
pub async fn invalidate_handler(
    State(state): State<AppState>,
    Json(req): Json<InvalidateRequest>,
) -> Result<Json<InvalidateResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let removed = state.cache.invalidate(&req.target());
    debug!(key = ?req.key, pattern = ?req.pattern, removed, "Invalidated via API");

    Ok(Json(InvalidateResponse { removed }))
}

/// Handler for POST /clear
pub async fn clear_handler(State(state): State<AppState>) -> Json<ClearResponse> {
    state.cache.clear();
    Json(ClearResponse::cleared())
}

/// Handler for GET /keys
pub async fn keys_handler(State(state): State<AppState>) -> Json<KeysResponse> {
    Json(KeysResponse::new(state.cache.keys()))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse::from(state.cache.stats()))
}

/// Handler for GET /events/last
///
/// With `?key=` returns the latest event naming that key, otherwise the
/// latest event of all.
pub async fn last_event_handler(
    State(state): State<AppState>,
    Query(query): Query<LastEventQuery>,
) -> Result<Json<CacheEvent>> {
    state
        .cache
        .bus()
        .last_event(query.key.as_deref())
        .map(Json)
        .ok_or_else(|| {
            CacheError::NotFound(query.key.unwrap_or_else(|| "no events published".to_string()))
        })
}

/// Handler for GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::healthy(state.cache.bus().listener_count()))
}
