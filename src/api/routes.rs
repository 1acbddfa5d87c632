//! API Routes
//!
//! Configures the Axum router with all cache admin endpoints.

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    clear_handler, delete_handler, get_handler, health_handler, invalidate_handler, keys_handler,
    last_event_handler, set_handler, stats_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `PUT /set` - Store a value with optional dependencies and patterns
/// - `GET /get/:key` - Retrieve a fresh value by key
/// - `DELETE /del/:key` - Delete a key and notify dependents
/// - `POST /invalidate` - Drop entries by key or glob pattern
/// - `POST /clear` - Drop every entry
/// - `GET /keys` - List stored keys in insertion order
/// - `GET /stats` - Cache statistics
/// - `GET /events/last` - Latest event, optionally for one key
/// - `GET /health` - Health check endpoint
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/set", put(set_handler))
        .route("/get/:key", get(get_handler))
        .route("/del/:key", delete(delete_handler))
        .route("/invalidate", post(invalidate_handler))
        .route("/clear", post(clear_handler))
        .route("/keys", get(keys_handler))
        .route("/stats", get(stats_handler))
        .route("/events/last", get(last_event_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
