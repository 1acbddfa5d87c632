//! API Module
//!
//! HTTP handlers and routing for the cache admin REST API.
//!
//! # Endpoints
//! - `PUT /set`, `GET /get/:key`, `DELETE /del/:key` - Entry access
//! - `POST /invalidate`, `POST /clear` - Invalidation
//! - `GET /keys`, `GET /stats`, `GET /events/last` - Inspection
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
