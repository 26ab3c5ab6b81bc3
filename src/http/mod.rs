//! HTTP server module
//!
//! Thin routing glue over the relay:
//! - Axum router mapping `/{station}` to an audio stream
//! - Health, version and debug endpoints
//! - CORS and request tracing middleware

pub mod handlers;
pub mod routes;

pub use routes::create_router;
