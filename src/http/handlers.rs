//! HTTP request handlers

use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, error};

use crate::error::RelayError;
use crate::state::AppState;

/// HTTP error type
#[derive(Debug)]
pub enum HttpError {
    StationNotFound(String),
    InternalError(String),
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            HttpError::StationNotFound(name) => {
                (StatusCode::NOT_FOUND, format!("Station not found: {}", name))
            }
            HttpError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, body).into_response()
    }
}

impl From<RelayError> for HttpError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::StationNotFound(name) => HttpError::StationNotFound(name),
            _ => {
                error!("Request failed: {}", err);
                HttpError::InternalError(err.to_string())
            }
        }
    }
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "OK"
}

/// Version endpoint
pub async fn version_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Audio stream endpoint
/// GET /{station} and GET /play/{station}
pub async fn play_station(
    State(state): State<Arc<AppState>>,
    Path(station): Path<String>,
) -> Result<Response, HttpError> {
    let stream = state.relay.open_stream(&station)?;
    debug!("Serving {} as session {}", station, stream.session_id());

    let mut headers = HeaderMap::new();
    headers.insert("Content-Type", HeaderValue::from_static("audio/mpeg"));
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));

    // Dropping the body (client gone) drops the stream and ends the session
    let body = Body::from_stream(stream.map(Ok::<_, Infallible>));

    Ok((headers, body).into_response())
}

/// Debug endpoint - resolution cache per station
pub async fn station_status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let entries = state.cache.snapshot();
    let unresolved: Vec<_> = state
        .registry
        .iter()
        .filter(|s| state.cache.entry(&s.name).is_none())
        .map(|s| s.name.clone())
        .collect();

    Json(serde_json::json!({
        "count": state.registry.len(),
        "stations": entries,
        "unresolved": unresolved,
        "staleness_secs": state.refresher.staleness().as_secs(),
    }))
}

/// Debug endpoint - live relay sessions
pub async fn active_sessions(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let sessions = state.relay.sessions();

    Json(serde_json::json!({
        "count": sessions.len(),
        "sessions": sessions,
        "processes": state.relay.tracker().counts(),
        "scheduler": {
            "passes": state.scheduler_status.passes(),
            "last_pass": state.scheduler_status.last_pass(),
        },
    }))
}
