//! Liveness endpoint.
//!
//! `GET /health` is mounted outside the request pipeline: it needs no API
//! key, is never rate limited and opens no tracer span, so health checks keep
//! working while clients are being throttled.

use axum::Json;
use axum::extract::State;
use chrono::Utc;
use tracing::instrument;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint.
///
/// Always returns 200 OK.
///
/// # Response Body
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "uptime_seconds": 3600,
///   "rate_limited_clients": 12,
///   "timestamp": "2024-01-15T10:30:00Z"
/// }
/// ```
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.uptime_seconds(),
        rate_limited_clients: state.rate_limited_clients(),
        timestamp: Utc::now(),
    })
}
