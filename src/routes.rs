//! Application routing and pipeline assembly.
//!
//! # Request Pipeline (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │  HTTP tracing    │ ← tower-http request/response logging (all routes)
//! └────────┬─────────┘
//!          │
//!          ├──────────────────────► /health  (outside the chain)
//!          ▼
//! ┌──────────────────┐
//! │  API key         │ ← 401 if missing or wrong (omitted with AUTH_DISABLED)
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Rate limit      │ ← 429 if the client's bucket is empty (omitted at 0 rps)
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Security        │ ← 415 / 413, query sanitizing, security headers
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Telemetry       │ ← one tracer span per request
//! └────────┬─────────┘
//!          ▼
//!      /v1/books handlers
//! ```
//!
//! # Route Groups
//!
//! - `/health` - Liveness (no pipeline)
//! - `/v1/books`, `/v1/books/{id}` - Book resource

use axum::Router;
use axum::routing::get;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::handlers;
use crate::middleware::{ApiKeyAuth, Chain, RateLimitLayer, SecurityLayer, TelemetryLayer};
use crate::state::AppState;

/// Assemble the request pipeline for the current configuration.
///
/// Authentication is left out only when explicitly disabled; without a
/// configured key it rejects every request. Rate limiting is left out when
/// the state has no limiter. The remaining stages keep their relative order.
pub fn build_chain(state: &AppState) -> Chain {
    let config = &state.config;
    let mut chain = Chain::new();

    if config.auth_enabled() {
        let auth = match &config.api_key {
            Some(key) => {
                info!("API key authentication enabled");
                ApiKeyAuth::new(key)
            }
            None => {
                error!("API_KEY is not set, every /v1 request will be rejected");
                ApiKeyAuth::deny_all()
            }
        };
        chain = chain.stage("auth", auth);
    } else {
        warn!("Authentication disabled (AUTH_DISABLED=true), the API is reachable without a key");
    }

    match &state.rate_limiter {
        Some(registry) => {
            info!(
                rps = registry.quota().refill_rate_per_second(),
                burst = registry.quota().capacity(),
                "Rate limiting enabled"
            );
            chain = chain.stage("rate_limit", RateLimitLayer::new(registry.clone()));
        }
        None => info!("Rate limiting disabled (RATE_LIMIT_RPS=0)"),
    }

    chain
        .stage("security", SecurityLayer::new())
        .stage("telemetry", TelemetryLayer::new(state.tracer.clone()))
}

/// Put `routes` behind `chain`.
///
/// A panicking handler is turned into a 500 inside the chain, so the
/// response still passes back through every stage: it gets the security
/// headers and the telemetry span sees its status.
pub fn apply_pipeline<S>(routes: Router<S>, chain: Chain) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    routes.layer(CatchPanicLayer::new()).layer(chain)
}

/// Build the application router with all routes and the pipeline applied.
pub fn build_router(state: AppState) -> Router {
    let chain = build_chain(&state);
    info!(stages = ?chain.stage_names(), "Request pipeline assembled");

    let api = apply_pipeline(
        Router::new()
            .route(
                "/v1/books",
                get(handlers::list_books).post(handlers::create_book),
            )
            .route(
                "/v1/books/{id}",
                get(handlers::get_book)
                    .put(handlers::update_book)
                    .delete(handlers::delete_book),
            ),
        chain,
    );

    Router::new()
        .route("/health", get(handlers::health_check))
        .merge(api)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
