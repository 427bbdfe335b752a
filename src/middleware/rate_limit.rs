//! Per-client rate limiting stage.
//!
//! # Algorithm
//!
//! Each client identity (see [`super::ip`]) owns a token bucket held by a
//! shared [`RateLimiterRegistry`]. A request takes one token; an empty
//! bucket ends the request with 429.
//!
//! # Configuration
//!
//! - `RATE_LIMIT_RPS`: refill rate per client (0 leaves the stage out)
//! - `RATE_LIMIT_BURST`: bucket capacity per client
//!
//! # Response Headers
//!
//! On rate limit exceeded (429):
//! - `Retry-After`: Whole seconds until the next token, at least 1
//! - `X-RateLimit-Limit`: Bucket capacity
//! - `X-RateLimit-Remaining`: Always `0`
//!
//! Allowed responses are passed through untouched.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tracing::{trace, warn};

use super::ip::client_identity;
use crate::error::AppError;
use crate::limiter::{RateDecision, RateLimiterRegistry};
use crate::metrics::{self, RejectReason};

/// Rate limiting layer for the request pipeline.
///
/// Cloning the layer shares the registry, so every route wrapped by the
/// same layer draws from the same buckets.
///
/// # Example
///
/// ```rust,ignore
/// let quota = Quota::new(10, 5.0)?;
/// let layer = RateLimitLayer::new(Arc::new(RateLimiterRegistry::new(quota)));
/// let app = Router::new()
///     .route("/api", get(handler))
///     .layer(layer);
/// ```
#[derive(Clone, Debug)]
pub struct RateLimitLayer {
    registry: Arc<RateLimiterRegistry>,
}

impl RateLimitLayer {
    pub fn new(registry: Arc<RateLimiterRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<RateLimiterRegistry> {
        &self.registry
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            registry: self.registry.clone(),
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    registry: Arc<RateLimiterRegistry>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let registry = self.registry.clone();
        let mut inner = self.inner.clone();

        // Resolve before moving req into the future
        let client_id = client_identity(&req);

        Box::pin(async move {
            match registry.check(&client_id) {
                RateDecision::Allowed { remaining } => {
                    trace!(client_id = %client_id, remaining, "Rate limit check passed");
                    inner.call(req).await
                }
                RateDecision::Denied { retry_after } => {
                    let retry_after_secs = retry_after_header_secs(retry_after);

                    warn!(
                        client_id = %client_id,
                        path = %req.uri().path(),
                        retry_after_secs,
                        "Rate limit exceeded for client"
                    );
                    metrics::record_rejection(RejectReason::RateLimited);

                    Ok(AppError::RateLimited {
                        retry_after_secs,
                        limit: registry.quota().capacity(),
                    }
                    .into_response())
                }
            }
        })
    }
}

/// Round a wait time up to whole seconds for `Retry-After`, never below 1.
fn retry_after_header_secs(wait: Duration) -> u64 {
    let secs = wait
        .as_secs()
        .saturating_add(u64::from(wait.subsec_nanos() > 0));
    secs.max(1)
}
