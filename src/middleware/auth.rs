//! API key authentication stage.
//!
//! # Usage
//!
//! Set the `API_KEY` environment variable to enable authentication:
//!
//! ```bash
//! API_KEY=your-secret-key cargo run
//! ```
//!
//! Clients must then send the key in the `X-API-KEY` header:
//!
//! ```bash
//! curl -H "X-API-KEY: your-secret-key" http://localhost:8080/v1/books
//! ```
//!
//! A missing or wrong key ends the request with 401 before any later stage
//! runs. Without a configured key the stage fails closed and rejects every
//! request; it is only left out of the chain when `AUTH_DISABLED=true`
//! (see [`crate::routes::build_chain`]).

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{Request, Response};
use axum::response::IntoResponse;
use subtle::ConstantTimeEq;
use tower::{Layer, Service};
use tracing::warn;

use crate::error::AppError;
use crate::metrics::{self, RejectReason};

/// Header carrying the shared secret.
pub const API_KEY_HEADER: &str = "x-api-key";

/// API key authentication layer.
#[derive(Clone)]
pub struct ApiKeyAuth {
    expected_key: Option<Arc<[u8]>>,
}

impl ApiKeyAuth {
    pub fn new(api_key: impl AsRef<[u8]>) -> Self {
        Self {
            expected_key: Some(Arc::from(api_key.as_ref())),
        }
    }

    /// A stage that rejects every request, used when no key is configured.
    pub fn deny_all() -> Self {
        Self { expected_key: None }
    }
}

impl std::fmt::Debug for ApiKeyAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyAuth")
            .field("expected_key", &"<redacted>")
            .finish()
    }
}

impl<S> Layer<S> for ApiKeyAuth {
    type Service = ApiKeyAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ApiKeyAuthService {
            inner,
            expected_key: self.expected_key.clone(),
        }
    }
}

/// API key authentication service wrapper.
#[derive(Clone)]
pub struct ApiKeyAuthService<S> {
    inner: S,
    expected_key: Option<Arc<[u8]>>,
}

impl<S> Service<Request<Body>> for ApiKeyAuthService<S>
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
        let authorized = match (req.headers().get(API_KEY_HEADER), &self.expected_key) {
            (Some(provided), Some(expected)) => constant_time_eq(provided.as_bytes(), expected),
            _ => false,
        };
        let mut inner = self.inner.clone();

        Box::pin(async move {
            if authorized {
                return inner.call(req).await;
            }

            warn!(
                path = %req.uri().path(),
                key_present = req.headers().contains_key(API_KEY_HEADER),
                "Rejected request with missing or invalid API key"
            );
            metrics::record_rejection(RejectReason::Unauthorized);
            Ok(AppError::Unauthorized("unauthorized".to_string()).into_response())
        })
    }
}

/// Compare two byte strings without leaking the position of the first
/// mismatch through timing.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}
