//! Telemetry stage: one tracer span per request.
//!
//! The span is named `"<METHOD> <PATH>"` and is started when the request
//! enters the stage. A [`SpanGuard`] owns it from then on and finishes it
//! when dropped, which covers a normal response, an error, a panic caught
//! further out (the unwinding future is dropped) and a client disconnect
//! that cancels the request future.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use tower::{Layer, Service};
use tracing::Instrument;

use crate::metrics;
use crate::tracer::{SpanContext, Tracer};

/// Build the span name for a request.
pub fn span_name(method: &Method, path: &str) -> String {
    format!("{method} {path}")
}

/// Finishes a span exactly once, when dropped.
#[derive(Debug)]
pub struct SpanGuard {
    tracer: Arc<dyn Tracer>,
    span: Option<SpanContext>,
}

impl SpanGuard {
    pub fn new(tracer: Arc<dyn Tracer>, span: SpanContext) -> Self {
        Self {
            tracer,
            span: Some(span),
        }
    }

    /// Finish the span now instead of at drop.
    pub fn finish(mut self) {
        self.finish_inner();
    }

    fn finish_inner(&mut self) {
        if let Some(span) = self.span.take() {
            self.tracer.finish_span(span);
        }
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        self.finish_inner();
    }
}

/// Layer wrapping a service in request spans.
#[derive(Clone, Debug)]
pub struct TelemetryLayer {
    tracer: Arc<dyn Tracer>,
}

impl TelemetryLayer {
    pub fn new(tracer: Arc<dyn Tracer>) -> Self {
        Self { tracer }
    }
}

impl<S> Layer<S> for TelemetryLayer {
    type Service = TelemetryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TelemetryService {
            inner,
            tracer: self.tracer.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TelemetryService<S> {
    inner: S,
    tracer: Arc<dyn Tracer>,
}

impl<S> Service<Request<Body>> for TelemetryService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let name = span_name(req.method(), req.uri().path());
        let method = req.method().clone();
        let context = self.tracer.start_span(req.extensions_mut(), &name);
        let span = context.span().clone();
        let guard = SpanGuard::new(self.tracer.clone(), context);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let started = Instant::now();
            let result = inner.call(req).instrument(span).await;

            if let Ok(response) = &result {
                metrics::record_request_duration(
                    method.as_str(),
                    response.status().as_u16(),
                    started.elapsed().as_secs_f64(),
                );
            }

            guard.finish();
            result
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    use axum::http::{Extensions, StatusCode};
    use parking_lot::Mutex;
    use tower::ServiceExt;

    use crate::tracer::NullTracer;

    #[derive(Debug, Default)]
    struct Recording {
        events: Mutex<Vec<String>>,
    }

    impl Tracer for Recording {
        fn start_span(&self, extensions: &mut Extensions, name: &str) -> SpanContext {
            self.events.lock().push(format!("start {name}"));
            NullTracer.start_span(extensions, name)
        }

        fn finish_span(&self, span: SpanContext) {
            self.events.lock().push(format!("finish {}", span.name()));
        }
    }

    #[test]
    fn test_span_name() {
        assert_eq!(span_name(&Method::DELETE, "/v1/books/3"), "DELETE /v1/books/3");
    }

    #[tokio::test]
    async fn test_span_wraps_handler() {
        let tracer = Arc::new(Recording::default());
        let events = tracer.clone();
        let handler = tower::service_fn(move |_req: Request<Body>| {
            events.events.lock().push("handler".to_string());
            async { Ok::<_, Infallible>(Response::new(Body::empty())) }
        });

        let req = Request::builder()
            .method(Method::POST)
            .uri("/v1/books?x=1")
            .body(Body::empty())
            .unwrap();
        TelemetryLayer::new(tracer.clone())
            .layer(handler)
            .oneshot(req)
            .await
            .unwrap();

        assert_eq!(
            tracer.events.lock().as_slice(),
            ["start POST /v1/books", "handler", "finish POST /v1/books"]
        );
    }

    #[tokio::test]
    async fn test_span_finished_on_error_status() {
        let tracer = Arc::new(Recording::default());
        let handler = tower::service_fn(|_req: Request<Body>| async {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            Ok::<_, Infallible>(response)
        });

        let req = Request::builder().uri("/boom").body(Body::empty()).unwrap();
        let response = TelemetryLayer::new(tracer.clone())
            .layer(handler)
            .oneshot(req)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(tracer.events.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_span_finished_when_future_dropped() {
        let tracer = Arc::new(Recording::default());
        let handler = tower::service_fn(|_req: Request<Body>| async {
            std::future::pending::<()>().await;
            Ok::<_, Infallible>(Response::new(Body::empty()))
        });

        let mut service = TelemetryLayer::new(tracer.clone()).layer(handler);
        let req = Request::builder().uri("/slow").body(Body::empty()).unwrap();
        let future = service.call(req);
        assert_eq!(tracer.events.lock().as_slice(), ["start GET /slow"]);

        drop(future);
        assert_eq!(
            tracer.events.lock().as_slice(),
            ["start GET /slow", "finish GET /slow"]
        );
    }

    #[test]
    fn test_guard_finishes_once() {
        let tracer = Arc::new(Recording::default());
        let mut extensions = Extensions::new();
        let span = tracer.start_span(&mut extensions, "x");

        SpanGuard::new(tracer.clone(), span).finish();
        assert_eq!(tracer.events.lock().len(), 2);
    }
}
