//! Tracer abstraction used by the telemetry stage.
//!
//! Two implementations are chosen once at startup by [`tracer_for`]:
//!
//! - [`NullTracer`]: every operation is a no-op.
//! - [`TracingTracer`]: opens a [`tracing::Span`] per request under the
//!   `bookshelf_api::trace` target. Whatever `tracing-subscriber` layers are
//!   installed (fmt and JSON today, an OpenTelemetry exporter if one is
//!   added) receive the span, its `otel.name` and the elapsed time.
//!
//! A started span is also stored in the request extensions, so handlers can
//! pick it up with `Option<Extension<SpanContext>>`.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::http::Extensions;
use tracing::{Span, debug, field};

use crate::metrics;

/// Target under which request spans are emitted.
pub const TRACE_TARGET: &str = "bookshelf_api::trace";

/// Process-unique identifier of a started span. `0` means "not traced".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId(u64);

impl SpanId {
    pub const NONE: SpanId = SpanId(0);

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Handle to a started span.
///
/// Cloning is cheap; the backend span stays open until every clone is gone.
#[derive(Debug, Clone)]
pub struct SpanContext {
    id: SpanId,
    name: Arc<str>,
    started_at: Instant,
    span: Span,
}

impl SpanContext {
    fn new(id: SpanId, name: &str, span: Span) -> Self {
        Self {
            id,
            name: Arc::from(name),
            started_at: Instant::now(),
            span,
        }
    }

    pub fn id(&self) -> SpanId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// The backend span, [`Span::none`] for the null tracer.
    pub fn span(&self) -> &Span {
        &self.span
    }
}

/// Starts and finishes request spans.
///
/// `finish_span` must be called exactly once for every context returned by
/// `start_span`. Implementations never fail: problems talking to a backend
/// are logged and swallowed.
pub trait Tracer: Send + Sync + fmt::Debug {
    /// Start a span and bind it to the request through its extensions.
    fn start_span(&self, extensions: &mut Extensions, name: &str) -> SpanContext;

    fn finish_span(&self, span: SpanContext);
}

/// Tracer that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTracer;

impl Tracer for NullTracer {
    fn start_span(&self, _extensions: &mut Extensions, name: &str) -> SpanContext {
        SpanContext::new(SpanId::NONE, name, Span::none())
    }

    fn finish_span(&self, _span: SpanContext) {}
}

/// Tracer backed by the `tracing` ecosystem.
#[derive(Debug)]
pub struct TracingTracer {
    next_id: AtomicU64,
}

impl TracingTracer {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for TracingTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracer for TracingTracer {
    fn start_span(&self, extensions: &mut Extensions, name: &str) -> SpanContext {
        let id = SpanId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let span = tracing::info_span!(
            target: TRACE_TARGET,
            "request",
            otel.name = %name,
            span_id = %id,
            elapsed_ms = field::Empty,
        );

        let context = SpanContext::new(id, name, span);
        extensions.insert(context.clone());
        metrics::record_span_event("started");
        context
    }

    fn finish_span(&self, span: SpanContext) {
        let elapsed = span.started_at.elapsed();
        span.span
            .record("elapsed_ms", elapsed.as_secs_f64() * 1000.0);
        debug!(
            target: TRACE_TARGET,
            parent: &span.span,
            span_id = %span.id,
            name = %span.name,
            "Span finished"
        );
        metrics::record_span_event("finished");
    }
}

/// Select the tracer implementation for the `TRACING_ENABLED` switch.
pub fn tracer_for(enabled: bool) -> Arc<dyn Tracer> {
    if enabled {
        Arc::new(TracingTracer::new())
    } else {
        Arc::new(NullTracer)
    }
}
