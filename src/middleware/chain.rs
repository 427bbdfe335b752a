//! Composition of pipeline stages into one request handler.
//!
//! A [`Chain`] is an ordered list of named stages. Applying it to a terminal
//! handler makes the first stage the outermost wrapper:
//!
//! ```text
//! Chain [A, B, C] applied to T  ==  A(B(C(T)))
//!
//! request  ──► A ──► B ──► C ──► T
//! response ◄── A ◄── B ◄── C ◄──┘
//! ```
//!
//! Composition is associative (`[A].then([B, C])` behaves as `[A, B, C]`)
//! and an empty chain hands back the terminal handler unchanged, apart from
//! boxing.

use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

use axum::extract::Request;
use axum::response::Response;
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service};

/// Type-erased handler every stage wraps and produces.
pub type BoxHandler = BoxCloneSyncService<Request, Response, Infallible>;

/// A pipeline stage: given the next handler, produce a decorated handler.
///
/// Implemented for every [`tower::Layer`] whose service is a cloneable,
/// infallible HTTP service, so the stages in [`crate::middleware`] (and
/// any third-party layer of the same shape) can be used directly.
pub trait Stage: Send + Sync {
    fn apply(&self, next: BoxHandler) -> BoxHandler;
}

impl<L> Stage for L
where
    L: Layer<BoxHandler> + Send + Sync,
    L::Service: Service<Request, Response = Response, Error = Infallible>
        + Clone
        + Send
        + Sync
        + 'static,
    <L::Service as Service<Request>>::Future: Send + 'static,
{
    fn apply(&self, next: BoxHandler) -> BoxHandler {
        BoxCloneSyncService::new(self.layer(next))
    }
}

/// Ordered, named list of stages.
#[derive(Clone, Default)]
pub struct Chain {
    stages: Vec<(&'static str, Arc<dyn Stage>)>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage; it runs after every stage already in the chain.
    #[must_use]
    pub fn stage<L>(mut self, name: &'static str, layer: L) -> Self
    where
        L: Stage + 'static,
    {
        self.stages.push((name, Arc::new(layer)));
        self
    }

    /// Append every stage of `other`, keeping its order.
    #[must_use]
    pub fn then(mut self, other: Chain) -> Self {
        self.stages.extend(other.stages);
        self
    }

    /// Stage names, outermost first.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|(name, _)| *name).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Wrap `terminal` in every stage, first stage outermost.
    pub fn wrap<S>(&self, terminal: S) -> BoxHandler
    where
        S: Service<Request, Response = Response, Error = Infallible>
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        self.stages
            .iter()
            .rev()
            .fold(BoxCloneSyncService::new(terminal), |next, (_, stage)| {
                stage.apply(next)
            })
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("stages", &self.stage_names())
            .finish()
    }
}

impl<S> Layer<S> for Chain
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    type Service = BoxHandler;

    fn layer(&self, inner: S) -> Self::Service {
        self.wrap(inner)
    }
}
