//! The request pipeline.
//!
//! Every `/v1` request passes through these stages in order; each one may
//! end the request early with an error response:
//!
//! ```text
//! Request → API key → Rate limit → Security → Telemetry → Handler
//!             ↓           ↓            ↓           ↓
//!          401 Unauth  429 Too Many  415 / 413   span per request
//! ```
//!
//! Stages are plain [`tower::Layer`]s, assembled by [`Chain`]. The health
//! endpoint is mounted outside the chain.
//!
//! # Security Considerations
//!
//! - API key comparison uses constant-time equality
//! - Client identity trusts `X-Forwarded-For` and `X-Real-IP`; deploy behind
//!   a proxy that overwrites them (see [`ip`])
//! - Sanitization is literal and case-sensitive, it is not an HTML escaper

pub mod auth;
pub mod chain;
pub mod ip;
pub mod rate_limit;
pub mod security;
pub mod telemetry;

pub use auth::{API_KEY_HEADER, ApiKeyAuth};
pub use chain::{BoxHandler, Chain, Stage};
pub use ip::{UNKNOWN_CLIENT, client_identity, resolve_client_identity};
pub use rate_limit::RateLimitLayer;
pub use security::{
    DEFAULT_MAX_BODY_BYTES, SecurityLayer, apply_security_headers, sanitize_query, sanitize_value,
};
pub use telemetry::{SpanGuard, TelemetryLayer, span_name};
