//! Security sanitizer stage.
//!
//! For every request passing through:
//!
//! 1. `POST` and `PUT` must declare a JSON body (`Content-Type` containing
//!    `application/json`), otherwise 415. Their body is capped at
//!    [`DEFAULT_MAX_BODY_BYTES`]; the cap is enforced lazily, when the
//!    handler's extractor reads past it, and surfaces as 413.
//! 2. Query values are decoded, stripped of `<`, `>` and `javascript:`, and
//!    the query string is re-encoded with keys in sorted order.
//! 3. The response, including a 415 produced here, always carries:
//!    - `X-Content-Type-Options: nosniff`
//!    - `X-Frame-Options: DENY`
//!    - `Referrer-Policy: no-referrer`
//!
//! The body itself is never read by this stage.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::{CONTENT_TYPE, REFERRER_POLICY, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS};
use axum::http::uri::PathAndQuery;
use axum::http::{HeaderMap, HeaderValue, Method, Request, Response, Uri};
use axum::response::IntoResponse;
use http_body_util::Limited;
use percent_encoding::percent_decode_str;
use tower::{Layer, Service};
use tracing::{debug, warn};

use crate::error::AppError;
use crate::metrics::{self, RejectReason};

/// Largest request body accepted for `POST` and `PUT`.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1_048_576;

/// Substrings removed from query values, applied in this order.
const STRIPPED_SUBSTRINGS: [&str; 3] = ["<", ">", "javascript:"];

const JSON_MEDIA_TYPE: &str = "application/json";

/// Remove every unsafe substring from one query value.
///
/// Each pattern is removed in a single left-to-right pass, so removing an
/// earlier pattern can join text into a later one (`java<script:` becomes
/// `javascript:` and is then removed).
pub fn sanitize_value(value: &str) -> String {
    STRIPPED_SUBSTRINGS
        .iter()
        .fold(value.to_owned(), |acc, pattern| acc.replace(pattern, ""))
}

/// Decode a raw query string, sanitize every value and encode it again.
///
/// Keys come back sorted; repeated keys keep all their values in their
/// original relative order. Keys are not sanitized. Decoding works on raw
/// bytes, so escapes that are not UTF-8 (`%FF`) survive unchanged.
pub fn sanitize_query(query: &str) -> String {
    let mut params: BTreeMap<Vec<u8>, Vec<Vec<u8>>> = BTreeMap::new();
    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        params
            .entry(decode_component(key))
            .or_default()
            .push(strip_unsafe_bytes(&decode_component(value)));
    }

    let mut encoded = String::with_capacity(query.len());
    for (key, values) in &params {
        for value in values {
            if !encoded.is_empty() {
                encoded.push('&');
            }
            encoded.extend(form_urlencoded::byte_serialize(key));
            encoded.push('=');
            encoded.extend(form_urlencoded::byte_serialize(value));
        }
    }
    encoded
}

/// Form-decode one key or value: `+` is a space, then percent escapes.
fn decode_component(raw: &str) -> Vec<u8> {
    percent_decode_str(&raw.replace('+', " ")).collect()
}

fn strip_unsafe_bytes(value: &[u8]) -> Vec<u8> {
    STRIPPED_SUBSTRINGS
        .iter()
        .fold(value.to_vec(), |acc, pattern| remove_all(&acc, pattern.as_bytes()))
}

/// Byte-level counterpart of `str::replace(needle, "")`.
fn remove_all(haystack: &[u8], needle: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(haystack.len());
    let mut rest = haystack;
    loop {
        if let Some(after) = rest.strip_prefix(needle) {
            rest = after;
        } else if let Some((&byte, after)) = rest.split_first() {
            out.push(byte);
            rest = after;
        } else {
            return out;
        }
    }
}

/// Set the fixed security headers, replacing any a handler already set.
pub fn apply_security_headers(headers: &mut HeaderMap) {
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(REFERRER_POLICY, HeaderValue::from_static("no-referrer"));
}

/// Layer applying the sanitizer to a service.
#[derive(Clone, Debug)]
pub struct SecurityLayer {
    max_body_bytes: usize,
}

impl SecurityLayer {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Override the body cap for mutating requests.
    #[must_use]
    pub const fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }
}

impl Default for SecurityLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Layer<S> for SecurityLayer {
    type Service = SecurityService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SecurityService {
            inner,
            max_body_bytes: self.max_body_bytes,
        }
    }
}

/// Sanitizer service wrapper.
#[derive(Clone, Debug)]
pub struct SecurityService<S> {
    inner: S,
    max_body_bytes: usize,
}

impl<S> Service<Request<Body>> for SecurityService<S>
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

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let max_body_bytes = self.max_body_bytes;
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let mut response = match prepare_request(req, max_body_bytes) {
                Ok(req) => inner.call(req).await?,
                Err(rejection) => rejection.into_response(),
            };
            apply_security_headers(response.headers_mut());
            Ok(response)
        })
    }
}

fn prepare_request(req: Request<Body>, max_body_bytes: usize) -> Result<Request<Body>, AppError> {
    let (mut parts, body) = req.into_parts();

    let body = if parts.method == Method::POST || parts.method == Method::PUT {
        if !declares_json(&parts.headers) {
            warn!(
                method = %parts.method,
                path = %parts.uri.path(),
                "Rejected mutating request without a JSON content type"
            );
            metrics::record_rejection(RejectReason::UnsupportedMediaType);
            return Err(AppError::UnsupportedMediaType(
                "invalid content type".to_string(),
            ));
        }
        Body::new(Limited::new(body, max_body_bytes))
    } else {
        body
    };

    if let Some(query) = parts.uri.query() {
        let sanitized = sanitize_query(query);
        if sanitized != query {
            debug!(path = %parts.uri.path(), "Rewrote query string");
            parts.uri = replace_query(&parts.uri, &sanitized).inspect_err(|_| {
                metrics::record_rejection(RejectReason::BadQuery);
            })?;
        }
    }

    Ok(Request::from_parts(parts, body))
}

/// Case-sensitive substring match on the first `Content-Type` value.
fn declares_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains(JSON_MEDIA_TYPE))
}

fn replace_query(uri: &Uri, query: &str) -> Result<Uri, AppError> {
    let path_and_query = if query.is_empty() {
        uri.path().to_owned()
    } else {
        format!("{}?{}", uri.path(), query)
    };

    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(
        PathAndQuery::try_from(path_and_query)
            .map_err(|_| AppError::BadRequest("invalid query".to_string()))?,
    );
    Uri::from_parts(parts).map_err(|_| AppError::BadRequest("invalid query".to_string()))
}
