//! Client identity resolution for per-client rate limiting.
//!
//! # Resolution Order
//!
//! ```text
//! X-Forwarded-For (first entry, trimmed) ─┐
//!        │ absent / empty                 │
//!        ▼                                │
//! X-Real-IP (verbatim) ───────────────────┤
//!        │ absent / empty                 ├──► client id
//!        ▼                                │
//! peer address host ("1.2.3.4:80" → host) │
//!        │ unsplittable → raw peer string │
//!        ▼                                │
//! "unknown" (no peer address at all) ─────┘
//! ```
//!
//! # Security Warning: IP Spoofing Risk
//!
//! **Both headers are client controlled.** Run the service behind a reverse
//! proxy that overwrites them, otherwise a client can rotate values in
//! `X-Forwarded-For` and receive a fresh bucket on every request.
//!
//! When no identity can be derived, all such requests share the
//! [`UNKNOWN_CLIENT`] key and therefore one bucket.

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request};

/// Identity shared by requests with no headers and no known peer address.
pub const UNKNOWN_CLIENT: &str = "unknown";

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// Resolve a client identity from headers and the transport peer address.
///
/// Never fails. Header values that are not valid UTF-8 are treated as
/// absent.
///
/// # Example
///
/// ```
/// use axum::http::HeaderMap;
/// use bookshelf_api::middleware::resolve_client_identity;
///
/// let headers = HeaderMap::new();
/// assert_eq!(resolve_client_identity(&headers, Some("[::1]:8080")), "::1");
/// assert_eq!(resolve_client_identity(&headers, None), "unknown");
/// ```
pub fn resolve_client_identity<'a>(headers: &'a HeaderMap, peer_addr: Option<&'a str>) -> &'a str {
    if let Some(forwarded) = non_empty_header(headers, X_FORWARDED_FOR) {
        // split always yields at least one item
        let first = forwarded.split(',').next().unwrap_or(forwarded);
        return first.trim();
    }

    if let Some(real_ip) = non_empty_header(headers, X_REAL_IP) {
        return real_ip;
    }

    match peer_addr {
        Some(peer) => split_host(peer).unwrap_or(peer),
        None => UNKNOWN_CLIENT,
    }
}

/// Resolve the identity of an in-flight request.
///
/// The peer address comes from axum's [`ConnectInfo`] extension, which is
/// only present when the server was started with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn client_identity<B>(req: &Request<B>) -> String {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string());
    resolve_client_identity(req.headers(), peer.as_deref()).to_owned()
}

#[inline]
fn non_empty_header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}

/// Split `host:port` and return the host.
///
/// Accepts `host:port`, `[ipv6]:port` and an empty port. Returns `None`
/// for a missing port, unbalanced brackets or an unbracketed host that
/// itself contains a colon.
fn split_host(hostport: &str) -> Option<&str> {
    let last_colon = hostport.rfind(':')?;

    if hostport.starts_with('[') {
        let close = hostport.find(']')?;
        // the closing bracket must be immediately followed by the port colon
        if close + 1 != last_colon {
            return None;
        }
        if hostport[1..].contains('[') || hostport[close + 1..].contains(']') {
            return None;
        }
        return Some(&hostport[1..close]);
    }

    let host = &hostport[..last_colon];
    if host.contains(':') || hostport.contains('[') || hostport.contains(']') {
        return None;
    }
    Some(host)
}
