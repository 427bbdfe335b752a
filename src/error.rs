use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::header::{HeaderName, HeaderValue, RETRY_AFTER, WWW_AUTHENTICATE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Header advertising the per-client burst capacity on 429 responses.
pub const RATE_LIMIT_LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");

/// Header advertising the remaining tokens on 429 responses.
pub const RATE_LIMIT_REMAINING_HEADER: HeaderName =
    HeaderName::from_static("x-ratelimit-remaining");

/// Application-wide error types with appropriate HTTP status codes.
///
/// # Pipeline Rejections
///
/// The first four variants are produced by middleware stages and end the
/// request before it reaches a handler:
///
/// - `Unauthorized` - API key missing or wrong (401)
/// - `RateLimited` - client's token bucket is empty (429)
/// - `UnsupportedMediaType` - mutating request without a JSON body (415)
/// - `PayloadTooLarge` - body read past the configured cap (413)
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64, limit: u32 },

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Error response body for API endpoints.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

impl AppError {
    /// HTTP status code for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error kind used in the response body.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Unauthorized(_) => "unauthorized",
            AppError::RateLimited { .. } => "too_many_requests",
            AppError::UnsupportedMediaType(_) => "unsupported_media_type",
            AppError::PayloadTooLarge(_) => "payload_too_large",
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::Internal(_) => "internal_error",
            AppError::ConfigError(_) => "config_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Log the full error details server-side for debugging
        // but only expose sanitized messages to clients
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let message = match &self {
            AppError::Internal(_) => {
                "An internal error occurred. Please contact support if the issue persists."
                    .to_string()
            }
            AppError::ConfigError(_) => {
                "Service configuration error. Please contact support.".to_string()
            }
            AppError::RateLimited { .. } => "Rate limit exceeded. Please retry later.".to_string(),
            AppError::Unauthorized(msg)
            | AppError::UnsupportedMediaType(msg)
            | AppError::PayloadTooLarge(msg)
            | AppError::NotFound(msg)
            | AppError::BadRequest(msg) => msg.clone(),
        };

        let body = ErrorResponse {
            error: self.kind(),
            message,
        };
        let mut response = (status, axum::Json(body)).into_response();

        let headers = response.headers_mut();
        match self {
            AppError::Unauthorized(_) => {
                headers.insert(WWW_AUTHENTICATE, HeaderValue::from_static("API-Key"));
            }
            AppError::RateLimited {
                retry_after_secs,
                limit,
            } => {
                headers.insert(RETRY_AFTER, HeaderValue::from(retry_after_secs));
                headers.insert(RATE_LIMIT_LIMIT_HEADER, HeaderValue::from(limit));
                headers.insert(RATE_LIMIT_REMAINING_HEADER, HeaderValue::from_static("0"));
            }
            _ => {}
        }

        response
    }
}

/// Map axum's JSON body rejections onto the pipeline taxonomy.
///
/// A body that was cut off by the size cap surfaces here as a 413; the
/// underlying serde message is never echoed back.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection.status() {
            StatusCode::PAYLOAD_TOO_LARGE => {
                AppError::PayloadTooLarge("Request body exceeds the size limit".to_string())
            }
            StatusCode::UNSUPPORTED_MEDIA_TYPE => AppError::UnsupportedMediaType(
                "Expected request with `Content-Type: application/json`".to_string(),
            ),
            _ => AppError::BadRequest("invalid request".to_string()),
        }
    }
}

impl From<PathRejection> for AppError {
    fn from(_: PathRejection) -> Self {
        AppError::NotFound("not found".to_string())
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::Unauthorized("x".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::RateLimited {
                retry_after_secs: 1,
                limit: 10
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AppError::UnsupportedMediaType("x".into()).status(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(
            AppError::PayloadTooLarge("x".into()).status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[test]
    fn test_unauthorized_sets_www_authenticate() {
        let response = AppError::Unauthorized("API key required".into()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[WWW_AUTHENTICATE], "API-Key");
    }

    #[test]
    fn test_rate_limited_headers() {
        let response = AppError::RateLimited {
            retry_after_secs: 3,
            limit: 10,
        }
        .into_response();

        assert_eq!(response.headers()[RETRY_AFTER], "3");
        assert_eq!(response.headers()[RATE_LIMIT_LIMIT_HEADER], "10");
        assert_eq!(response.headers()[RATE_LIMIT_REMAINING_HEADER], "0");
    }

    #[tokio::test]
    async fn test_internal_error_hides_details() {
        let response = AppError::Internal("db password is hunter2".into()).into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();

        assert!(!text.contains("hunter2"));
        assert!(text.contains("internal_error"));
    }
}
