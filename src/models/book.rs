use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A book in the catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: u64,
    pub title: String,
    pub author: String,
    /// Omitted from JSON when unknown (0)
    #[serde(default, skip_serializing_if = "is_zero")]
    pub published_year: i32,
    /// Omitted from JSON when empty
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub isbn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Fields accepted when creating or replacing a book.
///
/// Shared by `POST /v1/books` and `PUT /v1/books/{id}`; an update replaces
/// every field.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BookFields {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub published_year: i32,
    #[serde(default)]
    pub isbn: String,
}

pub type CreateBookRequest = BookFields;
pub type UpdateBookRequest = BookFields;

/// Response for a successful create.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedResponse {
    pub id: u64,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service health status
    pub status: &'static str,
    /// Service version
    pub version: &'static str,
    /// Seconds since the application state was created
    pub uptime_seconds: u64,
    /// Clients currently tracked by the rate limiter (0 when disabled)
    pub rate_limited_clients: usize,
    /// Current timestamp
    pub timestamp: DateTime<Utc>,
}

fn is_zero(year: &i32) -> bool {
    *year == 0
}
