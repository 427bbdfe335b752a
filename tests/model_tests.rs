//! Unit tests for the public models and the limiter primitives.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::Utc;
use serde_json::json;

/// Book model tests
mod book_tests {
    use super::*;
    use bookshelf_api::models::{Book, CreateBookRequest, CreatedResponse, UpdateBookRequest};

    #[test]
    fn test_create_request_full() {
        let json = r#"{
            "title": "The Left Hand of Darkness",
            "author": "Ursula K. Le Guin",
            "published_year": 1969,
            "isbn": "9780441478125"
        }"#;
        let request: CreateBookRequest =
            serde_json::from_str(json).expect("Deserialization failed");

        assert_eq!(request.title, "The Left Hand of Darkness");
        assert_eq!(request.author, "Ursula K. Le Guin");
        assert_eq!(request.published_year, 1969);
        assert_eq!(request.isbn, "9780441478125");
    }

    #[test]
    fn test_update_request_missing_fields_default_to_empty() {
        let request: UpdateBookRequest =
            serde_json::from_str("{}").expect("Deserialization failed");
        assert!(request.title.is_empty());
        assert!(request.author.is_empty());
    }

    #[test]
    fn test_request_rejects_wrong_types() {
        let result = serde_json::from_str::<CreateBookRequest>(r#"{"title": 42}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_book_serialization_with_all_fields() {
        let now = Utc::now();
        let book = Book {
            id: 1,
            title: "Dune".to_string(),
            author: "Frank Herbert".to_string(),
            published_year: 1965,
            isbn: "9780441013593".to_string(),
            created_at: Some(now),
            updated_at: Some(now),
        };

        let value = serde_json::to_value(&book).expect("Serialization failed");
        assert_eq!(value["published_year"], 1965);
        assert_eq!(value["isbn"], "9780441013593");
        assert!(value.get("created_at").is_some());

        let parsed: Book = serde_json::from_value(value).expect("Deserialization failed");
        assert_eq!(parsed, book);
    }

    #[test]
    fn test_created_response_shape() {
        let value = serde_json::to_value(CreatedResponse { id: 42 }).unwrap();
        assert_eq!(value, json!({"id": 42}));
    }
}

/// Health model tests
mod health_tests {
    use super::*;
    use bookshelf_api::models::HealthResponse;

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "healthy",
            version: "0.1.0",
            uptime_seconds: 12,
            rate_limited_clients: 3,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&response).expect("Serialization failed");
        assert!(json.contains("\"status\":\"healthy\""));
        assert!(json.contains("\"version\":\"0.1.0\""));
        assert!(json.contains("\"rate_limited_clients\":3"));
    }
}

/// Token bucket properties through the public API
mod limiter_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bookshelf_api::limiter::{ManualClock, Quota, RateDecision, RateLimiterRegistry};

    fn registry(capacity: u32, rate: f64) -> (RateLimiterRegistry, ManualClock) {
        let clock = ManualClock::new();
        let registry = RateLimiterRegistry::new(Quota::new(capacity, rate).unwrap())
            .with_clock(Arc::new(clock.clone()));
        (registry, clock)
    }

    #[test]
    fn test_burst_then_denied() {
        let (registry, _clock) = registry(10, 5.0);

        let allowed = (0..11).filter(|_| registry.allow("10.0.0.5")).count();
        assert_eq!(allowed, 10);
    }

    #[test]
    fn test_refill_after_wait() {
        let (registry, clock) = registry(10, 5.0);
        for _ in 0..11 {
            registry.allow("10.0.0.5");
        }

        clock.advance(Duration::from_millis(200));
        assert!(registry.allow("10.0.0.5"));
        assert!(!registry.allow("10.0.0.5"));
    }

    #[test]
    fn test_clients_do_not_share_tokens() {
        let (registry, _clock) = registry(1, 1.0);

        assert!(registry.allow("a"));
        assert!(!registry.allow("a"));
        assert!(registry.allow("b"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_decision_reports_remaining() {
        let (registry, _clock) = registry(3, 1.0);

        assert_eq!(registry.check("x"), RateDecision::Allowed { remaining: 2 });
    }

    #[test]
    fn test_quota_validation() {
        assert!(Quota::new(0, 1.0).is_err());
        assert!(Quota::new(1, 0.0).is_err());
        assert!(Quota::new(1, f64::INFINITY).is_err());
        assert!(Quota::new(1, 0.25).is_ok());
    }
}
