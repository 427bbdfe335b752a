//! Integration tests against a real server on an ephemeral port.
//!
//! Each test starts its own application instance with the configuration it
//! needs, so tests never share buckets or books.
//!
//! Run with: `cargo test --test integration_tests`
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;

use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use bookshelf_api::repository::InMemoryBookRepository;
use bookshelf_api::{AppState, Config, build_router};

/// Test fixture owning a running server
struct TestFixture {
    base_url: String,
    client: Client,
    state: AppState,
}

impl TestFixture {
    /// Start the application with `config` on 127.0.0.1 and an OS-assigned port
    async fn start(config: Config) -> Self {
        let state = AppState::new(config, Arc::new(InMemoryBookRepository::new()))
            .expect("Failed to build application state");
        let app = build_router(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to ephemeral port");
        let addr = listener.local_addr().expect("Failed to get local address");

        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .expect("Server error");
        });

        Self {
            base_url: format!("http://{addr}"),
            client: Client::new(),
            state,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn shutdown(self) {
        self.state.shutdown().await;
    }
}

fn open_config() -> Config {
    Config {
        auth_disabled: true,
        rate_limit_rps: 0.0,
        ..Config::default()
    }
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health_check() {
    let fixture = TestFixture::start(open_config()).await;

    let response = fixture
        .client
        .get(fixture.url("/health"))
        .send()
        .await
        .expect("Request failed");

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.expect("Invalid JSON");
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["rate_limited_clients"], 0);

    fixture.shutdown().await;
}

// =============================================================================
// Book CRUD
// =============================================================================

#[tokio::test]
async fn test_book_lifecycle() {
    let fixture = TestFixture::start(open_config()).await;
    let client = &fixture.client;

    // Create
    let response = client
        .post(fixture.url("/v1/books"))
        .json(&json!({
            "title": "Dune",
            "author": "Frank Herbert",
            "published_year": 1965
        }))
        .send()
        .await
        .expect("Create failed");
    assert_eq!(response.status(), StatusCode::CREATED);
    let created: Value = response.json().await.unwrap();
    let id = created["id"].as_u64().expect("id should be a number");

    // Read
    let response = client
        .get(fixture.url(&format!("/v1/books/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let book: Value = response.json().await.unwrap();
    assert_eq!(book["title"], "Dune");
    assert_eq!(book["published_year"], 1965);

    // Update replaces every field
    let response = client
        .put(fixture.url(&format!("/v1/books/{id}")))
        .json(&json!({"title": "Dune Messiah", "author": "Frank Herbert"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let book: Value = client
        .get(fixture.url(&format!("/v1/books/{id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(book["title"], "Dune Messiah");
    assert!(book.get("published_year").is_none());

    // Delete
    let response = client
        .delete(fixture.url(&format!("/v1/books/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = client
        .get(fixture.url(&format!("/v1/books/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    fixture.shutdown().await;
}

#[tokio::test]
async fn test_update_unknown_book() {
    let fixture = TestFixture::start(open_config()).await;

    let response = fixture
        .client
        .put(fixture.url("/v1/books/4242"))
        .json(&json!({"title": "Ghost", "author": "Nobody"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    fixture.shutdown().await;
}

// =============================================================================
// Pipeline
// =============================================================================

#[tokio::test]
async fn test_api_key_required() {
    let fixture = TestFixture::start(Config {
        api_key: Some("integration-secret".to_string()),
        rate_limit_rps: 0.0,
        ..Config::default()
    })
    .await;

    let response = fixture
        .client
        .get(fixture.url("/v1/books"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = fixture
        .client
        .get(fixture.url("/v1/books"))
        .header("x-api-key", "integration-secret")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    fixture.shutdown().await;
}

#[tokio::test]
async fn test_rate_limit_keys_on_peer_address() {
    let fixture = TestFixture::start(Config {
        auth_disabled: true,
        rate_limit_rps: 0.5,
        rate_limit_burst: 2,
        ..Config::default()
    })
    .await;

    let mut statuses = Vec::new();
    for _ in 0..3 {
        let response = fixture
            .client
            .get(fixture.url("/v1/books"))
            .send()
            .await
            .unwrap();
        statuses.push(response.status());
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            assert_eq!(response.headers()["retry-after"], "2");
        }
    }
    assert_eq!(
        statuses,
        [StatusCode::OK, StatusCode::OK, StatusCode::TOO_MANY_REQUESTS]
    );

    // The bucket is tracked under the loopback peer address
    let health: Value = fixture
        .client
        .get(fixture.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["rate_limited_clients"], 1);

    fixture.shutdown().await;
}

#[tokio::test]
async fn test_security_headers_present() {
    let fixture = TestFixture::start(open_config()).await;

    let response = fixture
        .client
        .get(fixture.url("/v1/books"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    assert_eq!(response.headers()["x-frame-options"], "DENY");
    assert_eq!(response.headers()["referrer-policy"], "no-referrer");

    fixture.shutdown().await;
}

#[tokio::test]
async fn test_form_body_rejected() {
    let fixture = TestFixture::start(open_config()).await;

    let response = fixture
        .client
        .post(fixture.url("/v1/books"))
        .header("content-type", "application/x-www-form-urlencoded")
        .body("title=Dune&author=Herbert")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

    fixture.shutdown().await;
}
