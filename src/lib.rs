//! # Bookshelf API
//!
//! A small book catalogue served through a composable request pipeline:
//!
//! - **Authentication**: static API key, compared in constant time
//! - **Rate limiting**: per-client token buckets with pluggable eviction
//! - **Sanitization**: security headers, JSON-only bodies with a size cap,
//!   markup stripped from query values
//! - **Telemetry**: one tracer span per request on top of `tracing`
//!
//! ## Layout
//!
//! ```text
//!   routes ──► middleware::Chain ──► handlers ──► repository
//!                 │        │
//!                 ▼        ▼
//!              limiter   tracer
//! ```
//!
//! `config`, `error`, `metrics` and `state` are shared by all of them.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use bookshelf_api::repository::InMemoryBookRepository;
//! use bookshelf_api::{AppState, Config, build_router};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let state = AppState::new(config, Arc::new(InMemoryBookRepository::new()))?;
//!     let app = build_router(state);
//!
//!     // Start the server...
//!     Ok(())
//! }
//! ```
//!
//! ## Security Configuration
//!
//! Enable API key authentication:
//! ```bash
//! API_KEY=your-secret-key cargo run
//! ```
//!
//! Tune rate limiting:
//! ```bash
//! RATE_LIMIT_RPS=5 RATE_LIMIT_BURST=10 cargo run
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod limiter;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod repository;
pub mod routes;
pub mod state;
pub mod tracer;
pub mod utils;
pub mod validation;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use middleware::Chain;
pub use routes::{apply_pipeline, build_chain, build_router};
pub use state::AppState;
