use std::future::IntoFuture;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use bookshelf_api::config::LogFormat;
use bookshelf_api::repository::InMemoryBookRepository;
use bookshelf_api::{AppState, Config, build_router, metrics, utils};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::from_env();

    // A broken config still gets a subscriber so the error below is visible
    match &config {
        Ok(config) => utils::init_tracing(config.log_format, &config.log_level),
        Err(_) => utils::init_tracing(LogFormat::default(), "info"),
    }

    info!(
        "Starting Bookshelf API v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {e}");
            return ExitCode::from(exitcode::CONFIG as u8);
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

/// Run the application, returning an exit code on error.
async fn run(config: Config) -> Result<(), exitcode::ExitCode> {
    info!(
        host = %config.host,
        port = %config.port,
        auth_enabled = config.auth_enabled(),
        rate_limit_rps = config.rate_limit_rps,
        rate_limit_burst = config.rate_limit_burst,
        tracing_enabled = config.tracing_enabled,
        log_format = %config.log_format,
        "Configuration loaded"
    );

    if let Some(metrics_addr) = config.metrics_addr() {
        metrics::try_init_metrics(metrics_addr);
    }

    // Build application state and router
    let state = AppState::new(config.clone(), Arc::new(InMemoryBookRepository::new()))
        .map_err(|e| {
            error!("Failed to build application state: {e}");
            exitcode::CONFIG
        })?;
    let app = build_router(state.clone());

    // Start server
    let addr: SocketAddr = config.server_addr().parse().map_err(|e| {
        error!("Invalid server address: {e}");
        exitcode::CONFIG
    })?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to {addr}: {e}");
        exitcode::UNAVAILABLE
    })?;

    info!("Server listening on http://{addr}");
    info!("API endpoints:");
    info!("  GET    /health          - Health check (no auth, no rate limit)");
    info!("  GET    /v1/books        - List books");
    info!("  POST   /v1/books        - Create a book");
    info!("  GET    /v1/books/{{id}}   - Get a book");
    info!("  PUT    /v1/books/{{id}}   - Replace a book");
    info!("  DELETE /v1/books/{{id}}   - Delete a book");

    let shutdown_timeout = config.shutdown_timeout;
    let shutdown_started = Arc::new(Notify::new());
    let signalled = shutdown_started.clone();

    // Peer addresses feed client identity for rate limiting
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        utils::shutdown_signal().await;
        signalled.notify_one();
    });

    // In-flight requests get `shutdown_timeout` to drain once the signal arrives
    let served =
        utils::serve_with_drain_timeout(server.into_future(), &shutdown_started, shutdown_timeout)
            .await;

    // Gracefully shutdown background tasks
    info!("HTTP server stopped, shutting down background tasks...");
    if tokio::time::timeout(shutdown_timeout, state.shutdown())
        .await
        .is_err()
    {
        warn!(
            timeout_secs = shutdown_timeout.as_secs(),
            "Background tasks did not stop in time"
        );
    }

    served.map_err(|e| {
        error!("Server error: {e}");
        exitcode::SOFTWARE
    })?;

    info!("Server shutdown complete");
    Ok(())
}
