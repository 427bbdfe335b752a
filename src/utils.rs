use std::future::Future;
use std::time::Duration;

use tokio::signal;
use tokio::sync::Notify;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;

/// Install the global log subscriber.
///
/// The filter comes from `RUST_LOG` and falls back to `default_level`.
/// Request spans from the tracer (target `bookshelf_api::trace`) flow
/// through the same subscriber.
pub fn init_tracing(format: LogFormat, default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_current_span(true)
            .init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
///
/// If a handler cannot be installed the failure is logged and that signal
/// source is ignored; the other one still works.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

/// Drive `serve` to completion, but give up `drain_timeout` after
/// `shutdown_started` fires.
///
/// Used around axum's graceful shutdown, which otherwise waits for every
/// open connection without limit. Returns `Ok(())` when the timeout wins.
pub async fn serve_with_drain_timeout<F, E>(
    serve: F,
    shutdown_started: &Notify,
    drain_timeout: Duration,
) -> Result<(), E>
where
    F: Future<Output = Result<(), E>>,
{
    tokio::select! {
        result = serve => result,
        () = async {
            shutdown_started.notified().await;
            tokio::time::sleep(drain_timeout).await;
        } => {
            warn!(
                timeout_secs = drain_timeout.as_secs_f64(),
                "In-flight requests did not finish in time, closing anyway"
            );
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::time::Instant;

    #[tokio::test]
    async fn test_drain_gives_up_after_timeout() {
        let started = Notify::new();
        started.notify_one();

        let begin = Instant::now();
        let result = serve_with_drain_timeout(
            std::future::pending::<Result<(), Infallible>>(),
            &started,
            Duration::from_millis(20),
        )
        .await;

        assert!(result.is_ok());
        assert!(begin.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_finished_server_returns_its_result() {
        let started = Notify::new();

        let result =
            serve_with_drain_timeout(async { Err::<(), _>("boom") }, &started, Duration::ZERO)
                .await;

        assert_eq!(result, Err("boom"));
    }

    #[tokio::test]
    async fn test_no_timeout_before_signal() {
        let started = Notify::new();

        let outcome = tokio::time::timeout(
            Duration::from_millis(50),
            serve_with_drain_timeout(
                std::future::pending::<Result<(), Infallible>>(),
                &started,
                Duration::ZERO,
            ),
        )
        .await;

        assert!(outcome.is_err(), "must keep serving until a shutdown signal");
    }
}
