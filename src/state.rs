//! Shared application state for Axum handlers and pipeline stages.
//!
//! - **Repository**: book storage behind [`BookRepository`]
//! - **Rate limiter**: the per-client bucket registry (absent when disabled)
//! - **Tracer**: selected once from `TRACING_ENABLED`
//! - **Configuration**: runtime configuration access
//!
//! # Structured Concurrency
//!
//! Background tasks are managed using `tokio_util::task::TaskTracker` and
//! `CancellationToken` for proper lifecycle management. Call `shutdown()`
//! to gracefully stop all background tasks before application exit.

use std::sync::Arc;
use std::time::Instant;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace};

use crate::config::Config;
use crate::error::AppResult;
use crate::limiter::RateLimiterRegistry;
use crate::metrics;
use crate::repository::BookRepository;
use crate::tracer::{Tracer, tracer_for};

/// Shared application state.
///
/// Cloned for each request handler; all internal data is behind `Arc`.
///
/// # Lifecycle
///
/// A bucket sweep task is spawned when the state is created (only if rate
/// limiting is enabled). Call `shutdown()` before dropping:
///
/// ```rust,ignore
/// let state = AppState::new(config, Arc::new(InMemoryBookRepository::new()))?;
/// // ... serve ...
/// state.shutdown().await;
/// ```
#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<dyn BookRepository>,
    /// `None` when `RATE_LIMIT_RPS` is 0
    pub rate_limiter: Option<Arc<RateLimiterRegistry>>,
    pub tracer: Arc<dyn Tracer>,
    /// Timestamp when the application started
    pub started_at: Instant,
    /// Application configuration
    pub config: Arc<Config>,
    /// Tracks spawned background tasks for graceful shutdown
    task_tracker: TaskTracker,
    /// Cancellation token for signaling background tasks to stop
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Create state whose limiter and tracer are derived from `config`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if the rate limit settings do not form
    /// a valid quota.
    pub fn new(config: Config, repository: Arc<dyn BookRepository>) -> AppResult<Self> {
        let rate_limiter = config.quota()?.map(|quota| {
            Arc::new(RateLimiterRegistry::new(quota).with_eviction(config.eviction_policy()))
        });
        let tracer = tracer_for(config.tracing_enabled);

        Ok(Self::from_parts(config, repository, rate_limiter, tracer))
    }

    /// Create state from explicit components.
    ///
    /// Lets tests inject a registry driven by a manual clock or a recording
    /// tracer.
    pub fn from_parts(
        config: Config,
        repository: Arc<dyn BookRepository>,
        rate_limiter: Option<Arc<RateLimiterRegistry>>,
        tracer: Arc<dyn Tracer>,
    ) -> Self {
        let state = Self {
            repository,
            rate_limiter,
            tracer,
            started_at: Instant::now(),
            config: Arc::new(config),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        state.spawn_bucket_sweep_task();

        state
    }

    /// Spawn the background task running the limiter's eviction sweep.
    ///
    /// The task is tracked by `task_tracker` and respects `cancellation_token`
    /// for graceful shutdown.
    fn spawn_bucket_sweep_task(&self) {
        let Some(registry) = self.rate_limiter.clone() else {
            return;
        };
        let period = self.config.rate_limit_sweep_interval;
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased; // Check cancellation first

                    _ = cancel.cancelled() => {
                        debug!("Bucket sweep task received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let evicted = registry.sweep();
                        let tracked = registry.len();
                        metrics::set_rate_limit_clients(tracked);
                        if evicted > 0 {
                            debug!(evicted, tracked, "Swept idle rate limit buckets");
                        } else {
                            trace!(tracked, "Bucket sweep found nothing to evict");
                        }
                    }
                }
            }

            debug!("Bucket sweep task shutting down");
        });
    }

    /// Gracefully shutdown all background tasks.
    ///
    /// 1. Signals all tasks to stop via cancellation token
    /// 2. Closes the task tracker (prevents new tasks)
    /// 3. Waits for all tasks to complete
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Number of clients currently tracked by the rate limiter.
    pub fn rate_limited_clients(&self) -> usize {
        self.rate_limiter.as_ref().map_or(0, |registry| registry.len())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::limiter::{IdleTimeout, ManualClock, Quota};
    use crate::repository::InMemoryBookRepository;
    use crate::tracer::NullTracer;

    fn repository() -> Arc<dyn BookRepository> {
        Arc::new(InMemoryBookRepository::new())
    }

    #[tokio::test]
    async fn test_new_builds_limiter_from_config() {
        let state = AppState::new(Config::default(), repository()).unwrap();
        let limiter = state.rate_limiter.clone().unwrap();
        assert_eq!(limiter.quota().capacity(), 10);
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_rate_limiting_disabled() {
        let config = Config {
            rate_limit_rps: 0.0,
            ..Config::default()
        };
        let state = AppState::new(config, repository()).unwrap();
        assert!(state.rate_limiter.is_none());
        assert_eq!(state.rate_limited_clients(), 0);
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_quota_is_config_error() {
        let config = Config {
            rate_limit_burst: 0,
            ..Config::default()
        };
        let err = AppState::new(config, repository()).err().unwrap();
        assert!(err.to_string().contains("Configuration error"));
    }

    #[tokio::test]
    async fn test_sweep_task_evicts_idle_buckets() {
        let clock = ManualClock::new();
        let registry = RateLimiterRegistry::new(Quota::new(10, 5.0).unwrap())
            .with_clock(Arc::new(clock.clone()))
            .with_eviction(Arc::new(IdleTimeout::new(Duration::from_secs(5))));
        let config = Config {
            rate_limit_sweep_interval: Duration::from_millis(10),
            ..Config::default()
        };
        let state = AppState::from_parts(
            config,
            repository(),
            Some(Arc::new(registry)),
            Arc::new(NullTracer),
        );

        assert!(state.rate_limiter.as_ref().unwrap().allow("10.0.0.1"));
        assert_eq!(state.rate_limited_clients(), 1);

        clock.advance(Duration::from_secs(6));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(state.rate_limited_clients(), 0);

        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_completes() {
        let state = AppState::new(Config::default(), repository()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), state.shutdown())
            .await
            .expect("shutdown should not hang");
    }
}
