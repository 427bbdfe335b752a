//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with sensible defaults
//! for development. In production, configure via environment variables or a `.env` file.
//!
//! # Security Configuration
//!
//! - `API_KEY`: Every `/v1` request must carry it in `X-API-KEY`. Required
//!   unless authentication is switched off.
//! - `AUTH_DISABLED`: Leave the authentication stage out (default: false).
//!   Meant for local development only.
//!
//! # Rate Limiting
//!
//! - `RATE_LIMIT_RPS`: Tokens refilled per second per client (default: 5, 0 = disabled)
//! - `RATE_LIMIT_BURST`: Bucket capacity per client (default: 10)
//! - `RATE_LIMIT_MAX_CLIENTS`: Tracked clients before LRU eviction (default: 100000, 0 = unbounded)
//! - `RATE_LIMIT_IDLE_TTL_SECS`: Idle time before a bucket is swept (default: 600, 0 = never)
//! - `RATE_LIMIT_SWEEP_INTERVAL_SECS`: Background sweep period (default: 60)
//!
//! # Observability
//!
//! - `TRACING_ENABLED`: Open a tracer span per request (default: false)
//! - `LOG_FORMAT`: `text` or `json` (default: text)
//! - `METRICS_PORT`: Prometheus listener port (default: 9090, 0 = disabled)

use std::env;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::limiter::{EvictionPolicy, IdleTimeout, LeastRecentlyUsed, Quota, Unbounded};

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("expected `text` or `json`, got `{other}`")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => f.write_str("text"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 8080)
    pub port: u16,

    /// How long in-flight requests may take to drain after a shutdown
    /// signal, and separately how long background tasks get to stop
    /// (default: 10 seconds)
    pub shutdown_timeout: Duration,

    // =========================================================================
    // Security Configuration
    // =========================================================================
    /// Shared secret expected in `X-API-KEY`
    pub api_key: Option<String>,

    /// Explicit opt-out of authentication (default: false)
    pub auth_disabled: bool,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Tokens refilled per second per client (default: 5.0, 0 = disabled)
    pub rate_limit_rps: f64,

    /// Bucket capacity per client (default: 10)
    pub rate_limit_burst: u32,

    /// Maximum tracked clients before least-recently-used eviction (0 = unbounded)
    pub rate_limit_max_clients: usize,

    /// Idle time after which a client's bucket is dropped (zero = never)
    pub rate_limit_idle_ttl: Duration,

    /// Period of the background bucket sweep
    pub rate_limit_sweep_interval: Duration,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level filter when `RUST_LOG` is unset (default: "info")
    pub log_level: String,

    pub log_format: LogFormat,

    /// Open a tracer span per request (default: false)
    pub tracing_enabled: bool,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if any value fails to parse or the
    /// combination is invalid (e.g. a zero burst with rate limiting on).
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 8080)?,
            shutdown_timeout: Duration::from_secs(Self::parse_env("SHUTDOWN_TIMEOUT_SECS", 10)?),

            // Security
            api_key: env::var("API_KEY").ok().filter(|k| !k.is_empty()),
            auth_disabled: Self::parse_bool_env("AUTH_DISABLED", false)?,

            // Rate limiting
            rate_limit_rps: Self::parse_env("RATE_LIMIT_RPS", 5.0)?,
            rate_limit_burst: Self::parse_env("RATE_LIMIT_BURST", 10)?,
            rate_limit_max_clients: Self::parse_env("RATE_LIMIT_MAX_CLIENTS", 100_000)?,
            rate_limit_idle_ttl: Duration::from_secs(Self::parse_env(
                "RATE_LIMIT_IDLE_TTL_SECS",
                600,
            )?),
            rate_limit_sweep_interval: Duration::from_secs(Self::parse_env(
                "RATE_LIMIT_SWEEP_INTERVAL_SECS",
                60,
            )?),

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_format: Self::parse_env("LOG_FORMAT", LogFormat::Text)?,
            tracing_enabled: Self::parse_bool_env("TRACING_ENABLED", false)?,
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        if !self.rate_limit_rps.is_finite() || self.rate_limit_rps < 0.0 {
            return Err(AppError::ConfigError(format!(
                "RATE_LIMIT_RPS must be a non-negative number, got {}",
                self.rate_limit_rps
            )));
        }

        if self.rate_limiting_enabled() && self.rate_limit_burst == 0 {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_BURST must be at least 1 when rate limiting is enabled".to_string(),
            ));
        }

        if self.rate_limit_sweep_interval.is_zero() {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_SWEEP_INTERVAL_SECS must be greater than 0".to_string(),
            ));
        }

        match (self.auth_disabled, &self.api_key) {
            (false, None) => {
                return Err(AppError::ConfigError(
                    "API_KEY is required (set AUTH_DISABLED=true to run without authentication)"
                        .to_string(),
                ));
            }
            (true, Some(_)) => {
                return Err(AppError::ConfigError(
                    "API_KEY and AUTH_DISABLED=true are mutually exclusive".to_string(),
                ));
            }
            _ => {}
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if rate limiting is enabled.
    pub fn rate_limiting_enabled(&self) -> bool {
        self.rate_limit_rps > 0.0
    }

    /// Check if the authentication stage is part of the pipeline.
    ///
    /// True unless explicitly disabled, even when no key is configured: the
    /// stage then rejects every request.
    pub fn auth_enabled(&self) -> bool {
        !self.auth_disabled
    }

    /// Token bucket quota, or `None` when rate limiting is disabled.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if the burst or rate is rejected by
    /// [`Quota::new`].
    pub fn quota(&self) -> AppResult<Option<Quota>> {
        if !self.rate_limiting_enabled() {
            return Ok(None);
        }
        Quota::new(self.rate_limit_burst, self.rate_limit_rps)
            .map(Some)
            .map_err(|e| AppError::ConfigError(format!("Invalid rate limit: {e}")))
    }

    /// Eviction policy for the rate limiter registry.
    ///
    /// Idle sweeping and the client cap are independent; either, both or
    /// neither may be active.
    pub fn eviction_policy(&self) -> Arc<dyn EvictionPolicy> {
        let idle = (!self.rate_limit_idle_ttl.is_zero())
            .then(|| IdleTimeout::new(self.rate_limit_idle_ttl));
        let capped = (self.rate_limit_max_clients > 0)
            .then(|| LeastRecentlyUsed::new(self.rate_limit_max_clients));

        match (idle, capped) {
            (Some(idle), Some(capped)) => Arc::new((idle, capped)),
            (Some(idle), None) => Arc::new(idle),
            (None, Some(capped)) => Arc::new(capped),
            (None, None) => Arc::new(Unbounded),
        }
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        if self.metrics_enabled() {
            Some(std::net::SocketAddr::from((
                [0, 0, 0, 0],
                self.metrics_port,
            )))
        } else {
            None
        }
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        Self::parse_value(name, env::var(name).ok(), default)
    }

    /// Parse a raw variable value; `None` means unset.
    fn parse_value<T>(name: &str, raw: Option<String>, default: T) -> AppResult<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match raw {
            Some(val) => val
                .trim()
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            None => Ok(default),
        }
    }

    /// Parse a boolean switch, accepting `true/false`, `1/0` and `yes/no`.
    fn parse_bool_env(name: &str, default: bool) -> AppResult<bool> {
        match env::var(name) {
            Ok(val) => parse_bool(&val).ok_or_else(|| {
                AppError::ConfigError(format!("Invalid {name}: expected a boolean, got `{val}`"))
            }),
            Err(_) => Ok(default),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

/// Redacts the API key.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("auth_disabled", &self.auth_disabled)
            .field("rate_limit_rps", &self.rate_limit_rps)
            .field("rate_limit_burst", &self.rate_limit_burst)
            .field("rate_limit_max_clients", &self.rate_limit_max_clients)
            .field("rate_limit_idle_ttl", &self.rate_limit_idle_ttl)
            .field("rate_limit_sweep_interval", &self.rate_limit_sweep_interval)
            .field("log_level", &self.log_level)
            .field("log_format", &self.log_format)
            .field("tracing_enabled", &self.tracing_enabled)
            .field("metrics_port", &self.metrics_port)
            .finish()
    }
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout: Duration::from_secs(10),
            // Security
            api_key: None,
            auth_disabled: false,
            // Rate limiting
            rate_limit_rps: 5.0,
            rate_limit_burst: 10,
            rate_limit_max_clients: 100_000,
            rate_limit_idle_ttl: Duration::from_secs(600),
            rate_limit_sweep_interval: Duration::from_secs(60),
            // Observability
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            tracing_enabled: false,
            metrics_port: 9090,
        }
    }
}
