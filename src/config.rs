//! Environment-driven service configuration.
//!
//! All settings come from `PHARMABRIDGE_*` environment variables, loaded once
//! at startup. The two HTTP tuning blocks exist because order creation is less
//! safe to retry aggressively than lookups: the create client typically runs
//! with fewer attempts and a shorter timeout.

use std::env;
use std::time::Duration;

use thiserror::Error;

/// Service label attached to every metric and log line.
pub const SERVICE_NAME: &str = "pharmabridge";

const ENV_PREFIX: &str = "PHARMABRIDGE";

/// Errors raised while reading configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set in environment")]
    Missing(String),

    #[error("Invalid value for {name}: '{value}'")]
    Invalid { name: String, value: String },
}

/// Tuning for one resilient HTTP client instance.
#[derive(Debug, Clone, Copy)]
pub struct HttpSettings {
    /// Total per-attempt timeout.
    pub timeout: Duration,
    /// Total attempt count, including the first request.
    pub retries_count: u32,
    /// Fixed sleep between attempts.
    pub retries_sleep: Duration,
}

/// Full service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the partner pharmacy-order API.
    pub partner_url: String,
    /// Tuning for the query client (lookups, status, cancel).
    pub http: HttpSettings,
    /// Tuning for the order-create client.
    pub order_http: HttpSettings,
    /// Port for the inbound API (also serves /health and /metrics).
    pub listen_port: u16,
}

impl Config {
    /// Read the configuration from `PHARMABRIDGE_*` environment variables.
    ///
    /// # Errors
    /// Returns `ConfigError` if a required variable is absent or unparseable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            partner_url: require("URL")?,
            http: HttpSettings {
                timeout: Duration::from_secs_f64(parse(&require("HTTP_TIMEOUT")?, "HTTP_TIMEOUT")?),
                retries_count: parse(&require("HTTP_RETRIES_COUNT")?, "HTTP_RETRIES_COUNT")?,
                retries_sleep: Duration::from_secs_f64(parse(
                    &require("HTTP_RETRIES_SLEEP")?,
                    "HTTP_RETRIES_SLEEP",
                )?),
            },
            order_http: HttpSettings {
                timeout: Duration::from_secs_f64(parse(
                    &require("HTTP_TIMEOUT_ORDER")?,
                    "HTTP_TIMEOUT_ORDER",
                )?),
                retries_count: parse(&require("HTTP_RETRIES_COUNT_ORDER")?, "HTTP_RETRIES_COUNT_ORDER")?,
                retries_sleep: Duration::from_secs_f64(parse(
                    &require("HTTP_RETRIES_SLEEP_ORDER")?,
                    "HTTP_RETRIES_SLEEP_ORDER",
                )?),
            },
            listen_port: match env::var(format!("{ENV_PREFIX}_PORT")) {
                Ok(v) => parse(&v, "PORT")?,
                Err(_) => 8000,
            },
        })
    }
}

fn require(name: &str) -> Result<String, ConfigError> {
    let full = format!("{ENV_PREFIX}_{name}");
    env::var(&full).map_err(|_| ConfigError::Missing(full))
}

fn parse<T: std::str::FromStr>(value: &str, name: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::Invalid {
        name: format!("{ENV_PREFIX}_{name}"),
        value: value.to_string(),
    })
}
