//! Resilient outbound HTTP layer.
//!
//! Wraps a reqwest connection pool with the retry and body-bounding policy
//! every partner call goes through: a fixed attempt count, a fixed sleep
//! between attempts, a total per-attempt timeout, and an incremental body
//! read that aborts as soon as the accumulated size would exceed the limit.
//!
//! All retry behaviour is centralized here; the order lifecycle engine never
//! retries on its own. Two independently tuned instances exist in practice:
//! one for lookups/status/cancel and one for order creation, which is less
//! safe to retry aggressively.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use reqwest::{Method, StatusCode};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::HttpSettings;

/// Default response body cap: 16 MiB.
pub const DEFAULT_MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// Errors produced by the resilient HTTP client.
///
/// Every variant is considered retry-eligible; after the configured attempt
/// count the last failure propagates to the caller.
#[derive(Debug, Error)]
pub enum HttpClientError {
    /// Connection failure, timeout, or protocol error.
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-2xx status while `retry_on_status_error` is set.
    #[error("Unexpected HTTP status {status}")]
    Status { status: StatusCode },

    /// Response body exceeded the configured maximum size.
    #[error("Response too big: exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },
}

/// Configuration for one client instance, immutable after construction.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Total attempt count, including the first request. Minimum 1.
    pub attempts: u32,
    /// Fixed sleep between attempts.
    pub retry_sleep: std::time::Duration,
    /// Total per-attempt timeout (connect + response + body read).
    pub timeout: std::time::Duration,
    /// Maximum accepted response body size in bytes.
    pub max_body_size: usize,
    /// Treat any non-2xx status as a retry-eligible failure.
    pub retry_on_status_error: bool,
    /// Skip TLS certificate validation. The upstream endpoint is reached by
    /// IP on an internal network; keep this off when targeting public hosts.
    pub accept_invalid_certs: bool,
}

impl From<HttpSettings> for HttpClientConfig {
    fn from(settings: HttpSettings) -> Self {
        Self {
            attempts: settings.retries_count,
            retry_sleep: settings.retries_sleep,
            timeout: settings.timeout,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            retry_on_status_error: true,
            accept_invalid_certs: true,
        }
    }
}

/// Seam between the order lifecycle engine and the network.
///
/// The engine only ever issues requests through this trait, so tests can
/// substitute scripted responses without a live partner endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a request and return the final status and full body.
    ///
    /// `form` fields are sent urlencoded in the request body when present.
    async fn request(
        &self,
        method: Method,
        url: &str,
        form: Option<&[(String, String)]>,
    ) -> Result<(StatusCode, Bytes), HttpClientError>;
}

/// Retrying, body-bounding HTTP client over a shared connection pool.
///
/// Safe for concurrent use; construct once per tuning profile at process
/// start and share for the service lifetime.
pub struct HttpClient {
    inner: reqwest::Client,
    config: HttpClientConfig,
}

impl HttpClient {
    /// Build a client from its tuning profile.
    ///
    /// # Errors
    /// Returns `HttpClientError::Transport` if the underlying pool cannot be
    /// constructed.
    pub fn new(config: HttpClientConfig) -> Result<Self, HttpClientError> {
        let inner = reqwest::Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;

        Ok(Self { inner, config })
    }

    async fn attempt(
        &self,
        method: &Method,
        url: &str,
        form: Option<&[(String, String)]>,
    ) -> Result<(StatusCode, Bytes), HttpClientError> {
        let mut request = self.inner.request(method.clone(), url);
        if let Some(fields) = form {
            request = request.form(fields);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = collect_body(response.bytes_stream(), self.config.max_body_size).await?;

        if self.config.retry_on_status_error && !status.is_success() {
            return Err(HttpClientError::Status { status });
        }

        Ok((status, body))
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn request(
        &self,
        method: Method,
        url: &str,
        form: Option<&[(String, String)]>,
    ) -> Result<(StatusCode, Bytes), HttpClientError> {
        let attempts = self.config.attempts.max(1);
        let mut attempt = 1;

        loop {
            debug!(method = %method, url, attempt, "Sending HTTP request");

            match self.attempt(&method, url, form).await {
                Ok(result) => return Ok(result),
                Err(e) if attempt < attempts => {
                    warn!(
                        method = %method,
                        url,
                        attempt,
                        error = %e,
                        "HTTP request failed, retrying"
                    );
                    tokio::time::sleep(self.config.retry_sleep).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(method = %method, url, attempt, error = %e, "HTTP request failed");
                    return Err(e);
                }
            }
        }
    }
}

/// Read a body stream incrementally, failing the moment the accumulated
/// size would exceed `limit`. Partial data is discarded on failure.
async fn collect_body<S, E>(mut stream: S, limit: usize) -> Result<Bytes, HttpClientError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    HttpClientError: From<E>,
{
    let mut body = BytesMut::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if body.len() + chunk.len() > limit {
            return Err(HttpClientError::BodyTooLarge { limit });
        }
        body.extend_from_slice(&chunk);
    }

    Ok(body.freeze())
}
