//! Retrying client with exponential backoff and auth-triggered refresh
//!
//! Plain retriable statuses (429, 5xx) sleep and double the wait up to the
//! configured maximum. Auth-retriable statuses (401, 403) ask the injected
//! `TokenRefresher` for a new credential and retry immediately. The backoff
//! clock belongs to a single `execute` call, so concurrent callers never
//! stretch or shorten each other's waits.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use cloud_auth::TokenRefresher;
use tracing::{debug, warn};

use crate::HttpClient;
use crate::error::{Error, Result};
use crate::metrics::{RetryReason, record_failure, record_retry};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub min_wait: Duration,
    pub max_wait: Duration,
    /// Total attempts, including the first one.
    pub max_retry_count: u32,
    pub retriable_status_codes: HashSet<u16>,
    pub auth_retriable_status_codes: HashSet<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(30),
            max_retry_count: 5,
            retriable_status_codes: [429, 500, 502, 503, 504].into_iter().collect(),
            auth_retriable_status_codes: [401, 403].into_iter().collect(),
        }
    }
}

/// Deterministic doubling backoff, capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    min: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            current: min,
            min,
            max: max.max(min),
        }
    }

    /// Wait the next retry would sleep.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Return the current wait and double it for the following one.
    pub fn next_wait(&mut self) -> Duration {
        let wait = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        wait
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

pub struct RetryHttpClient {
    inner: Arc<dyn HttpClient>,
    refresher: Arc<dyn TokenRefresher>,
    config: RetryConfig,
}

impl RetryHttpClient {
    pub fn new(
        inner: Arc<dyn HttpClient>,
        refresher: Arc<dyn TokenRefresher>,
        config: RetryConfig,
    ) -> Self {
        Self {
            inner,
            refresher,
            config,
        }
    }

    async fn execute_with_retry(&self, mut request: reqwest::Request) -> Result<reqwest::Response> {
        let body = buffer_body(&mut request)?;
        let mut backoff = Backoff::new(self.config.min_wait, self.config.max_wait);
        let mut status_codes = Vec::new();
        let attempts = self.config.max_retry_count;

        for attempt in 1..=attempts {
            let response = match self.inner.execute(replay(&request, body.as_ref())).await {
                Ok(r) => r,
                Err(e) => {
                    record_failure("transport");
                    return Err(e);
                }
            };

            let status = response.status().as_u16();
            if status < 400 {
                if attempt > 1 {
                    debug!(attempt, status, url = %request.url(), "request succeeded after retry");
                }
                return Ok(response);
            }
            status_codes.push(status);

            if self.config.auth_retriable_status_codes.contains(&status) {
                warn!(attempt, status, url = %request.url(), "auth rejected, refreshing token");
                if let Err(e) = self.refresher.refresh().await {
                    warn!(error = %e, "token refresh failed, retrying anyway");
                }
                backoff.reset();
                record_retry(RetryReason::Auth);
                continue;
            }

            if !self.config.retriable_status_codes.contains(&status) {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| String::from("<no body>"));
                record_failure("status");
                return Err(Error::Status { status, body });
            }

            if attempt < attempts {
                let wait = backoff.next_wait();
                warn!(
                    attempt,
                    status,
                    wait_ms = wait.as_millis() as u64,
                    url = %request.url(),
                    "retriable status, backing off"
                );
                record_retry(RetryReason::Status);
                tokio::time::sleep(wait).await;
            }
        }

        warn!(attempts, ?status_codes, url = %request.url(), "retries exhausted");
        record_failure("exhausted");
        Err(Error::RetriesExhausted {
            attempts,
            status_codes,
        })
    }
}

impl HttpClient for RetryHttpClient {
    fn execute(
        &self,
        request: reqwest::Request,
    ) -> Pin<Box<dyn Future<Output = Result<reqwest::Response>> + Send + '_>> {
        Box::pin(self.execute_with_retry(request))
    }
}

/// Take the body out of `request` exactly once and keep its bytes.
fn buffer_body(request: &mut reqwest::Request) -> Result<Option<Bytes>> {
    match request.body_mut().take() {
        None => Ok(None),
        Some(body) => body
            .as_bytes()
            .map(|b| Some(Bytes::copy_from_slice(b)))
            .ok_or(Error::UnbufferedBody),
    }
}

/// Fresh copy of a body-less request template for one attempt.
fn replay(template: &reqwest::Request, body: Option<&Bytes>) -> reqwest::Request {
    let mut request = reqwest::Request::new(template.method().clone(), template.url().clone());
    *request.headers_mut() = template.headers().clone();
    *request.timeout_mut() = template.timeout().copied();
    *request.version_mut() = template.version();
    if let Some(body) = body {
        *request.body_mut() = Some(reqwest::Body::from(body.clone()));
    }
    request
}
