//! Layered HTTP transport for the logging API
//!
//! Every layer implements `HttpClient`, so they stack:
//! - `BaseHttpClient` sends through `reqwest` after applying `HeaderProvider`s
//! - `RetryHttpClient` wraps any client with backoff and auth-triggered refresh
//! - `PageClient` drains page-token paginated endpoints on top of either
//!
//! Traits return `Pin<Box<dyn Future>>` so they stay dyn-compatible
//! (`Arc<dyn HttpClient>`).

pub mod base;
pub mod error;
pub mod headers;
pub mod metrics;
pub mod page;
pub mod retry;

pub use base::BaseHttpClient;
pub use error::{Error, Result};
pub use headers::{
    BearerTokenHeaderProvider, HeaderInjection, QuotaProjectHeaderProvider, StaticHeaderProvider,
};
pub use page::{PageClient, Pages};
pub use retry::{Backoff, RetryConfig, RetryHttpClient};

use reqwest::header::HeaderMap;
use std::future::Future;
use std::pin::Pin;

/// Minimal transport abstraction.
///
/// Implementations return the response for any status; deciding which
/// statuses are failures belongs to the layer above (`RetryHttpClient`,
/// `PageClient`).
pub trait HttpClient: Send + Sync {
    fn execute(
        &self,
        request: reqwest::Request,
    ) -> Pin<Box<dyn Future<Output = Result<reqwest::Response>> + Send + '_>>;
}

/// Injects per-request headers (bearer token, quota project).
///
/// Applied before every outbound send, including retries, so a refreshed
/// token reaches the next attempt.
pub trait HeaderProvider: Send + Sync {
    fn add_header<'a>(
        &'a self,
        headers: &'a mut HeaderMap,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}
