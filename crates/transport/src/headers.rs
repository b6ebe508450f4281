//! Header providers applied by `BaseHttpClient` before every send

use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use cloud_auth::TokenStore;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use tracing::warn;

use crate::HeaderProvider;
use crate::error::{Error, Result};

/// Header the Google APIs use to bill quota to a project other than the
/// credential's own.
pub const QUOTA_PROJECT_HEADER: &str = "x-goog-user-project";

/// Sets `Authorization: Bearer <token>` from a token store.
///
/// Reads the cached token on every call, so a refresh performed by the retry
/// client between attempts is picked up by the next attempt.
pub struct BearerTokenHeaderProvider {
    store: Arc<TokenStore>,
}

impl BearerTokenHeaderProvider {
    pub fn new(store: Arc<TokenStore>) -> Self {
        Self { store }
    }
}

impl HeaderProvider for BearerTokenHeaderProvider {
    fn add_header<'a>(
        &'a self,
        headers: &'a mut HeaderMap,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let token = self.store.get_token().await?;
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.raw_value()))
                .map_err(|e| Error::Header(format!("token is not a valid header value: {e}")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
            Ok(())
        })
    }
}

/// Sets the quota project header.
pub struct QuotaProjectHeaderProvider {
    project: String,
}

impl QuotaProjectHeaderProvider {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
        }
    }
}

impl HeaderProvider for QuotaProjectHeaderProvider {
    fn add_header<'a>(
        &'a self,
        headers: &'a mut HeaderMap,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let value = HeaderValue::from_str(&self.project)
                .map_err(|e| Error::Header(format!("invalid quota project: {e}")))?;
            headers.insert(QUOTA_PROJECT_HEADER, value);
            Ok(())
        })
    }
}

/// Header name + value pair from config.
#[derive(Debug, Clone)]
pub struct HeaderInjection {
    pub name: String,
    pub value: String,
}

/// Configured extra headers.
///
/// Invalid names or values are skipped with a warning, and `authorization` is
/// never overwritten: credentials only come from `BearerTokenHeaderProvider`.
pub struct StaticHeaderProvider {
    headers: Vec<HeaderInjection>,
}

impl StaticHeaderProvider {
    pub fn new(headers: Vec<HeaderInjection>) -> Self {
        Self { headers }
    }
}

impl HeaderProvider for StaticHeaderProvider {
    fn add_header<'a>(
        &'a self,
        headers: &'a mut HeaderMap,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        for injection in &self.headers {
            let name = match HeaderName::from_str(&injection.name) {
                Ok(n) => n,
                Err(e) => {
                    warn!(header = %injection.name, error = %e, "skipping invalid header name");
                    continue;
                }
            };
            if name == AUTHORIZATION {
                warn!(header = %injection.name, "refusing to overwrite authorization header");
                continue;
            }
            let value = match HeaderValue::from_str(&injection.value) {
                Ok(v) => v,
                Err(e) => {
                    warn!(header = %injection.name, error = %e, "skipping invalid header value");
                    continue;
                }
            };
            headers.insert(name, value);
        }
        Box::pin(async { Ok(()) })
    }
}
