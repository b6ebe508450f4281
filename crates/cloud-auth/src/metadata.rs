//! Access tokens from the GCE/GKE metadata server

use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;
use tracing::debug;

use crate::constants::{
    DEFAULT_SERVICE_ACCOUNT, METADATA_BASE_URL, METADATA_FLAVOR_HEADER, METADATA_FLAVOR_VALUE,
};
use crate::error::{Error, Result};
use crate::resolver::TokenResolver;
use crate::token::Token;

/// Body of `.../service-accounts/{account}/token`.
#[derive(Debug, Deserialize)]
struct MetadataTokenResponse {
    access_token: String,
    /// Seconds until the token expires (delta, not absolute)
    expires_in: u64,
}

pub struct MetadataServerTokenResolver {
    client: reqwest::Client,
    base_url: String,
    service_account: String,
}

impl MetadataServerTokenResolver {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_base_url(client, METADATA_BASE_URL)
    }

    /// Point at a different server (GCE_METADATA_HOST, tests).
    pub fn with_base_url(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_account: DEFAULT_SERVICE_ACCOUNT.to_string(),
        }
    }

    pub fn service_account(mut self, account: impl Into<String>) -> Self {
        self.service_account = account.into();
        self
    }

    fn token_url(&self) -> String {
        format!(
            "{}/computeMetadata/v1/instance/service-accounts/{}/token",
            self.base_url, self.service_account
        )
    }
}

impl TokenResolver for MetadataServerTokenResolver {
    fn name(&self) -> &str {
        "metadata-server"
    }

    fn resolve(&self) -> Pin<Box<dyn Future<Output = Result<Token>> + Send + '_>> {
        Box::pin(async move {
            let url = self.token_url();
            debug!(%url, "requesting token from metadata server");

            let response = self
                .client
                .get(&url)
                .header(METADATA_FLAVOR_HEADER, METADATA_FLAVOR_VALUE)
                .send()
                .await
                .map_err(|e| Error::Http(format!("metadata server request failed: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| String::from("<no body>"));
                return Err(Error::Http(format!(
                    "metadata server returned {status}: {body}"
                )));
            }

            let token = response
                .json::<MetadataTokenResponse>()
                .await
                .map_err(|e| Error::InvalidResponse(format!("metadata token response: {e}")))?;

            Ok(Token::expiring_in(token.access_token, token.expires_in))
        })
    }
}
