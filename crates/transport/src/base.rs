//! Bottom layer: reqwest plus header providers

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::{HeaderProvider, HttpClient};

pub struct BaseHttpClient {
    client: reqwest::Client,
    header_providers: Vec<Arc<dyn HeaderProvider>>,
}

impl BaseHttpClient {
    pub fn new(client: reqwest::Client, header_providers: Vec<Arc<dyn HeaderProvider>>) -> Self {
        Self {
            client,
            header_providers,
        }
    }
}

impl HttpClient for BaseHttpClient {
    fn execute(
        &self,
        mut request: reqwest::Request,
    ) -> Pin<Box<dyn Future<Output = Result<reqwest::Response>> + Send + '_>> {
        Box::pin(async move {
            for provider in &self.header_providers {
                provider.add_header(request.headers_mut()).await?;
            }
            let response = self
                .client
                .execute(request)
                .await
                .map_err(|e| Error::Transport(e.to_string()))?;
            debug!(
                url = %response.url(),
                status = response.status().as_u16(),
                "response received"
            );
            Ok(response)
        })
    }
}
