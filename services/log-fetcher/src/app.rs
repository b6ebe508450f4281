//! Composition root: builds the credential, transport and query layers from
//! configuration and drives one run.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cloud_auth::constants::ACCESS_TOKEN_TYPE;
use cloud_auth::{
    CommandTokenResolver, InteractiveTokenResolver, MetadataServerTokenResolver,
    MultiTokenResolver, MultiTokenStoreRefresher, OAuthClientConfig, StaticTokenResolver,
    TokenResolver, TokenStore,
};
use common::Secret;
use log_query::{
    CloudLoggingClient, LogEntry, LogSink, ParallelQueryWorker, ProgressReporter,
    TracingProgress, WorkerPool, sort_by_timestamp,
};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use transport::{
    BaseHttpClient, BearerTokenHeaderProvider, HeaderInjection, HeaderProvider, HttpClient,
    QuotaProjectHeaderProvider, RetryHttpClient, StaticHeaderProvider,
};

use crate::config::{AuthConfig, Config, ResolverConfig};

pub type Output = Box<dyn AsyncWrite + Unpin + Send>;

/// Everything a run needs, wired once per process.
pub struct App {
    pub store: Arc<TokenStore>,
    pub logging: Arc<CloudLoggingClient>,
}

impl App {
    pub fn build(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.logging_api.request_timeout_secs))
            .build()
            .context("failed to build HTTP client")?;

        let resolver = build_token_resolver(&config.auth, &client);
        let store = Arc::new(TokenStore::new(ACCESS_TOKEN_TYPE, resolver));
        let http = build_http_client(config, client, store.clone());
        let logging = Arc::new(CloudLoggingClient::new(
            http,
            config.logging_api.endpoint.clone(),
            config.logging_api.page_size,
        ));
        Ok(Self { store, logging })
    }

    /// Run the configured query and write entries to `output` as NDJSON.
    ///
    /// Returns the number of entries written.
    pub async fn run_query(
        &self,
        config: &Config,
        cancel: &CancellationToken,
        output: Output,
    ) -> Result<usize> {
        let query = &config.query;
        let (start, end) = query
            .start
            .zip(query.end)
            .context("query time range was not validated")?;
        let worker = ParallelQueryWorker::new(
            self.logging.clone(),
            Arc::new(WorkerPool::new(query.pool_size)),
            query.filter.clone(),
            start,
            end,
            query.segment_count,
        )?
        .with_launch_stagger(Duration::from_secs(query.launch_stagger_secs));
        let progress: Arc<dyn ProgressReporter> = Arc::new(TracingProgress::new(format!(
            "{} .. {}",
            start.to_rfc3339(),
            end.to_rfc3339()
        )));

        if query.stream_unsorted {
            let (sink, mut received) = LogSink::channel();
            let writer = tokio::spawn(async move {
                let mut out = BufWriter::new(output);
                let mut written = 0usize;
                while let Some(entry) = received.recv().await {
                    write_entry(&mut out, &entry).await?;
                    written += 1;
                }
                out.flush().await?;
                Ok::<_, std::io::Error>(written)
            });
            let result = worker
                .query(cancel, &query.resource_names, Some(sink), progress)
                .await;
            let written = writer
                .await
                .context("output writer task failed")?
                .context("failed to write entries")?;
            result?;
            Ok(written)
        } else {
            let mut entries = worker
                .query(cancel, &query.resource_names, None, progress)
                .await?;
            sort_by_timestamp(&mut entries);
            let mut out = BufWriter::new(output);
            for entry in &entries {
                write_entry(&mut out, entry)
                    .await
                    .context("failed to write entries")?;
            }
            out.flush().await.context("failed to write entries")?;
            Ok(entries.len())
        }
    }

    /// Write the log names under every configured resource, one per line.
    pub async fn list_logs(
        &self,
        config: &Config,
        cancel: &CancellationToken,
        output: Output,
    ) -> Result<usize> {
        let mut out = BufWriter::new(output);
        let mut written = 0;
        for parent in &config.query.resource_names {
            let names = self
                .logging
                .list_log_names(cancel, parent)
                .await
                .with_context(|| format!("failed to list logs under {parent}"))?;
            debug!(%parent, logs = names.len(), "listed logs");
            for name in names {
                out.write_all(name.as_bytes()).await?;
                out.write_all(b"\n").await?;
                written += 1;
            }
        }
        out.flush().await?;
        Ok(written)
    }
}

async fn write_entry<W: AsyncWrite + Unpin>(out: &mut W, entry: &LogEntry) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(&entry.payload)?;
    line.push(b'\n');
    out.write_all(&line).await
}

/// Open `path` for writing, or stdout when absent.
pub async fn open_output(path: Option<&Path>) -> Result<Output> {
    match path {
        Some(path) => {
            let file = tokio::fs::File::create(path)
                .await
                .with_context(|| format!("failed to create {}", path.display()))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(tokio::io::stdout())),
    }
}

/// Resolver chain in configured order, or the fixed override token.
pub fn build_token_resolver(auth: &AuthConfig, client: &reqwest::Client) -> Arc<dyn TokenResolver> {
    if let Some(token) = &auth.access_token_override {
        info!("using access token from environment override");
        return Arc::new(StaticTokenResolver::from_value(token.expose().clone()));
    }
    let resolvers = auth
        .resolvers
        .iter()
        .map(|r| build_resolver(r, client))
        .collect();
    Arc::new(MultiTokenResolver::new(resolvers))
}

fn build_resolver(config: &ResolverConfig, client: &reqwest::Client) -> Arc<dyn TokenResolver> {
    match config {
        ResolverConfig::Env { var } => Arc::new(StaticTokenResolver::from_env(var.clone())),
        ResolverConfig::MetadataServer {
            base_url,
            service_account,
        } => {
            let mut resolver = match base_url {
                Some(url) => MetadataServerTokenResolver::with_base_url(client.clone(), url.clone()),
                None => MetadataServerTokenResolver::new(client.clone()),
            };
            if let Some(account) = service_account {
                resolver = resolver.service_account(account.clone());
            }
            Arc::new(resolver)
        }
        ResolverConfig::Command { program, args } => {
            Arc::new(CommandTokenResolver::new(program.clone(), args.clone()))
        }
        ResolverConfig::Interactive {
            client_id,
            client_secret_env,
        } => {
            let mut oauth = OAuthClientConfig::google(client_id.clone());
            oauth.client_secret = client_secret_env
                .as_ref()
                .and_then(|var| std::env::var(var).ok())
                .map(Secret::new);
            Arc::new(InteractiveTokenResolver::new(client.clone(), oauth))
        }
    }
}

/// Retry client over a base client that injects the bearer token, quota
/// project and configured headers.
pub fn build_http_client(
    config: &Config,
    client: reqwest::Client,
    store: Arc<TokenStore>,
) -> Arc<dyn HttpClient> {
    let mut providers: Vec<Arc<dyn HeaderProvider>> =
        vec![Arc::new(BearerTokenHeaderProvider::new(store.clone()))];
    if let Some(project) = &config.auth.quota_project {
        providers.push(Arc::new(QuotaProjectHeaderProvider::new(project.clone())));
    }
    if !config.auth.headers.is_empty() {
        let headers: Vec<HeaderInjection> = config.auth.headers.iter().map(Into::into).collect();
        providers.push(Arc::new(StaticHeaderProvider::new(headers)));
    }

    let base = Arc::new(BaseHttpClient::new(client, providers));
    let refresher = Arc::new(MultiTokenStoreRefresher::new(vec![store]));
    Arc::new(RetryHttpClient::new(
        base,
        refresher,
        config.retry.to_retry_config(),
    ))
}
