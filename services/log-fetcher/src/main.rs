//! Log Fetcher
//!
//! Single-binary tool that:
//! 1. Resolves a Cloud Logging access token from the configured sources
//! 2. Splits the query's time range into segments and fetches them in parallel
//! 3. Writes every matching entry as NDJSON, sorted by timestamp unless
//!    streaming is enabled

mod app;
mod config;
mod metrics;

use std::time::Instant;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::App;
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs on stderr; stdout carries entries
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    info!("starting log-fetcher");

    let prometheus_handle = metrics::install_recorder()?;

    // CLI: --config <path> and --list-logs
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());
    let list_logs = args.iter().any(|a| a == "--list-logs");

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        resources = config.query.resource_names.len(),
        start = %config.query.start_time,
        end = %config.query.end_time,
        segments = config.query.segment_count,
        pool_size = config.query.pool_size,
        resolvers = config.auth.resolvers.len(),
        token_override = config.auth.access_token_override.is_some(),
        endpoint = %config.logging_api.endpoint,
        "configuration loaded"
    );

    if let Some(addr) = config.metrics.listen_addr {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind metrics listener on {addr}"))?;
        info!(%addr, "serving /metrics");
        let router = metrics::router(prometheus_handle);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!(error = %e, "metrics listener failed");
            }
        });
    }

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    let app = App::build(&config)?;
    let output = app::open_output(config.query.output.as_deref()).await?;

    if list_logs {
        let written = app.list_logs(&config, &cancel, output).await?;
        info!(logs = written, "log listing complete");
        return Ok(());
    }

    let started = Instant::now();
    let result = app.run_query(&config, &cancel, output).await;
    let elapsed = started.elapsed().as_secs_f64();
    match &result {
        Ok(written) => {
            metrics::record_query("success", elapsed);
            info!(entries = written, elapsed_secs = elapsed, "query finished");
        }
        Err(e)
            if e.downcast_ref::<log_query::Error>()
                .is_some_and(log_query::Error::is_cancelled) =>
        {
            metrics::record_query("cancelled", elapsed);
            warn!(elapsed_secs = elapsed, "query cancelled");
        }
        Err(e) => {
            metrics::record_query("failure", elapsed);
            error!(error = %e, elapsed_secs = elapsed, "query failed");
        }
    }
    result.map(|_| ())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, cancelling query"),
        _ = terminate => info!("received SIGTERM, cancelling query"),
    }
}
