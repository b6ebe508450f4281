//! Prometheus metrics exposition
//!
//! Metrics recorded by this binary itself:
//!
//! - `log_queries_total` (counter): label `outcome`
//! - `log_query_duration_seconds` (histogram): label `outcome`
//!
//! The library crates record the retry, token refresh, entry and progress
//! metrics into the same recorder.

use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

const DURATION_BUCKETS: &[f64] = &[1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0];

fn builder() -> anyhow::Result<PrometheusBuilder> {
    Ok(PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full("log_query_duration_seconds".to_string()),
        DURATION_BUCKETS,
    )?)
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    Ok(builder()?.install_recorder()?)
}

/// Record a finished query; `outcome` is `success`, `failure` or `cancelled`.
pub fn record_query(outcome: &'static str, duration_secs: f64) {
    metrics::counter!("log_queries_total", "outcome" => outcome).increment(1);
    metrics::histogram!("log_query_duration_seconds", "outcome" => outcome).record(duration_secs);
}

/// `/metrics` in the Prometheus text exposition format.
pub fn router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(handle)
}

async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        handle.render(),
    )
}
