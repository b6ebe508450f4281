//! Transport metrics
//!
//! - `http_retries_total` (counter): label `reason` (`auth` or `status`)
//! - `http_requests_failed_total` (counter): label `kind`

/// Why a request is being retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// Auth-retriable status; the token was refreshed first.
    Auth,
    /// Plain retriable status; the client slept before retrying.
    Status,
}

impl RetryReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RetryReason::Auth => "auth",
            RetryReason::Status => "status",
        }
    }
}

pub fn record_retry(reason: RetryReason) {
    metrics::counter!("http_retries_total", "reason" => reason.as_str()).increment(1);
}

/// Record a request that gave up; `kind` is `transport`, `status` or `exhausted`.
pub fn record_failure(kind: &'static str) {
    metrics::counter!("http_requests_failed_total", "kind" => kind).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};

    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_retry(RetryReason::Auth);
        record_failure("transport");
    }

    #[test]
    fn retries_are_labelled_by_reason() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_retry(RetryReason::Auth);
        record_retry(RetryReason::Status);
        record_retry(RetryReason::Status);

        let output = handle.render();
        assert!(output.contains("http_retries_total{reason=\"auth\"} 1"), "got: {output}");
        assert!(output.contains("http_retries_total{reason=\"status\"} 2"), "got: {output}");
    }

    #[test]
    fn failures_are_labelled_by_kind() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_failure("exhausted");

        let output = handle.render();
        assert!(
            output.contains("http_requests_failed_total{kind=\"exhausted\"} 1"),
            "got: {output}"
        );
    }
}
