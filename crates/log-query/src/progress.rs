//! Progress reporting for long-running queries

use tracing::info;

/// Receives overall progress while a query runs.
///
/// `ratio` is in `[0, 1]`; `message` is a short human-readable summary.
pub trait ProgressReporter: Send + Sync {
    fn update(&self, ratio: f64, message: &str);
}

/// Logs each update at `info`.
pub struct TracingProgress {
    label: String,
}

impl TracingProgress {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl ProgressReporter for TracingProgress {
    fn update(&self, ratio: f64, message: &str) {
        info!(
            query = %self.label,
            percent = %format!("{:.1}", ratio * 100.0),
            "{message}"
        );
    }
}

pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn update(&self, _ratio: f64, _message: &str) {}
}
