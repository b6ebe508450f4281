//! Query metrics
//!
//! - `log_entries_fetched_total` (counter)
//! - `log_entries_undecodable_total` (counter)
//! - `log_query_shard_failures_total` (counter)
//! - `log_query_progress_ratio` (gauge)

pub fn record_entry_fetched() {
    metrics::counter!("log_entries_fetched_total").increment(1);
}

pub fn record_undecodable_entry() {
    metrics::counter!("log_entries_undecodable_total").increment(1);
}

pub fn record_shard_failure() {
    metrics::counter!("log_query_shard_failures_total").increment(1);
}

pub fn record_progress(ratio: f64) {
    metrics::gauge!("log_query_progress_ratio").set(ratio);
}
