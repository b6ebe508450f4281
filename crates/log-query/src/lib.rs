//! Parallel, time-sharded retrieval of log entries
//!
//! A query over `[start, end)` is split into contiguous segments. Each segment
//! runs as one job on a shared `WorkerPool`, streaming raw entries from a
//! `LogFetcher` through a per-shard channel into a single aggregator that
//! buffers them, forwards them to an optional `LogSink` and reports progress.
//!
//! Failure model:
//! - The first shard error that is not a cancellation cancels every other shard
//!   and becomes the query's error
//! - Cancelling the caller's token stops all shards and yields `Error::Cancelled`
//! - A shard that stops because of cancellation is never itself a failure

pub mod entry;
pub mod error;
pub mod fetcher;
pub mod metrics;
pub mod pool;
pub mod progress;
pub mod segments;
pub mod worker;

pub use entry::{LogEntry, LogSink, sort_by_timestamp};
pub use error::{Error, Result};
pub use fetcher::{CloudLoggingClient, LogFetcher};
pub use pool::WorkerPool;
pub use progress::{NoopProgress, ProgressReporter, TracingProgress};
pub use segments::{divide_time_segments, segment_filter, segment_progress};
pub use worker::ParallelQueryWorker;
