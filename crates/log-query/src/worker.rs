//! Time-sharded parallel query
//!
//! Flow for one `query` call:
//! 1. `[start, end]` is split into `worker_count` segments
//! 2. An aggregator task buffers decoded entries, forwards them to the sink
//!    and reports progress once per interval
//! 3. Each segment becomes a `WorkerPool` job listing its entries through the
//!    `LogFetcher` under a child cancellation token
//! 4. After the pool drains, the aggregation channel closes and the result is
//!    the first shard failure, a cancellation, or the buffered entries

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::entry::{LogEntry, LogSink};
use crate::error::{Error, Result};
use crate::fetcher::LogFetcher;
use crate::metrics::{record_entry_fetched, record_progress, record_shard_failure, record_undecodable_entry};
use crate::pool::WorkerPool;
use crate::progress::ProgressReporter;
use crate::segments::{divide_time_segments, segment_filter, segment_progress};

/// Raw entries buffered per shard before the decode loop catches up.
const SHARD_CHANNEL_CAPACITY: usize = 256;

pub const DEFAULT_LAUNCH_STAGGER: Duration = Duration::from_secs(3);
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Per-shard completion ratios, stored as `f64` bits.
struct ShardProgress(Vec<AtomicU64>);

impl ShardProgress {
    fn new(shards: usize) -> Self {
        Self((0..shards).map(|_| AtomicU64::new(0f64.to_bits())).collect())
    }

    fn set(&self, shard: usize, ratio: f64) {
        self.0[shard].store(ratio.to_bits(), Ordering::Relaxed);
    }

    fn mean(&self) -> f64 {
        if self.0.is_empty() {
            return 1.0;
        }
        let sum: f64 = self
            .0
            .iter()
            .map(|r| f64::from_bits(r.load(Ordering::Relaxed)))
            .sum();
        sum / self.0.len() as f64
    }
}

pub struct ParallelQueryWorker {
    fetcher: Arc<dyn LogFetcher>,
    pool: Arc<WorkerPool>,
    base_filter: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    worker_count: usize,
    launch_stagger: Duration,
    progress_interval: Duration,
}

impl ParallelQueryWorker {
    pub fn new(
        fetcher: Arc<dyn LogFetcher>,
        pool: Arc<WorkerPool>,
        base_filter: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        worker_count: usize,
    ) -> Result<Self> {
        if worker_count == 0 {
            return Err(Error::InvalidConfig("worker_count must be at least 1".into()));
        }
        if end < start {
            return Err(Error::InvalidConfig(format!(
                "end time {end} is before start time {start}"
            )));
        }
        Ok(Self {
            fetcher,
            pool,
            base_filter: base_filter.into(),
            start,
            end,
            worker_count,
            launch_stagger: DEFAULT_LAUNCH_STAGGER,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        })
    }

    /// Delay between segment launches; zero launches them back to back.
    pub fn with_launch_stagger(mut self, stagger: Duration) -> Self {
        self.launch_stagger = stagger;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Fetch every entry in the range, unsorted.
    ///
    /// Entries also go to `sink` as they arrive. The sink is dropped before
    /// this returns.
    #[instrument(skip_all, fields(shards = self.worker_count, start = %self.start, end = %self.end))]
    pub async fn query(
        &self,
        cancel: &CancellationToken,
        resource_names: &[String],
        sink: Option<LogSink>,
        progress: Arc<dyn ProgressReporter>,
    ) -> Result<Vec<LogEntry>> {
        let segments = divide_time_segments(self.start, self.end, self.worker_count);
        let shard_progress = Arc::new(ShardProgress::new(self.worker_count));
        let (entries_tx, entries_rx) = mpsc::unbounded_channel();

        let aggregator = tokio::spawn(aggregate(
            entries_rx,
            sink,
            progress,
            shard_progress.clone(),
            self.progress_interval,
        ));

        let shards_cancel = cancel.child_token();
        let failure: Arc<Mutex<Option<Error>>> = Arc::new(Mutex::new(None));

        let last = segments.len() - 2;
        for (index, bounds) in segments.windows(2).enumerate() {
            if shards_cancel.is_cancelled() {
                debug!(index, "cancelled, not launching remaining segments");
                break;
            }
            if index > 0 && !self.launch_stagger.is_zero() {
                tokio::select! {
                    _ = shards_cancel.cancelled() => {
                        debug!(index, "cancelled during launch stagger");
                        break;
                    }
                    _ = tokio::time::sleep(self.launch_stagger) => {}
                }
            }

            let shard = Shard {
                index,
                begin: bounds[0],
                end: bounds[1],
                filter: segment_filter(&self.base_filter, bounds[0], bounds[1], index == last),
                resource_names: resource_names.to_vec(),
                fetcher: self.fetcher.clone(),
                cancel: shards_cancel.clone(),
                progress: shard_progress.clone(),
                entries: entries_tx.clone(),
                failure: failure.clone(),
            };
            debug!(index, begin = %shard.begin, end = %shard.end, "launching segment");
            self.pool.run(shard.run()).await;
        }

        self.pool.wait().await;
        drop(entries_tx);
        let entries = aggregator
            .await
            .map_err(|e| Error::ShardFailed(format!("aggregator task failed: {e}")))?;

        let recorded = failure.lock().ok().and_then(|mut f| f.take());
        if let Some(e) = recorded {
            return Err(e);
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        info!(entries = entries.len(), "query complete");
        Ok(entries)
    }
}

/// Everything one segment job needs; moved into the pool.
struct Shard {
    index: usize,
    begin: DateTime<Utc>,
    end: DateTime<Utc>,
    filter: String,
    resource_names: Vec<String>,
    fetcher: Arc<dyn LogFetcher>,
    cancel: CancellationToken,
    progress: Arc<ShardProgress>,
    entries: mpsc::UnboundedSender<LogEntry>,
    failure: Arc<Mutex<Option<Error>>>,
}

impl Shard {
    async fn run(self) {
        let (raw_tx, mut raw_rx) = mpsc::channel::<Value>(SHARD_CHANNEL_CAPACITY);
        let fetch = self.fetcher.list_entries(
            self.cancel.clone(),
            self.resource_names.clone(),
            self.filter.clone(),
            raw_tx,
        );
        let decode = async {
            let mut count = 0usize;
            while let Some(raw) = raw_rx.recv().await {
                match LogEntry::from_json(raw) {
                    Ok(entry) => {
                        self.progress
                            .set(self.index, segment_progress(self.begin, self.end, entry.timestamp));
                        record_entry_fetched();
                        count += 1;
                        // Aggregator outlives every shard
                        let _ = self.entries.send(entry);
                    }
                    Err(e) => {
                        warn!(shard = self.index, error = %e, "skipping undecodable entry");
                        record_undecodable_entry();
                    }
                }
            }
            count
        };
        let (result, count) = tokio::join!(fetch, decode);

        match result {
            Ok(()) => {
                self.progress.set(self.index, 1.0);
                debug!(shard = self.index, entries = count, "segment complete");
            }
            Err(e) if e.is_cancelled() => {
                debug!(shard = self.index, entries = count, "segment cancelled");
            }
            Err(e) => {
                error!(shard = self.index, error = %e, "segment failed, cancelling remaining segments");
                record_shard_failure();
                if let Ok(mut failure) = self.failure.lock() {
                    failure.get_or_insert(e);
                }
                self.cancel.cancel();
            }
        }
    }
}

async fn aggregate(
    mut entries_rx: mpsc::UnboundedReceiver<LogEntry>,
    sink: Option<LogSink>,
    progress: Arc<dyn ProgressReporter>,
    shard_progress: Arc<ShardProgress>,
    interval: Duration,
) -> Vec<LogEntry> {
    let started = Instant::now();
    let mut ticker = tokio::time::interval_at(started + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut entries = Vec::new();

    loop {
        tokio::select! {
            received = entries_rx.recv() => match received {
                Some(entry) => {
                    if let Some(sink) = &sink {
                        sink.send(entry.clone());
                    }
                    entries.push(entry);
                }
                None => break,
            },
            _ = ticker.tick() => {
                report(progress.as_ref(), &shard_progress, entries.len(), started);
            }
        }
    }
    report(progress.as_ref(), &shard_progress, entries.len(), started);
    entries
}

fn report(
    progress: &dyn ProgressReporter,
    shard_progress: &ShardProgress,
    fetched: usize,
    started: Instant,
) {
    let ratio = shard_progress.mean();
    let elapsed = started.elapsed().as_secs_f64();
    let rate = if elapsed > 0.0 { fetched as f64 / elapsed } else { 0.0 };
    record_progress(ratio);
    progress.update(ratio, &format!("{fetched} entries fetched ({rate:.1} entries/s)"));
}
