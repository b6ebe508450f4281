//! Bounded-concurrency job runner

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

/// Runs at most `size` submitted futures at once.
///
/// A job that panics is logged and dropped; its permit is still released, so
/// the pool keeps its full capacity.
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    size: usize,
}

impl WorkerPool {
    /// `size` of zero is raised to one.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            tracker: TaskTracker::new(),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Submit `job`, waiting for a free slot first.
    ///
    /// The job counts as pending for `wait` from the moment this is called,
    /// including while it waits for a slot.
    pub async fn run<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let pending = self.tracker.token();
        let permit = match self.permits.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => {
                error!("worker pool semaphore closed, dropping job");
                return;
            }
        };

        tokio::spawn(async move {
            let _permit = permit;
            let _pending = pending;
            if let Err(panic) = AssertUnwindSafe(job).catch_unwind().await {
                error!(panic = %panic_message(&*panic), "worker pool job panicked");
                metrics::counter!("worker_pool_panics_total").increment(1);
            }
        });
    }

    /// Resolve once every job submitted so far has finished.
    ///
    /// The pool remains usable afterwards.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
        debug!("worker pool drained");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".into()
    }
}
