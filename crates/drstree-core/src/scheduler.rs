//! Worker pool for per-file planning.
//!
//! A pool of size 1 runs items in order on the calling thread. Larger pools
//! run on a dedicated rayon pool. SIGTERM terminates the process while the
//! pool is active.

use crate::error::{DrsError, Result};
use crate::platform::TerminationGuard;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::debug;

/// Result of one work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkOutcome {
    Success,
    /// Deliberately not processed; not an error.
    Skip,
    /// Failed; the run goes on with the other items.
    Fatal,
}

/// Shared progress and error counters.
#[derive(Debug, Default)]
pub struct RunCounters {
    total: AtomicUsize,
    processed: AtomicUsize,
    successes: AtomicUsize,
    skips: AtomicUsize,
    errors: AtomicUsize,
}

/// Point-in-time copy of [`RunCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub total: usize,
    pub successes: usize,
    pub skips: usize,
    pub errors: usize,
}

impl RunCounters {
    pub fn new(total: usize) -> Self {
        let counters = Self::default();
        counters.total.store(total, Ordering::Relaxed);
        counters
    }

    /// Count one finished item; returns how many are done.
    pub fn record(&self, outcome: WorkOutcome) -> usize {
        let counter = match outcome {
            WorkOutcome::Success => &self.successes,
            WorkOutcome::Skip => &self.skips,
            WorkOutcome::Fatal => &self.errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.processed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            total: self.total.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            skips: self.skips.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Messages collected from workers and released after the pool joins.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    lines: Mutex<Vec<String>>,
}

impl OutputBuffer {
    pub fn push(&self, line: impl Into<String>) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.into());
        }
    }

    pub fn drain(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|mut lines| std::mem::take(&mut *lines))
            .unwrap_or_default()
    }
}

/// Fixed-size pool running one closure over a slice of items.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    threads: usize,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Self {
        Self {
            threads: threads.max(1),
        }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Run `worker` on every item; results keep the item order.
    pub fn run<T, R, F>(&self, items: &[T], worker: F) -> Result<Vec<R>>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        let _guard = TerminationGuard::install();
        debug!("Processing {} items on {} worker(s)", items.len(), self.threads);

        if self.threads <= 1 {
            return Ok(items.iter().map(&worker).collect());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .thread_name(|index| format!("drstree-worker-{}", index))
            .build()
            .map_err(|e| DrsError::Other(format!("worker pool: {}", e)))?;
        Ok(pool.install(|| items.par_iter().map(&worker).collect()))
    }
}
