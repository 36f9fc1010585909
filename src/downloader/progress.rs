//! Progress tracking for download workers.
//!
//! Each worker keeps a running count of the tasks it has finished. Every
//! `interval` completions the worker emits a `[PROGRESS]` log line; when an
//! indicatif bar is attached it advances on every completion.

use super::job::DownloadOutcome;
use indicatif::ProgressBar;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Shared per-worker counters for one scheduler run
#[derive(Debug)]
pub struct WorkerProgress {
    per_worker: Vec<AtomicU64>,
    completed: AtomicU64,
    total: u64,
    interval: u64,
    bar: Option<ProgressBar>,
}

impl WorkerProgress {
    /// Counters for `workers` workers over `total` tasks, logging every `interval` completions.
    ///
    /// An interval of 0 disables the periodic log line.
    pub fn new(workers: usize, total: u64, interval: u64) -> Self {
        Self {
            per_worker: (0..workers).map(|_| AtomicU64::new(0)).collect(),
            completed: AtomicU64::new(0),
            total,
            interval,
            bar: None,
        }
    }

    /// Advance `bar` as tasks finish
    pub fn with_bar(mut self, bar: ProgressBar) -> Self {
        self.bar = Some(bar);
        self
    }

    /// Record a finished task for `worker`; returns that worker's new count
    pub fn record(&self, worker: usize, outcome: &DownloadOutcome) -> u64 {
        let done = self
            .per_worker
            .get(worker)
            .map(|c| c.fetch_add(1, Ordering::Relaxed) + 1)
            .unwrap_or(0);
        let overall = self.completed.fetch_add(1, Ordering::Relaxed) + 1;

        if let Some(bar) = &self.bar {
            bar.inc(1);
            if let DownloadOutcome::Failed { .. } = outcome {
                bar.set_message("with failures");
            }
        }

        if self.interval > 0 && done > 0 && done % self.interval == 0 {
            info!(
                worker,
                completed = done,
                overall,
                total = self.total,
                "{}",
                format_progress(worker, done, overall, self.total)
            );
        }
        done
    }

    /// Completed count for each worker
    pub fn snapshot(&self) -> Vec<u64> {
        self.per_worker
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect()
    }

    /// Tasks finished across all workers
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Close the progress bar, if any
    pub fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}

/// Human-readable progress line
pub fn format_progress(worker: usize, done: u64, overall: u64, total: u64) -> String {
    let pct = if total == 0 {
        100.0
    } else {
        overall as f64 / total as f64 * 100.0
    };
    format!(
        "[PROGRESS] Worker {worker} completed {done} files - {overall}/{total} overall ({pct:.1}%)"
    )
}
