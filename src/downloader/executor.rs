//! Concurrent download scheduler
//!
//! A fixed pool of workers pulls tasks from one shared queue. Each file is
//! streamed into a temporary file next to its destination and only renamed
//! into place once the body is complete, so an interrupted or failed transfer
//! never leaves a partial file at the final path. The file keeps the server's
//! `Last-Modified` time when one is sent.

use crate::downloader::config::PROGRESS_INTERVAL;
use crate::downloader::job::{DownloadOutcome, DownloadTask, RunReport, RunSummary, TaskReport};
use crate::downloader::progress::WorkerProgress;
use crate::downloader::retry::{RetryFailure, RetryPolicy};
use crate::downloader::DownloadError;
use crate::fetcher::Transport;
use crate::metrics::{self, DownloadMetrics};
use crate::shutdown::{self, SharedShutdown};
use futures::future::join_all;
use indicatif::ProgressBar;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;
use tracing::{debug, info, warn};

type TaskQueue = Mutex<VecDeque<(usize, DownloadTask)>>;

/// Runs download tasks with bounded concurrency
pub struct DownloadScheduler {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    shutdown: Option<SharedShutdown>,
    progress_interval: u64,
    progress_bar: Option<ProgressBar>,
}

impl DownloadScheduler {
    /// Create a scheduler over `transport` with the default retry policy
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            policy: RetryPolicy::default(),
            shutdown: shutdown::get_global_shutdown(),
            progress_interval: PROGRESS_INTERVAL,
            progress_bar: None,
        }
    }

    /// Override the retry policy
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Attach a shared shutdown handle for graceful cancellation.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Log a worker's running count every `interval` completions (0 disables)
    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Advance an indicatif bar as tasks finish
    pub fn with_progress_bar(mut self, bar: ProgressBar) -> Self {
        self.progress_bar = Some(bar);
        self
    }

    /// Run every task with at most `concurrency` downloads in flight.
    ///
    /// Never fails as a whole: each task ends in a [`DownloadOutcome`].
    /// Reports come back in submission order. After shutdown is requested no
    /// worker picks up another task; those left in the queue are reported as
    /// [`DownloadOutcome::Cancelled`].
    pub async fn run(&self, tasks: Vec<DownloadTask>, concurrency: usize) -> RunReport {
        let total = tasks.len();
        let workers = concurrency.max(1).min(total.max(1));
        let queue: TaskQueue = Mutex::new(tasks.into_iter().enumerate().collect());

        let mut progress = WorkerProgress::new(workers, total as u64, self.progress_interval);
        if let Some(bar) = &self.progress_bar {
            bar.set_length(total as u64);
            progress = progress.with_bar(bar.clone());
        }

        info!(files = total, workers, "Starting downloads");

        let finished = join_all((0..workers).map(|w| self.worker(w, &queue, &progress))).await;
        let mut indexed: Vec<(usize, TaskReport)> = finished.into_iter().flatten().collect();

        let leftover = queue.into_inner().unwrap_or_else(PoisonError::into_inner);
        if !leftover.is_empty() {
            info!(
                cancelled = leftover.len(),
                "Shutdown requested, remaining files not started"
            );
        }
        for (index, task) in leftover {
            metrics::record_outcome("cancelled");
            indexed.push((
                index,
                TaskReport {
                    task,
                    outcome: DownloadOutcome::Cancelled,
                    worker: None,
                },
            ));
        }

        indexed.sort_by_key(|(index, _)| *index);
        let reports: Vec<TaskReport> = indexed.into_iter().map(|(_, r)| r).collect();
        progress.finish();

        let summary = RunSummary::from_reports(&reports, workers);
        info!(
            selected = summary.selected,
            downloaded = summary.downloaded,
            skipped = summary.skipped_existing,
            failed = summary.failed,
            cancelled = summary.cancelled,
            bytes = summary.bytes,
            "Downloads complete"
        );
        RunReport { reports, summary }
    }

    async fn worker(
        &self,
        worker: usize,
        queue: &TaskQueue,
        progress: &WorkerProgress,
    ) -> Vec<(usize, TaskReport)> {
        let mut done = Vec::new();
        loop {
            if self.shutdown_requested() {
                debug!(worker, "Shutdown requested, worker stopping");
                break;
            }
            let next = queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            let Some((index, task)) = next else {
                break;
            };

            let report = self.process(worker, task).await;
            if report.outcome != DownloadOutcome::Cancelled {
                progress.record(worker, &report.outcome);
            }
            done.push((index, report));
        }
        done
    }

    async fn process(&self, worker: usize, mut task: DownloadTask) -> TaskReport {
        let dest = task.destination_path.clone();

        let outcome = if is_present(&dest).await {
            debug!(worker, path = %dest.display(), "File already present, skipping");
            DownloadOutcome::SkippedExists
        } else {
            let url = task.descriptor.remote_url.clone();
            let target = task.descriptor.remote_filename().to_string();
            let (url_ref, dest_ref) = (url.as_str(), dest.as_path());
            let attempted = self
                .policy
                .run(
                    move |_| self.download_once(url_ref, dest_ref),
                    self.shutdown.as_deref(),
                    &target,
                    &url,
                )
                .await;
            task.attempt_count = attempted.attempts;

            match attempted.outcome {
                Ok(bytes) => {
                    debug!(
                        worker,
                        %url,
                        bytes,
                        attempts = attempted.attempts,
                        path = %dest.display(),
                        "Download complete"
                    );
                    DownloadOutcome::Success { bytes }
                }
                Err(RetryFailure::Cancelled(_)) => {
                    debug!(worker, %url, "Download abandoned during backoff");
                    DownloadOutcome::Cancelled
                }
                Err(failure) => {
                    let reason = failure
                        .error()
                        .map(ToString::to_string)
                        .unwrap_or_else(|| "unknown error".to_string());
                    warn!(
                        worker,
                        %url,
                        attempts = attempted.attempts,
                        error = %reason,
                        "Download failed"
                    );
                    DownloadOutcome::Failed { reason }
                }
            }
        };

        if !matches!(outcome, DownloadOutcome::Success { .. }) {
            metrics::record_outcome(outcome.label());
        }

        TaskReport {
            task,
            outcome,
            worker: Some(worker),
        }
    }

    /// One attempt: stream into a sibling temp file, verify, then rename into place.
    ///
    /// Any early return drops the temp file, which deletes it.
    async fn download_once(&self, url: &str, dest: &Path) -> Result<u64, DownloadError> {
        let parent = dest
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(parent).await?;

        let file_name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_dir = parent.to_path_buf();
        let (temp, std_file) = run_blocking(move || {
            let temp = tempfile::Builder::new()
                .prefix(&format!(".{file_name}."))
                .suffix(".part")
                .tempfile_in(&temp_dir)?;
            let file = temp.reopen()?;
            Ok((temp, file))
        })
        .await?;
        let mut file = tokio::fs::File::from_std(std_file);

        let download_metrics = DownloadMetrics::start();
        let body = self.transport.fetch_to_file(url, &mut file).await?;

        if let Some(expected) = body.content_length {
            if expected != body.bytes_written {
                return Err(DownloadError::LengthMismatch {
                    expected,
                    received: body.bytes_written,
                });
            }
        }

        file.sync_all().await?;
        drop(file);
        let final_path = dest.to_path_buf();
        run_blocking(move || {
            if let Some(modified) = body.last_modified {
                if let Err(e) = temp.as_file().set_modified(SystemTime::from(modified)) {
                    debug!(path = %final_path.display(), error = %e, "Could not set modification time");
                }
            }
            temp.persist(&final_path).map(|_| ()).map_err(|e| {
                std::io::Error::new(e.error.kind(), format!("{}: {}", final_path.display(), e.error))
            })
        })
        .await?;

        download_metrics.record_success(body.bytes_written);
        Ok(body.bytes_written)
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|s| s.is_shutdown_requested())
            .unwrap_or(false)
    }
}

/// Run blocking filesystem work off the async workers
async fn run_blocking<T, F>(work: F) -> Result<T, DownloadError>
where
    T: Send + 'static,
    F: FnOnce() -> std::io::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| DownloadError::Io(format!("blocking task failed: {e}")))?
        .map_err(DownloadError::from)
}

/// Destination exists as a non-empty regular file
async fn is_present(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}
