//! Download tasks, per-task outcomes and the run summary

use crate::FileDescriptor;
use serde::Serialize;
use std::path::PathBuf;

/// One file to fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadTask {
    /// What to download
    pub descriptor: FileDescriptor,
    /// Where the completed file goes
    pub destination_path: PathBuf,
    /// Attempts made so far
    pub attempt_count: u32,
}

impl DownloadTask {
    /// New task with no attempts made
    pub fn new(descriptor: FileDescriptor, destination_path: impl Into<PathBuf>) -> Self {
        Self {
            descriptor,
            destination_path: destination_path.into(),
            attempt_count: 0,
        }
    }
}

/// Terminal state of a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DownloadOutcome {
    /// File downloaded and placed
    Success {
        /// Bytes written
        bytes: u64,
    },
    /// Destination already present with non-zero size; nothing fetched
    SkippedExists,
    /// Gave up on this file
    Failed {
        /// Last error
        reason: String,
    },
    /// Not started (or abandoned during backoff) because shutdown was requested
    Cancelled,
}

impl DownloadOutcome {
    /// Label used in metrics and JSON output
    pub fn label(&self) -> &'static str {
        match self {
            DownloadOutcome::Success { .. } => "success",
            DownloadOutcome::SkippedExists => "skipped",
            DownloadOutcome::Failed { .. } => "failed",
            DownloadOutcome::Cancelled => "cancelled",
        }
    }
}

/// A finished task with the worker that ran it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskReport {
    /// Task with its final attempt count
    pub task: DownloadTask,
    /// How it ended
    pub outcome: DownloadOutcome,
    /// Worker index, `None` for tasks no worker picked up
    pub worker: Option<usize>,
}

/// A failed file in the summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    /// Remote URL
    pub url: String,
    /// Last error
    pub reason: String,
}

/// Run-level counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Tasks handed to the scheduler
    pub selected: u64,
    /// Files downloaded
    pub downloaded: u64,
    /// Files already present
    pub skipped_existing: u64,
    /// Files that failed
    pub failed: u64,
    /// Tasks not run because of shutdown
    pub cancelled: u64,
    /// Bytes downloaded
    pub bytes: u64,
    /// Finished tasks per worker
    pub per_worker: Vec<u64>,
    /// Failed files with reasons
    pub failures: Vec<FailureRecord>,
}

impl RunSummary {
    /// Aggregate task reports from `workers` workers
    pub fn from_reports(reports: &[TaskReport], workers: usize) -> Self {
        let mut summary = RunSummary {
            selected: reports.len() as u64,
            per_worker: vec![0; workers],
            ..Default::default()
        };

        for report in reports {
            if let (Some(w), false) = (report.worker, report.outcome == DownloadOutcome::Cancelled) {
                if let Some(count) = summary.per_worker.get_mut(w) {
                    *count += 1;
                }
            }
            match &report.outcome {
                DownloadOutcome::Success { bytes } => {
                    summary.downloaded += 1;
                    summary.bytes += bytes;
                }
                DownloadOutcome::SkippedExists => summary.skipped_existing += 1,
                DownloadOutcome::Failed { reason } => {
                    summary.failed += 1;
                    summary.failures.push(FailureRecord {
                        url: report.task.descriptor.remote_url.clone(),
                        reason: reason.clone(),
                    });
                }
                DownloadOutcome::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} selected, {} downloaded ({:.1} MiB), {} already present, {} failed",
            self.selected,
            self.downloaded,
            self.bytes as f64 / (1024.0 * 1024.0),
            self.skipped_existing,
            self.failed
        )?;
        if self.cancelled > 0 {
            write!(f, ", {} cancelled", self.cancelled)?;
        }
        Ok(())
    }
}

/// Everything a scheduler run produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// One report per task, in submission order
    pub reports: Vec<TaskReport>,
    /// Aggregated counts
    pub summary: RunSummary,
}
