//! Download scheduling and retry
//!
//! # Overview
//!
//! The downloader turns selected [`crate::FileDescriptor`]s into files on disk:
//!
//! 1. **Tasks**: each file becomes a [`job::DownloadTask`] with a destination
//!    resolved by [`crate::output::PartitionStrategy`]
//! 2. **Scheduling**: [`executor::DownloadScheduler`] runs a bounded pool of
//!    workers over a shared queue
//! 3. **Retry**: transient failures are retried with exponential backoff by
//!    [`retry::RetryPolicy`]
//! 4. **Progress**: each worker reports its running count through
//!    [`progress::WorkerProgress`]
//!
//! # Quick Start
//!
//! ```no_run
//! use mrt_downloader::downloader::{DownloadScheduler, DownloadTask};
//! use mrt_downloader::fetcher::http::HttpTransport;
//! use std::sync::Arc;
//!
//! # async fn example(tasks: Vec<DownloadTask>) -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Arc::new(HttpTransport::new()?);
//! let report = DownloadScheduler::new(transport).run(tasks, 8).await;
//! println!("{}", report.summary);
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! Per-file failures never abort a run; they are recorded as
//! [`job::DownloadOutcome::Failed`] and surface in the [`job::RunSummary`].
//! Errors are categorized by type:
//! - Network errors, timeouts, 408/429/5xx and truncated bodies (retried)
//! - Other 4xx statuses (not retried)
//! - Local IO errors (not retried)

pub mod config;
pub mod executor;
pub mod job;
pub mod progress;
pub mod retry;

pub use executor::DownloadScheduler;
pub use job::{DownloadOutcome, DownloadTask, RunReport, RunSummary, TaskReport};
pub use retry::{RetryFailure, RetryPolicy, Retryable};

use crate::fetcher::retry_formatter::RetryErrorType;
use crate::fetcher::TransportError;

/// Download errors for a single attempt
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DownloadError {
    /// Network or server problem that another attempt may fix
    #[error("{0}")]
    Transient(TransportError),

    /// Server refused the request (e.g. 404, 403)
    #[error("{0}")]
    Terminal(TransportError),

    /// Body shorter or longer than `Content-Length`
    #[error("length mismatch: expected {expected} bytes, received {received}")]
    LengthMismatch {
        /// Announced length
        expected: u64,
        /// Bytes actually written
        received: u64,
    },

    /// Local filesystem failure
    #[error("IO error: {0}")]
    Io(String),
}

impl From<TransportError> for DownloadError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Io(msg) => DownloadError::Io(msg),
            e if e.is_retryable() => DownloadError::Transient(e),
            e => DownloadError::Terminal(e),
        }
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(err: std::io::Error) -> Self {
        DownloadError::Io(err.to_string())
    }
}

impl Retryable for DownloadError {
    fn error_type(&self) -> RetryErrorType {
        match self {
            DownloadError::Transient(e) | DownloadError::Terminal(e) => e.error_type(),
            DownloadError::LengthMismatch { .. } => RetryErrorType::LengthMismatch,
            DownloadError::Io(_) => RetryErrorType::Storage,
        }
    }
}
