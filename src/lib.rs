//! # MRT Downloader Library
//!
//! Retrieves time-bounded sets of MRT routing dumps (RIB snapshots and update
//! files) published by public route collectors and stores them locally under
//! a deterministic naming scheme.
//!
//! ## Features
//!
//! - **Multi-Project Support**: RIPE RIS (`rrcNN`) and RouteViews (`route-views*`) collectors
//! - **Listing Cache**: Monthly directory listings are persisted between runs
//! - **Bounded Concurrency**: A fixed pool of download workers with retry and backoff
//! - **Atomic Placement**: Files are staged next to their destination and renamed on completion
//! - **Pluggable Layouts**: Flat, per-collector, per-date, per-hour and RIS-style trees
//!
//! ## Quick Start
//!
//! ```no_run
//! use mrt_downloader::{TimeRange, KindFilter};
//! use mrt_downloader::cache::ListingCache;
//! use mrt_downloader::downloader::{DownloadScheduler, DownloadTask};
//! use mrt_downloader::fetcher::{http::HttpTransport, ListingFetcher};
//! use mrt_downloader::output::PartitionStrategy;
//! use mrt_downloader::registry::CollectorRegistry;
//! use mrt_downloader::selection::RangeFilter;
//! use chrono::{TimeZone, Utc};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let range = TimeRange::new(
//!     Utc.with_ymd_and_hms(2025, 1, 16, 0, 0, 0).unwrap(),
//!     Utc.with_ymd_and_hms(2025, 1, 16, 1, 0, 0).unwrap(),
//! )?;
//! let collectors = CollectorRegistry::load_embedded()?.select(&["rrc00".to_string()], &[])?;
//!
//! let transport = Arc::new(HttpTransport::new()?);
//! let fetcher = ListingFetcher::new(transport.clone());
//! let cache = ListingCache::in_memory();
//! let selection = RangeFilter::new(&fetcher, &cache)
//!     .with_kind_filter(KindFilter::UpdatesOnly)
//!     .select(&collectors, &range)
//!     .await;
//!
//! let tasks = selection
//!     .descriptors
//!     .into_iter()
//!     .map(|d| {
//!         let dest = PartitionStrategy::Flat.resolve(Path::new("./mrt"), &d);
//!         DownloadTask::new(d, dest)
//!     })
//!     .collect();
//! let report = DownloadScheduler::new(transport).run(tasks, 4).await;
//! println!("{}", report.summary);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`parser`] - Extracts kind and timestamp from RIS and RouteViews filenames
//! - [`registry`] - Known collectors and their archive URL layouts
//! - [`fetcher`] - Directory listing retrieval over a pluggable [`fetcher::Transport`]
//! - [`cache`] - Persisted listing cache keyed by collector and month
//! - [`selection`] - Range filter producing the in-range file set
//! - [`output`] - Partitioning strategies mapping files to local paths
//! - [`downloader`] - Worker pool with retry, atomic writes and progress counters
//! - [`shutdown`] - Cooperative cancellation shared by all workers

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Listing cache
pub mod cache;

/// CLI command implementations
pub mod cli;

/// Download scheduling
pub mod downloader;

/// Listing fetchers and HTTP transport
pub mod fetcher;

/// Optional Prometheus metrics
pub mod metrics;

/// Local path partitioning
pub mod output;

/// Filename parsing
pub mod parser;

/// Registry of known collectors
pub mod registry;

/// Range filtering over collector listings
pub mod selection;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

pub use parser::{parse, ParseError, ParsedName};
pub use registry::{CollectorInfo, Project};

/// Kind of MRT dump
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    /// Full routing table dump (`bview` on RIS, `rib` on RouteViews)
    Snapshot,
    /// Incremental update file
    Update,
}

impl FileKind {
    /// Filename token used when no provider-specific token is known
    pub fn canonical_token(&self) -> &'static str {
        match self {
            FileKind::Snapshot => "bview",
            FileKind::Update => "updates",
        }
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FileKind::Snapshot => "snapshot",
            FileKind::Update => "update",
        };
        write!(f, "{s}")
    }
}

impl FromStr for FileKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "snapshot" | "bview" | "rib" => Ok(FileKind::Snapshot),
            "update" | "updates" => Ok(FileKind::Update),
            _ => Err(format!("Invalid file kind: {s}")),
        }
    }
}

/// Which kinds of files a run selects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KindFilter {
    /// Snapshots and updates
    #[default]
    All,
    /// Snapshots (RIB dumps) only
    SnapshotsOnly,
    /// Update files only
    UpdatesOnly,
}

impl KindFilter {
    /// Whether a file of `kind` passes the filter
    pub fn accepts(&self, kind: FileKind) -> bool {
        match self {
            KindFilter::All => true,
            KindFilter::SnapshotsOnly => kind == FileKind::Snapshot,
            KindFilter::UpdatesOnly => kind == FileKind::Update,
        }
    }
}

/// A remote MRT file discovered in a collector listing.
///
/// Identity is the remote URL: two descriptors with the same URL are equal
/// regardless of the other fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Collector the file belongs to (e.g. "rrc00", "route-views.sydney")
    pub collector_id: String,
    /// Absolute download URL
    pub remote_url: String,
    /// Snapshot or update
    pub file_kind: FileKind,
    /// Dump time (UTC, truncated to the minute)
    pub timestamp: DateTime<Utc>,
}

impl FileDescriptor {
    /// Create a descriptor. Sub-minute components of `timestamp` are dropped.
    pub fn new(
        collector_id: impl Into<String>,
        remote_url: impl Into<String>,
        file_kind: FileKind,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let timestamp = timestamp
            .duration_trunc(TimeDelta::minutes(1))
            .unwrap_or(timestamp);
        Self {
            collector_id: collector_id.into(),
            remote_url: remote_url.into(),
            file_kind,
            timestamp,
        }
    }

    /// Last path segment of the remote URL
    pub fn remote_filename(&self) -> &str {
        let path = self
            .remote_url
            .split(['?', '#'])
            .next()
            .unwrap_or(&self.remote_url);
        path.rsplit('/').next().unwrap_or(path)
    }

    /// Local filename without collector prefix: `{token}.{YYYYMMDD}.{HHMM}.{ext}`.
    ///
    /// The token and extension are taken from the remote filename when it follows a
    /// known convention so RouteViews `rib.*.bz2` files keep their names; kind and
    /// timestamp always come from the descriptor itself.
    pub fn local_filename(&self) -> String {
        let (token, extension) = match parser::parse(self.remote_filename()) {
            Ok(parsed) if parsed.kind == self.file_kind => (parsed.token, parsed.extension),
            _ => (
                self.file_kind.canonical_token().to_string(),
                "gz".to_string(),
            ),
        };
        format!(
            "{}.{}.{}",
            token,
            self.timestamp.format("%Y%m%d.%H%M"),
            extension
        )
    }
}

impl PartialEq for FileDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.remote_url == other.remote_url
    }
}

impl Eq for FileDescriptor {}

impl Hash for FileDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.remote_url.hash(state);
    }
}

/// Errors constructing a [`TimeRange`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    /// Start is not strictly before end
    #[error("invalid range: start ({start}) must be before end ({end})")]
    InvalidRange {
        /// Requested start
        start: DateTime<Utc>,
        /// Requested end
        end: DateTime<Utc>,
    },
}

/// Half-open UTC interval `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeRange {
    /// Create a range, failing with [`RangeError::InvalidRange`] unless `start < end`
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, RangeError> {
        if start >= end {
            return Err(RangeError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Inclusive start
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Exclusive end
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Whether `ts` lies in `[start, end)`
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format("%Y-%m-%dT%H:%M:%SZ"),
            self.end.format("%Y-%m-%dT%H:%M:%SZ")
        )
    }
}
