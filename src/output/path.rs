//! Destination path generation
//!
//! Every strategy embeds the collector, kind token and full timestamp in the
//! path, so a directory listing alone identifies each file and no two distinct
//! descriptors share a destination.
//!
//! | Strategy | Layout |
//! |---|---|
//! | [`PartitionStrategy::Flat`] | `{base}/{collector}-{kind}.{YYYYMMDD}.{HHMM}.{ext}` |
//! | [`PartitionStrategy::ByCollector`] | `{base}/{collector}/{collector}-{kind}.{YYYYMMDD}.{HHMM}.{ext}` |
//! | [`PartitionStrategy::ByDate`] | `{base}/{YYYY}/{MM}/{collector}-{kind}.{YYYYMMDD}.{HHMM}.{ext}` |
//! | [`PartitionStrategy::ByHour`] | `{base}/{YYYY.MM.DD}/{HH}/{collector}-{kind}.{YYYYMMDD}.{HHMM}.{ext}` |
//! | [`PartitionStrategy::CollectorMonth`] | `{base}/{collector}/{YYYY.MM}/{kind}.{YYYYMMDD}.{HHMM}.{ext}` |
//!
//! # Usage Example
//!
//! ```rust
//! use mrt_downloader::output::PartitionStrategy;
//! use mrt_downloader::{FileDescriptor, FileKind};
//! use chrono::{TimeZone, Utc};
//! use std::path::{Path, PathBuf};
//!
//! let d = FileDescriptor::new(
//!     "rrc00",
//!     "https://data.ris.ripe.net/rrc00/2025.01/updates.20250116.0050.gz",
//!     FileKind::Update,
//!     Utc.with_ymd_and_hms(2025, 1, 16, 0, 50, 0).unwrap(),
//! );
//! assert_eq!(
//!     PartitionStrategy::Flat.resolve(Path::new("data"), &d),
//!     PathBuf::from("data/rrc00-updates.20250116.0050.gz"),
//! );
//! ```

use crate::FileDescriptor;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Mapping from descriptor to local path, selected once per run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum PartitionStrategy {
    /// Everything directly under the base directory
    Flat,
    /// One directory per collector
    #[value(name = "collector")]
    ByCollector,
    /// Year and month directories
    #[value(name = "date")]
    ByDate,
    /// Day and hour directories
    #[value(name = "hour")]
    ByHour,
    /// Collector then month directories, mirroring the RIS archive
    #[default]
    CollectorMonth,
}

impl PartitionStrategy {
    /// All strategies
    pub const ALL: [PartitionStrategy; 5] = [
        PartitionStrategy::Flat,
        PartitionStrategy::ByCollector,
        PartitionStrategy::ByDate,
        PartitionStrategy::ByHour,
        PartitionStrategy::CollectorMonth,
    ];

    /// Destination for `descriptor` under `base_dir`
    pub fn resolve(&self, base_dir: &Path, descriptor: &FileDescriptor) -> PathBuf {
        let collector = sanitize_collector(&descriptor.collector_id);
        let local = descriptor.local_filename();
        let prefixed = format!("{collector}-{local}");
        let ts = descriptor.timestamp;

        match self {
            PartitionStrategy::Flat => base_dir.join(prefixed),
            PartitionStrategy::ByCollector => base_dir.join(&collector).join(prefixed),
            PartitionStrategy::ByDate => base_dir
                .join(ts.format("%Y").to_string())
                .join(ts.format("%m").to_string())
                .join(prefixed),
            PartitionStrategy::ByHour => base_dir
                .join(ts.format("%Y.%m.%d").to_string())
                .join(ts.format("%H").to_string())
                .join(prefixed),
            PartitionStrategy::CollectorMonth => base_dir
                .join(&collector)
                .join(ts.format("%Y.%m").to_string())
                .join(local),
        }
    }
}

impl std::fmt::Display for PartitionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PartitionStrategy::Flat => "flat",
            PartitionStrategy::ByCollector => "collector",
            PartitionStrategy::ByDate => "date",
            PartitionStrategy::ByHour => "hour",
            PartitionStrategy::CollectorMonth => "collector-month",
        };
        write!(f, "{s}")
    }
}

impl FromStr for PartitionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "flat" => Ok(PartitionStrategy::Flat),
            "collector" | "by-collector" => Ok(PartitionStrategy::ByCollector),
            "date" | "by-date" => Ok(PartitionStrategy::ByDate),
            "hour" | "by-hour" => Ok(PartitionStrategy::ByHour),
            "collector-month" | "ris" => Ok(PartitionStrategy::CollectorMonth),
            _ => Err(format!(
                "Invalid partitioning: {s}. Expected flat, collector, date, hour or collector-month"
            )),
        }
    }
}

/// Sanitize a collector id for use as a path component
///
/// Prevents path traversal by replacing dangerous characters:
/// - `/`, `\`, `:` → `_` (directory separators)
/// - `..` → `__` (parent directory reference)
///
/// Dots inside ids such as `route-views.sydney` are preserved.
pub fn sanitize_collector(name: &str) -> String {
    let cleaned = name.replace("..", "__").replace(['/', '\\', ':'], "_");
    if cleaned.is_empty() || cleaned == "." {
        "_".to_string()
    } else {
        cleaned
    }
}
