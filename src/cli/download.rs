//! Download command implementation

use crate::cache::{default_cache_path, CachePolicy, ListingCache};
use crate::downloader::config::{
    DEFAULT_WORKERS, DOWNLOAD_TIMEOUT_SECS, LISTING_TIMEOUT_SECS, MAX_ATTEMPTS, MAX_WORKERS,
};
use crate::downloader::{DownloadScheduler, DownloadTask, RetryPolicy, RunSummary};
use crate::fetcher::http::HttpTransport;
use crate::fetcher::{ListingFetcher, Transport};
use crate::output::PartitionStrategy;
use crate::registry::{ArchiveEndpoints, CollectorDiscovery, CollectorRegistry, Project};
use crate::selection::{RangeFilter, Selection};
use crate::shutdown::SharedShutdown;
use crate::{KindFilter, TimeRange};
use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, Utc};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::CliError;

/// Exit code when `--strict` is set and some files failed
pub const EXIT_STRICT_FAILURE: i32 = 2;

/// Exit code after Ctrl+C
pub const EXIT_INTERRUPTED: i32 = 130;

/// Naive date-time layouts accepted in addition to RFC 3339, read as UTC
const NAIVE_FORMATS: [&str; 6] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y%m%d.%H%M",
    "%Y%m%dT%H%M",
];

/// Parse an RFC 3339 timestamp or a naive date-time (assumed UTC)
fn try_parse_datetime(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn parse_date(input: &str, what: &str) -> Result<NaiveDate, CliError> {
    NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d").map_err(|e| {
        CliError::InvalidArgument(format!(
            "Invalid {what} '{input}': {e} (expected YYYY-MM-DD or YYYY-MM-DDTHH:MM[:SS][Z|±HH:MM])"
        ))
    })
}

/// Parse a start time from YYYY-MM-DD or a date-time.
///
/// For date-only format, uses start-of-day (00:00 UTC).
pub fn parse_start_time_flexible(input: &str) -> Result<DateTime<Utc>, CliError> {
    if let Some(ts) = try_parse_datetime(input) {
        return Ok(ts);
    }
    midnight(parse_date(input, "start time")?, input)
}

/// Parse an end time from YYYY-MM-DD or a date-time.
///
/// For date-only format, the range ends at the following midnight so the
/// given date is fully included. Date-times are used as given (exclusive).
pub fn parse_end_time_flexible(input: &str) -> Result<DateTime<Utc>, CliError> {
    if let Some(ts) = try_parse_datetime(input) {
        return Ok(ts);
    }
    let date = parse_date(input, "end time")?;
    let next = date
        .checked_add_days(Days::new(1))
        .ok_or_else(|| CliError::InvalidArgument(format!("End date out of range: {input}")))?;
    midnight(next, input)
}

fn midnight(date: NaiveDate, input: &str) -> Result<DateTime<Utc>, CliError> {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .ok_or_else(|| CliError::InvalidArgument(format!("Invalid date: {input}")))
}

/// Parse and validate worker count
fn parse_workers(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("worker count must be at least 1".to_string());
    }
    if value > MAX_WORKERS {
        return Err(format!(
            "worker count {value} exceeds maximum of {MAX_WORKERS}"
        ));
    }
    Ok(value)
}

/// MRT dump downloader CLI
#[derive(Parser, Debug)]
#[command(name = "mrt-downloader")]
#[command(about = "Download MRT routing dumps from RIPE RIS and RouteViews", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (json or human)
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Human)]
    pub output_format: OutputFormat,

    /// Listing cache file (default: <user cache dir>/mrt-downloader/listings.json)
    #[arg(long, global = true)]
    pub cache_file: Option<PathBuf>,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9100)
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download dumps in a time range
    Download(DownloadArgs),

    /// List known collectors
    Collectors(super::CollectorsCommand),

    /// Inspect or clear the listing cache
    Cache(super::CacheCommand),
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

/// Download command arguments
#[derive(Parser, Debug)]
pub struct DownloadArgs {
    /// Directory downloaded files are placed under
    pub target_dir: PathBuf,

    /// Range start, inclusive (YYYY-MM-DD or YYYY-MM-DDTHH:MM[:SS], UTC unless an offset is given)
    pub start: String,

    /// Range end, exclusive (a bare date includes that whole day)
    pub end: String,

    /// Create the target directory if it does not exist
    #[arg(long, default_value_t = false)]
    pub create_target: bool,

    /// Collector id or wildcard pattern (repeatable, e.g. -c rrc00 -c 'route-views.*')
    #[arg(short, long = "collector")]
    pub collectors: Vec<String>,

    /// Restrict to a project: ris or routeviews (repeatable)
    #[arg(long = "project")]
    pub projects: Vec<Project>,

    /// Only RIB snapshots (bview / rib files)
    #[arg(long, default_value_t = false, conflicts_with = "update_only")]
    pub rib_only: bool,

    /// Only update files
    #[arg(long, default_value_t = false)]
    pub update_only: bool,

    /// Local layout
    #[arg(long, value_enum, default_value_t = PartitionStrategy::CollectorMonth)]
    pub partitioning: PartitionStrategy,

    /// Concurrent downloads (max 32)
    #[arg(short = 'n', long, default_value_t = DEFAULT_WORKERS, value_parser = parse_workers)]
    pub num_workers: usize,

    /// Attempts per listing or file before giving up (1-20)
    #[arg(long, default_value_t = MAX_ATTEMPTS, value_parser = clap::value_parser!(u32).range(1..=20))]
    pub max_attempts: u32,

    /// Do not read or write the listing cache file
    #[arg(long, default_value_t = false)]
    pub no_cache: bool,

    /// Refetch every listing, overwriting cached entries
    #[arg(long, default_value_t = false)]
    pub refresh_cache: bool,

    /// Also cache listings of the current and just-ended month
    #[arg(long, default_value_t = false)]
    pub cache_current_month: bool,

    /// Exit with status 2 if any file failed
    #[arg(long, default_value_t = false)]
    pub strict: bool,

    /// Refresh the collector list from the project APIs (cached for 24 hours)
    #[arg(long, default_value_t = false)]
    pub discover_collectors: bool,

    /// RIS archive base URL (mirrors, testing)
    #[arg(long, hide = true)]
    pub ris_url: Option<String>,

    /// RouteViews archive base URL (mirrors, testing)
    #[arg(long, hide = true)]
    pub routeviews_url: Option<String>,

    /// Timeout per listing request, seconds
    #[arg(long, default_value_t = LISTING_TIMEOUT_SECS)]
    pub listing_timeout: u64,

    /// Timeout per file download, seconds
    #[arg(long, default_value_t = DOWNLOAD_TIMEOUT_SECS)]
    pub download_timeout: u64,
}

impl DownloadArgs {
    /// Parsed `[start, end)`
    pub fn time_range(&self) -> Result<TimeRange, CliError> {
        let start = parse_start_time_flexible(&self.start)?;
        let end = parse_end_time_flexible(&self.end)?;
        Ok(TimeRange::new(start, end)?)
    }

    /// Kind filter from `--rib-only` / `--update-only`
    pub fn kind_filter(&self) -> KindFilter {
        match (self.rib_only, self.update_only) {
            (true, _) => KindFilter::SnapshotsOnly,
            (_, true) => KindFilter::UpdatesOnly,
            _ => KindFilter::All,
        }
    }

    fn cache_policy(&self) -> CachePolicy {
        CachePolicy {
            refresh_current_month: !self.cache_current_month,
            ..CachePolicy::default()
        }
    }

    fn endpoints(&self, registry: &CollectorRegistry) -> ArchiveEndpoints {
        let mut endpoints = registry.endpoints().clone();
        if let Some(url) = &self.ris_url {
            endpoints.ris_base = ArchiveEndpoints::single_host(url).ris_base;
        }
        if let Some(url) = &self.routeviews_url {
            endpoints.routeviews_base = ArchiveEndpoints::single_host(url).routeviews_base;
        }
        endpoints
    }

    async fn open_cache(&self, cache_file: Option<&Path>) -> ListingCache {
        let cache = if self.no_cache {
            ListingCache::in_memory()
        } else {
            match cache_file.map(Path::to_path_buf).or_else(default_cache_path) {
                Some(path) => ListingCache::open_async(path).await,
                None => {
                    warn!("No user cache directory available, listing cache kept in memory");
                    ListingCache::in_memory()
                }
            }
        };
        cache
            .with_policy(self.cache_policy())
            .with_force_refresh(self.refresh_cache)
    }

    /// Execute the download command over the public archives
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<RunSummary, CliError> {
        let transport = HttpTransport::new()?.with_timeouts(
            Duration::from_secs(self.listing_timeout),
            Duration::from_secs(self.download_timeout),
        );
        self.execute_with_transport(cli, shutdown, Arc::new(transport))
            .await
    }

    /// Execute the download command over `transport`
    pub async fn execute_with_transport(
        &self,
        cli: &Cli,
        shutdown: SharedShutdown,
        transport: Arc<dyn Transport>,
    ) -> Result<RunSummary, CliError> {
        // Argument errors surface before any network activity
        let range = self.time_range()?;
        prepare_target_dir(&self.target_dir, self.create_target)?;

        let mut registry = CollectorRegistry::load()
            .map_err(|e| CliError::ConfigurationError(e.to_string()))?
            .clone();
        let policy = RetryPolicy::new().with_max_attempts(self.max_attempts);
        let cache = self.open_cache(cli.cache_file.as_deref()).await;
        if self.discover_collectors {
            CollectorDiscovery::new(transport.clone())
                .with_retry_policy(policy.clone())
                .with_shutdown(shutdown.clone())
                .refresh(&mut registry, &cache, &self.projects)
                .await;
        }
        let collectors = registry.select(&self.collectors, &self.projects)?;

        info!(
            collectors = collectors.len(),
            start = %range.start(),
            end = %range.end(),
            target = %self.target_dir.display(),
            partitioning = %self.partitioning,
            "Starting MRT download"
        );

        let fetcher = ListingFetcher::new(transport.clone())
            .with_endpoints(self.endpoints(&registry))
            .with_retry_policy(policy.clone())
            .with_shutdown(shutdown.clone());

        let selection = RangeFilter::new(&fetcher, &cache)
            .with_kind_filter(self.kind_filter())
            .select(&collectors, &range)
            .await;

        if let Err(e) = cache.flush_async().await {
            warn!(error = %e, "Failed to save listing cache");
        }

        let tasks: Vec<DownloadTask> = selection
            .descriptors
            .iter()
            .map(|d| DownloadTask::new(d.clone(), self.partitioning.resolve(&self.target_dir, d)))
            .collect();

        if tasks.is_empty() {
            info!("No files in the requested range");
        }

        let mut scheduler = DownloadScheduler::new(transport)
            .with_retry_policy(policy)
            .with_shutdown(shutdown.clone());
        if cli.output_format == OutputFormat::Human && !tasks.is_empty() {
            scheduler = scheduler.with_progress_bar(create_progress_bar(tasks.len() as u64));
        }

        let report = scheduler.run(tasks, self.num_workers).await;
        let interrupted = shutdown.is_shutdown_requested();

        match cli.output_format {
            OutputFormat::Json => output_json(self, &range, &selection, &report.summary, interrupted)?,
            OutputFormat::Human => output_human(self, &range, &selection, &report.summary, interrupted),
        }

        Ok(report.summary)
    }
}

/// Process exit code for a finished run
pub fn exit_code(summary: &RunSummary, strict: bool, interrupted: bool) -> i32 {
    if interrupted {
        EXIT_INTERRUPTED
    } else if strict && summary.failed > 0 {
        EXIT_STRICT_FAILURE
    } else {
        0
    }
}

/// Ensure `dir` is a directory, creating it when allowed
fn prepare_target_dir(dir: &Path, create: bool) -> Result<(), CliError> {
    if dir.is_dir() {
        return Ok(());
    }
    if dir.exists() {
        return Err(CliError::InvalidArgument(format!(
            "Target {} is not a directory",
            dir.display()
        )));
    }
    if !create {
        return Err(CliError::InvalidArgument(format!(
            "Target directory {} does not exist (use --create-target)",
            dir.display()
        )));
    }
    std::fs::create_dir_all(dir).map_err(|e| {
        CliError::InvalidArgument(format!("Failed to create {}: {e}", dir.display()))
    })?;
    info!(path = %dir.display(), "Created target directory");
    Ok(())
}

// ─── Output ──────────────────────────────────────────────────────────────────

/// Output result as one JSON object
fn output_json(
    args: &DownloadArgs,
    range: &TimeRange,
    selection: &Selection,
    summary: &RunSummary,
    interrupted: bool,
) -> Result<(), CliError> {
    let output = serde_json::json!({
        "success": summary.failed == 0 && !interrupted,
        "interrupted": interrupted,
        "target_dir": args.target_dir.display().to_string(),
        "start": range.start().to_rfc3339(),
        "end": range.end().to_rfc3339(),
        "partitioning": args.partitioning.to_string(),
        "listings": {
            "requested": selection.listings_requested,
            "cached": selection.listings_cached,
            "not_found": selection.listings_not_found,
            "failed": selection.listings_failed,
        },
        "summary": summary,
    });
    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}

/// Output result in human-readable format
fn output_human(
    args: &DownloadArgs,
    range: &TimeRange,
    selection: &Selection,
    summary: &RunSummary,
    interrupted: bool,
) {
    if interrupted {
        println!("\nDownload interrupted");
    } else {
        println!("\nDownload completed");
    }
    println!("Range: {range}");
    println!("Target: {} ({})", args.target_dir.display(), args.partitioning);
    println!(
        "Listings: {} requested, {} cached, {} not found, {} failed",
        selection.listings_requested,
        selection.listings_cached,
        selection.listings_not_found,
        selection.listings_failed
    );
    println!("Files: {summary}");
    if summary.per_worker.iter().any(|&n| n > 0) {
        let per_worker: Vec<String> = summary
            .per_worker
            .iter()
            .enumerate()
            .map(|(w, n)| format!("#{w}={n}"))
            .collect();
        println!("Per worker: {}", per_worker.join(" "));
    }
    for failure in &summary.failures {
        eprintln!("  FAILED {}: {}", failure.url, failure.reason);
    }
}

// ─── Progress bar ────────────────────────────────────────────────────────────

/// Create progress bar with style
fn create_progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files ({percent}%) {msg}")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_message("Downloading");
    pb
}
