//! Range filtering over collector listings
//!
//! For every selected collector, each month overlapping the requested range is
//! listed (through the cache) and only descriptors inside `[start, end)` are
//! kept. Listing failures are isolated to their collector-month.

use crate::cache::{ListingCache, ListingKey};
use crate::fetcher::{ListingError, ListingFetcher, ListingOrigin};
use crate::registry::CollectorInfo;
use crate::{FileDescriptor, KindFilter, TimeRange};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

mod month;

pub use month::YearMonth;

/// Default number of listing requests in flight
pub const DEFAULT_LISTING_CONCURRENCY: usize = 4;

/// Files selected for a run plus listing statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// In-range descriptors, grouped by collector in input order, ascending by time
    pub descriptors: Vec<FileDescriptor>,
    /// Collector-months requested (excluding months outside a collector's lifetime)
    pub listings_requested: usize,
    /// Collector-months served from the cache
    pub listings_cached: usize,
    /// Collector-months the archive answered 404 for
    pub listings_not_found: usize,
    /// Collector-months skipped after a failed fetch
    pub listings_failed: usize,
    /// Collector-months skipped because the collector was not running
    pub listings_inactive: usize,
}

/// Selects descriptors inside a time range
pub struct RangeFilter<'a> {
    fetcher: &'a ListingFetcher,
    cache: &'a ListingCache,
    concurrency: usize,
    kind_filter: KindFilter,
}

impl<'a> RangeFilter<'a> {
    /// Filter listing through `cache`, fetching misses with `fetcher`
    pub fn new(fetcher: &'a ListingFetcher, cache: &'a ListingCache) -> Self {
        Self {
            fetcher,
            cache,
            concurrency: DEFAULT_LISTING_CONCURRENCY,
            kind_filter: KindFilter::All,
        }
    }

    /// Maximum listing requests in flight (minimum 1)
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Restrict to snapshots or updates
    pub fn with_kind_filter(mut self, kind_filter: KindFilter) -> Self {
        self.kind_filter = kind_filter;
        self
    }

    /// Select every descriptor of `collectors` whose timestamp lies in `range`.
    ///
    /// Never fails: a collector-month that 404s or exhausts its retries
    /// contributes nothing and is counted in the returned statistics.
    pub async fn select(&self, collectors: &[CollectorInfo], range: &TimeRange) -> Selection {
        let months = YearMonth::months_overlapping(range);
        let mut selection = Selection::default();

        let mut jobs = Vec::new();
        for (order, collector) in collectors.iter().enumerate() {
            for &month in &months {
                if collector.is_active_in(month) {
                    jobs.push((order, collector, month));
                } else {
                    debug!(collector = %collector.id, %month, "Collector not active, skipping month");
                    selection.listings_inactive += 1;
                }
            }
        }
        selection.listings_requested = jobs.len();

        let mut results: Vec<_> = stream::iter(jobs)
            .map(|(order, collector, month)| async move {
                let key = ListingKey::new(collector.id.clone(), month)
                    .with_source(self.fetcher.endpoints().base_for(collector.project));
                let result = self
                    .cache
                    .get_or_fetch(&key, || self.fetcher.list(collector, month))
                    .await;
                (order, month, collector, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        results.sort_by_key(|(order, month, _, _)| (*order, *month));

        for (_, month, collector, result) in results {
            match result {
                Ok(listing) => {
                    match listing.origin {
                        ListingOrigin::Cached => selection.listings_cached += 1,
                        ListingOrigin::NotFound => {
                            warn!(collector = %collector.id, %month, "No listing for collector-month, skipping");
                            selection.listings_not_found += 1;
                        }
                        ListingOrigin::Fetched => {}
                    }
                    selection.descriptors.extend(
                        listing
                            .descriptors
                            .into_iter()
                            .filter(|d| range.contains(d.timestamp))
                            .filter(|d| self.kind_filter.accepts(d.file_kind)),
                    );
                }
                Err(ListingError::Cancelled { .. }) => {
                    debug!(collector = %collector.id, %month, "Listing cancelled");
                    selection.listings_failed += 1;
                }
                Err(e) => {
                    warn!(collector = %collector.id, %month, error = %e, "Listing failed, skipping collector-month");
                    selection.listings_failed += 1;
                }
            }
        }

        info!(
            files = selection.descriptors.len(),
            listings = selection.listings_requested,
            cached = selection.listings_cached,
            not_found = selection.listings_not_found,
            failed = selection.listings_failed,
            "Selection complete"
        );
        selection
    }
}
