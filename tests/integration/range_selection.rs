//! Range filter over scripted collector listings

use crate::support::{FakeTransport, Reply};
use chrono::{DateTime, Duration, TimeZone, Utc};
use mrt_downloader::cache::ListingCache;
use mrt_downloader::downloader::RetryPolicy;
use mrt_downloader::fetcher::ListingFetcher;
use mrt_downloader::registry::{CollectorInfo, Project};
use mrt_downloader::selection::{RangeFilter, YearMonth};
use mrt_downloader::{FileKind, KindFilter, TimeRange};
use proptest::prelude::*;
use std::sync::Arc;

const RRC00_JAN: &str = "https://data.ris.ripe.net/rrc00/2025.01/";
const RRC00_FEB: &str = "https://data.ris.ripe.net/rrc00/2025.02/";

fn ym(year: i32, month: u32) -> YearMonth {
    YearMonth::new(year, month).unwrap()
}

fn ris(id: &str) -> CollectorInfo {
    CollectorInfo::new(id, Project::Ris, ym(1999, 1))
}

fn utc(d: u32, h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, d, h, m, 0).unwrap()
}

fn fetcher(transport: &Arc<FakeTransport>) -> ListingFetcher {
    ListingFetcher::new(transport.clone()).with_retry_policy(RetryPolicy::no_delay())
}

#[tokio::test]
async fn test_boundary_is_half_open() {
    let transport = Arc::new(FakeTransport::new());
    transport.listing(
        RRC00_JAN,
        &[
            "bview.20250116.0000.gz",
            "updates.20250116.0045.gz",
            "updates.20250116.0050.gz",
            "updates.20250116.0055.gz",
            "updates.20250116.0100.gz",
        ],
    );
    let fetcher = fetcher(&transport);
    let cache = ListingCache::in_memory();
    let range = TimeRange::new(utc(16, 0, 50), utc(16, 1, 0)).unwrap();

    let selection = RangeFilter::new(&fetcher, &cache)
        .select(&[ris("rrc00")], &range)
        .await;

    let names: Vec<&str> = selection
        .descriptors
        .iter()
        .map(|d| d.remote_filename())
        .collect();
    assert_eq!(names, vec!["updates.20250116.0050.gz", "updates.20250116.0055.gz"]);
    assert_eq!(selection.listings_requested, 1);
    assert_eq!(transport.total_calls(), 1);
}

#[tokio::test]
async fn test_missing_collector_month_is_skipped() {
    let transport = Arc::new(FakeTransport::new());
    transport.listing(RRC00_JAN, &["updates.20250116.0050.gz"]);
    // rrc27 has no script and answers 404
    let fetcher = fetcher(&transport);
    let cache = ListingCache::in_memory();
    let range = TimeRange::new(utc(16, 0, 0), utc(17, 0, 0)).unwrap();

    let selection = RangeFilter::new(&fetcher, &cache)
        .select(&[ris("rrc27"), ris("rrc00")], &range)
        .await;

    assert_eq!(selection.descriptors.len(), 1);
    assert_eq!(selection.descriptors[0].collector_id, "rrc00");
    assert_eq!(selection.listings_not_found, 1);
    assert_eq!(selection.listings_failed, 0);
    assert_eq!(
        transport.calls_to("https://data.ris.ripe.net/rrc27/2025.01/"),
        1,
        "404 is not retried"
    );
}

#[tokio::test]
async fn test_all_listings_failing_yields_empty_selection() {
    let transport = Arc::new(FakeTransport::new());
    transport.on(RRC00_JAN, Reply::Status(503));
    let fetcher = ListingFetcher::new(transport.clone())
        .with_retry_policy(RetryPolicy::no_delay().with_max_attempts(3));
    let cache = ListingCache::in_memory();
    let range = TimeRange::new(utc(16, 0, 0), utc(17, 0, 0)).unwrap();

    let selection = RangeFilter::new(&fetcher, &cache)
        .select(&[ris("rrc00"), ris("rrc27")], &range)
        .await;

    assert!(selection.descriptors.is_empty());
    assert_eq!(selection.listings_failed, 1);
    assert_eq!(selection.listings_not_found, 1);
    assert_eq!(transport.calls_to(RRC00_JAN), 3);
}

#[tokio::test]
async fn test_range_spanning_months_lists_both() {
    let transport = Arc::new(FakeTransport::new());
    transport.listing(RRC00_JAN, &["updates.20250131.2350.gz", "updates.20250131.2355.gz"]);
    transport.listing(RRC00_FEB, &["updates.20250201.0000.gz", "updates.20250201.0005.gz"]);
    let fetcher = fetcher(&transport);
    let cache = ListingCache::in_memory();
    let range = TimeRange::new(
        Utc.with_ymd_and_hms(2025, 1, 31, 23, 55, 0).unwrap(),
        Utc.with_ymd_and_hms(2025, 2, 1, 0, 5, 0).unwrap(),
    )
    .unwrap();

    let selection = RangeFilter::new(&fetcher, &cache)
        .select(&[ris("rrc00")], &range)
        .await;

    let names: Vec<&str> = selection
        .descriptors
        .iter()
        .map(|d| d.remote_filename())
        .collect();
    assert_eq!(names, vec!["updates.20250131.2355.gz", "updates.20250201.0000.gz"]);
    assert_eq!(selection.listings_requested, 2);
}

#[tokio::test]
async fn test_kind_filter() {
    let transport = Arc::new(FakeTransport::new());
    transport.listing(
        RRC00_JAN,
        &["bview.20250116.0800.gz", "updates.20250116.0800.gz"],
    );
    let fetcher = fetcher(&transport);
    let cache = ListingCache::in_memory();
    let range = TimeRange::new(utc(16, 0, 0), utc(17, 0, 0)).unwrap();

    let ribs = RangeFilter::new(&fetcher, &cache)
        .with_kind_filter(KindFilter::SnapshotsOnly)
        .select(&[ris("rrc00")], &range)
        .await;
    assert_eq!(ribs.descriptors.len(), 1);
    assert_eq!(ribs.descriptors[0].file_kind, FileKind::Snapshot);

    // Second pass is served from the session cache
    let updates = RangeFilter::new(&fetcher, &cache)
        .with_kind_filter(KindFilter::UpdatesOnly)
        .select(&[ris("rrc00")], &range)
        .await;
    assert_eq!(updates.descriptors.len(), 1);
    assert_eq!(updates.descriptors[0].file_kind, FileKind::Update);
    assert_eq!(updates.listings_cached, 1);
    assert_eq!(transport.total_calls(), 1);
}

#[tokio::test]
async fn test_inactive_months_are_not_requested() {
    let transport = Arc::new(FakeTransport::new());
    let fetcher = fetcher(&transport);
    let cache = ListingCache::in_memory();
    let mut retired = ris("rrc02");
    retired.removed = Some(ym(2008, 11));
    let range = TimeRange::new(utc(16, 0, 0), utc(17, 0, 0)).unwrap();

    let selection = RangeFilter::new(&fetcher, &cache)
        .select(&[retired], &range)
        .await;

    assert!(selection.descriptors.is_empty());
    assert_eq!(selection.listings_inactive, 1);
    assert_eq!(selection.listings_requested, 0);
    assert_eq!(transport.total_calls(), 0);
}

#[tokio::test]
async fn test_collectors_keep_input_order() {
    let transport = Arc::new(FakeTransport::new());
    transport.listing(RRC00_JAN, &["updates.20250116.0010.gz"]);
    transport.listing(
        "https://data.ris.ripe.net/rrc01/2025.01/",
        &["updates.20250116.0005.gz"],
    );
    let fetcher = fetcher(&transport);
    let cache = ListingCache::in_memory();
    let range = TimeRange::new(utc(16, 0, 0), utc(17, 0, 0)).unwrap();

    let selection = RangeFilter::new(&fetcher, &cache)
        .with_concurrency(2)
        .select(&[ris("rrc01"), ris("rrc00")], &range)
        .await;

    let collectors: Vec<&str> = selection
        .descriptors
        .iter()
        .map(|d| d.collector_id.as_str())
        .collect();
    assert_eq!(collectors, vec!["rrc01", "rrc00"]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_selection_stays_inside_range(start_min in 0i64..1440, len_min in 1i64..1440) {
        // One update file every five minutes on 2025-01-16
        let names: Vec<String> = (0..288)
            .map(|i| {
                let ts = utc(16, 0, 0) + Duration::minutes(i * 5);
                format!("updates.{}.gz", ts.format("%Y%m%d.%H%M"))
            })
            .collect();
        let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();

        let start = utc(16, 0, 0) + Duration::minutes(start_min);
        let end = start + Duration::minutes(len_min);
        let range = TimeRange::new(start, end).unwrap();

        let selection = tokio_test::block_on(async {
            let transport = Arc::new(FakeTransport::new());
            transport.listing(RRC00_JAN, &name_refs);
            transport.listing(RRC00_FEB, &[]);
            let fetcher = fetcher(&transport);
            let cache = ListingCache::in_memory();
            RangeFilter::new(&fetcher, &cache)
                .select(&[ris("rrc00")], &range)
                .await
        });

        for d in &selection.descriptors {
            prop_assert!(start <= d.timestamp && d.timestamp < end);
        }
        let expected = (0..288i64)
            .map(|i| utc(16, 0, 0) + Duration::minutes(i * 5))
            .filter(|ts| start <= *ts && *ts < end)
            .count();
        prop_assert_eq!(selection.descriptors.len(), expected);
    }
}
