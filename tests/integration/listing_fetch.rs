//! Listing fetcher against scripted archive responses

use crate::support::{FakeTransport, Reply};
use mrt_downloader::downloader::RetryPolicy;
use mrt_downloader::fetcher::{ListingError, ListingFetcher, ListingOrigin, TransportError};
use mrt_downloader::registry::{ArchiveEndpoints, CollectorInfo, CollectorRegistry, Project};
use mrt_downloader::selection::YearMonth;
use mrt_downloader::shutdown::ShutdownCoordinator;
use mrt_downloader::FileKind;
use std::sync::Arc;

const SYDNEY_RIBS: &str = "https://archive.routeviews.org/route-views.sydney/bgpdata/2025.07/RIBS/";
const SYDNEY_UPDATES: &str =
    "https://archive.routeviews.org/route-views.sydney/bgpdata/2025.07/UPDATES/";

fn ym(year: i32, month: u32) -> YearMonth {
    YearMonth::new(year, month).unwrap()
}

fn collector(id: &str) -> CollectorInfo {
    CollectorRegistry::load().unwrap().get(id).unwrap().clone()
}

fn fetcher(transport: &Arc<FakeTransport>) -> ListingFetcher {
    ListingFetcher::new(transport.clone()).with_retry_policy(RetryPolicy::no_delay())
}

#[tokio::test]
async fn test_routeviews_merges_sub_listings() {
    let transport = Arc::new(FakeTransport::new());
    transport.listing(SYDNEY_RIBS, &["rib.20250714.2200.bz2"]);
    transport.listing(
        SYDNEY_UPDATES,
        &["updates.20250714.2145.bz2", "updates.20250714.2200.bz2"],
    );

    let listing = fetcher(&transport)
        .list(&collector("route-views.sydney"), ym(2025, 7))
        .await
        .unwrap();

    assert_eq!(listing.origin, ListingOrigin::Fetched);
    assert_eq!(listing.descriptors.len(), 3);
    assert_eq!(listing.descriptors[0].file_kind, FileKind::Update);
    assert_eq!(
        listing.descriptors[1].remote_url,
        "https://archive.routeviews.org/route-views.sydney/bgpdata/2025.07/RIBS/rib.20250714.2200.bz2"
    );
    // Same timestamp: ordered by URL
    assert_eq!(listing.descriptors[2].file_kind, FileKind::Update);
    assert!(listing
        .descriptors
        .iter()
        .all(|d| d.collector_id == "route-views.sydney"));
}

#[tokio::test]
async fn test_routeviews_one_sub_listing_missing() {
    let transport = Arc::new(FakeTransport::new());
    transport.listing(SYDNEY_UPDATES, &["updates.20250714.2145.bz2"]);

    let listing = fetcher(&transport)
        .list(&collector("route-views.sydney"), ym(2025, 7))
        .await
        .unwrap();

    assert_eq!(listing.origin, ListingOrigin::Fetched);
    assert_eq!(listing.descriptors.len(), 1);
}

#[tokio::test]
async fn test_route_views2_lives_at_archive_root() {
    let transport = Arc::new(FakeTransport::new());
    transport.listing(
        "https://archive.routeviews.org/bgpdata/2025.07/UPDATES/",
        &["updates.20250714.2145.bz2"],
    );

    let listing = fetcher(&transport)
        .list(&collector("route-views2"), ym(2025, 7))
        .await
        .unwrap();

    assert_eq!(listing.descriptors.len(), 1);
    assert_eq!(listing.descriptors[0].collector_id, "route-views2");
}

#[tokio::test]
async fn test_json_index_body() {
    let transport = Arc::new(FakeTransport::new());
    transport.on(
        "https://data.ris.ripe.net/rrc00/2025.01/",
        Reply::text(
            r#"[
                {"name": "bview.20250116.0000.gz", "type": "file"},
                {"name": "old", "type": "directory"},
                {"name": "updates.20250116.0005.gz", "type": "file"}
            ]"#,
        ),
    );

    let listing = fetcher(&transport)
        .list(&collector("rrc00"), ym(2025, 1))
        .await
        .unwrap();

    assert_eq!(listing.descriptors.len(), 2);
    assert_eq!(listing.descriptors[0].file_kind, FileKind::Snapshot);
}

#[tokio::test]
async fn test_all_not_found() {
    let transport = Arc::new(FakeTransport::new());

    let listing = fetcher(&transport)
        .list(&collector("route-views.sydney"), ym(2025, 7))
        .await
        .unwrap();

    assert_eq!(listing.origin, ListingOrigin::NotFound);
    assert!(listing.descriptors.is_empty());
    assert_eq!(transport.total_calls(), 2);
}

#[tokio::test]
async fn test_server_error_is_retried() {
    let url = "https://data.ris.ripe.net/rrc00/2025.01/";
    let transport = Arc::new(FakeTransport::new());
    transport
        .on(url, Reply::Status(502))
        .on(url, Reply::Error(TransportError::Timeout("read".into())))
        .on(url, Reply::text(r#"<a href="updates.20250116.0005.gz">u</a>"#));

    let listing = fetcher(&transport)
        .list(&collector("rrc00"), ym(2025, 1))
        .await
        .unwrap();

    assert_eq!(listing.descriptors.len(), 1);
    assert_eq!(transport.calls_to(url), 3);
}

#[tokio::test]
async fn test_exhausted_retries_report_attempts() {
    let url = "https://data.ris.ripe.net/rrc00/2025.01/";
    let transport = Arc::new(FakeTransport::new());
    transport.on(url, Reply::Status(500));

    let result = ListingFetcher::new(transport.clone())
        .with_retry_policy(RetryPolicy::no_delay().with_max_attempts(4))
        .list(&collector("rrc00"), ym(2025, 1))
        .await;

    match result {
        Err(ListingError::FetchFailed { attempts, reason, .. }) => {
            assert_eq!(attempts, 4);
            assert!(reason.contains("500"));
        }
        other => panic!("expected FetchFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_forbidden_is_not_retried() {
    let url = "https://data.ris.ripe.net/rrc00/2025.01/";
    let transport = Arc::new(FakeTransport::new());
    transport.on(url, Reply::Status(403));

    let result = fetcher(&transport)
        .list(&collector("rrc00"), ym(2025, 1))
        .await;

    assert!(matches!(
        result,
        Err(ListingError::FetchFailed { attempts: 1, .. })
    ));
    assert_eq!(transport.calls_to(url), 1);
}

#[tokio::test]
async fn test_shutdown_cancels_listing() {
    let transport = Arc::new(FakeTransport::new());
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();

    let result = fetcher(&transport)
        .with_shutdown(shutdown)
        .list(&collector("rrc00"), ym(2025, 1))
        .await;

    assert!(matches!(result, Err(ListingError::Cancelled { .. })));
    assert_eq!(transport.total_calls(), 0);
}

#[tokio::test]
async fn test_mirror_endpoints() {
    let transport = Arc::new(FakeTransport::new());
    transport.listing(
        "http://mirror.example/rrc00/2025.01/",
        &["updates.20250116.0005.gz"],
    );

    let listing = fetcher(&transport)
        .with_endpoints(ArchiveEndpoints::single_host("http://mirror.example"))
        .list(&CollectorInfo::new("rrc00", Project::Ris, ym(1999, 10)), ym(2025, 1))
        .await
        .unwrap();

    assert_eq!(
        listing.descriptors[0].remote_url,
        "http://mirror.example/rrc00/2025.01/updates.20250116.0005.gz"
    );
}
