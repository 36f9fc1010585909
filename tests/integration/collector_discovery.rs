//! Collector lists fetched from the project APIs

use crate::support::{FakeTransport, Reply};
use chrono::{Duration, Utc};
use clap::Parser;
use mrt_downloader::cache::ListingCache;
use mrt_downloader::cli::{Cli, Commands};
use mrt_downloader::downloader::RetryPolicy;
use mrt_downloader::registry::discovery::{RIS_COLLECTORS_URL, ROUTEVIEWS_COLLECTORS_URL};
use mrt_downloader::registry::{CollectorDiscovery, CollectorInfo, CollectorRegistry, Project};
use mrt_downloader::selection::YearMonth;
use mrt_downloader::shutdown::ShutdownCoordinator;
use std::sync::Arc;
use tempfile::TempDir;

const RRC00_JAN: &str = "https://data.ris.ripe.net/rrc00/2025.01/";

/// rrc00 retired at the end of 2024, rrc42 is new
const RRC_INFO: &str = r#"{"data": {"rrcs": [
    {"name": "RRC00", "activated_on": "1999-10", "deactivated_on": "2024-12"},
    {"name": "RRC42", "activated_on": "2024-06", "deactivated_on": ""}
]}}"#;

const RV_COLLECTORS: &str = r#"{"results": [
    {"name": "route-views.sydney", "url": "http://archive.routeviews.org/route-views.sydney/bgpdata/",
     "installed": "2015-04-01T00:00:00Z", "removed": null}
]}"#;

fn ym(year: i32, month: u32) -> YearMonth {
    YearMonth::new(year, month).unwrap()
}

fn discovery(transport: &Arc<FakeTransport>) -> CollectorDiscovery {
    CollectorDiscovery::new(transport.clone()).with_retry_policy(RetryPolicy::no_delay())
}

fn ids(registry: &CollectorRegistry, project: Project) -> Vec<String> {
    registry
        .select(&[], &[project])
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect()
}

#[tokio::test]
async fn test_refresh_replaces_embedded_lists() {
    let transport = Arc::new(FakeTransport::new());
    transport.on(RIS_COLLECTORS_URL, Reply::text(RRC_INFO));
    transport.on(ROUTEVIEWS_COLLECTORS_URL, Reply::text(RV_COLLECTORS));
    let cache = ListingCache::in_memory();
    let mut registry = CollectorRegistry::load_embedded().unwrap();

    let refreshed = discovery(&transport).refresh(&mut registry, &cache, &[]).await;

    assert_eq!(refreshed, 2);
    assert_eq!(ids(&registry, Project::Ris), vec!["rrc00", "rrc42"]);
    assert_eq!(ids(&registry, Project::RouteViews), vec!["route-views.sydney"]);
    assert_eq!(registry.get("rrc00").unwrap().removed, Some(ym(2025, 1)));
}

#[tokio::test]
async fn test_fresh_cached_list_skips_the_network() {
    let transport = Arc::new(FakeTransport::new());
    transport.on(RIS_COLLECTORS_URL, Reply::text(RRC_INFO));
    let cache = ListingCache::in_memory();

    for _ in 0..2 {
        let mut registry = CollectorRegistry::load_embedded().unwrap();
        discovery(&transport)
            .refresh(&mut registry, &cache, &[Project::Ris])
            .await;
        assert!(registry.get("rrc42").is_some());
    }

    assert_eq!(transport.calls_to(RIS_COLLECTORS_URL), 1);
    assert_eq!(transport.calls_to(ROUTEVIEWS_COLLECTORS_URL), 0);
}

#[tokio::test]
async fn test_stale_cached_list_is_refetched() {
    let transport = Arc::new(FakeTransport::new());
    transport.on(RIS_COLLECTORS_URL, Reply::text(RRC_INFO));
    let cache = ListingCache::in_memory();
    let stale = vec![CollectorInfo::new("rrc00", Project::Ris, ym(1999, 10))];
    cache.store_collectors(Project::Ris, RIS_COLLECTORS_URL, stale, Utc::now() - Duration::hours(25));
    let mut registry = CollectorRegistry::load_embedded().unwrap();

    discovery(&transport)
        .refresh(&mut registry, &cache, &[Project::Ris])
        .await;

    assert_eq!(transport.calls_to(RIS_COLLECTORS_URL), 1);
    assert!(registry.get("rrc42").is_some());
}

#[tokio::test]
async fn test_failed_discovery_keeps_embedded_list() {
    let transport = Arc::new(FakeTransport::new());
    transport.on(RIS_COLLECTORS_URL, Reply::Status(503));
    transport.on(ROUTEVIEWS_COLLECTORS_URL, Reply::text(r#"{"results": []}"#));
    let cache = ListingCache::in_memory();
    let embedded = CollectorRegistry::load_embedded().unwrap();
    let mut registry = embedded.clone();

    let refreshed = discovery(&transport)
        .with_retry_policy(RetryPolicy::no_delay().with_max_attempts(2))
        .refresh(&mut registry, &cache, &[])
        .await;

    assert_eq!(refreshed, 0);
    assert_eq!(transport.calls_to(RIS_COLLECTORS_URL), 2);
    assert_eq!(ids(&registry, Project::Ris), ids(&embedded, Project::Ris));
    assert_eq!(ids(&registry, Project::RouteViews), ids(&embedded, Project::RouteViews));
    assert_eq!(
        cache.cached_collectors(Project::Ris, RIS_COLLECTORS_URL, Duration::hours(24), Utc::now()),
        None
    );
}

#[tokio::test]
async fn test_download_uses_discovered_lifetimes() {
    let temp_dir = TempDir::new().unwrap();
    let cache_dir = TempDir::new().unwrap();
    let cache_arg = cache_dir.path().join("listings.json").display().to_string();
    let transport = Arc::new(FakeTransport::new());
    transport.on(RIS_COLLECTORS_URL, Reply::text(RRC_INFO));
    transport.listing(RRC00_JAN, &["updates.20250116.0050.gz"]);
    let target = temp_dir.path().display().to_string();
    let cli = Cli::try_parse_from([
        "mrt-downloader",
        "download",
        target.as_str(),
        "2025-01-16",
        "2025-01-16",
        "-c",
        "rrc00",
        "--project",
        "ris",
        "--discover-collectors",
        "--cache-file",
        cache_arg.as_str(),
    ])
    .unwrap();
    let Commands::Download(args) = &cli.command else {
        panic!("expected download command");
    };

    for _ in 0..2 {
        let summary = args
            .execute_with_transport(&cli, ShutdownCoordinator::shared(), transport.clone())
            .await
            .unwrap();
        // Retired before January 2025 according to the API
        assert_eq!(summary.selected, 0);
    }

    assert_eq!(transport.calls_to(RRC00_JAN), 0);
    assert_eq!(transport.calls_to(RIS_COLLECTORS_URL), 1, "second run reads the cached list");
    assert_eq!(transport.calls_to(ROUTEVIEWS_COLLECTORS_URL), 0);
}
