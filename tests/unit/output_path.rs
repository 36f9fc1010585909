use chrono::{Duration, TimeZone, Utc};
use mrt_downloader::output::PartitionStrategy;
use mrt_downloader::{parse, FileDescriptor, FileKind};
use proptest::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

fn descriptor(collector: &str, kind: FileKind, minutes: i64) -> FileDescriptor {
    let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes);
    let name = match (collector.starts_with("rrc"), kind) {
        (true, FileKind::Snapshot) => format!("bview.{}.gz", ts.format("%Y%m%d.%H%M")),
        (true, FileKind::Update) => format!("updates.{}.gz", ts.format("%Y%m%d.%H%M")),
        (false, FileKind::Snapshot) => format!("rib.{}.bz2", ts.format("%Y%m%d.%H%M")),
        (false, FileKind::Update) => format!("updates.{}.bz2", ts.format("%Y%m%d.%H%M")),
    };
    FileDescriptor::new(
        collector,
        format!("https://archive.example/{collector}/{}/{name}", ts.format("%Y.%m")),
        kind,
        ts,
    )
}

#[test]
fn test_routeviews_keeps_rib_name() {
    let d = descriptor("route-views.sydney", FileKind::Snapshot, 22 * 60);

    assert_eq!(
        PartitionStrategy::CollectorMonth.resolve(Path::new("data"), &d),
        PathBuf::from("data/route-views.sydney/2024.01/rib.20240101.2200.bz2")
    );
    assert_eq!(
        PartitionStrategy::ByDate.resolve(Path::new("data"), &d),
        PathBuf::from("data/2024/01/route-views.sydney-rib.20240101.2200.bz2")
    );
}

#[test]
fn test_unconventional_remote_name_uses_canonical_token() {
    let d = FileDescriptor::new(
        "rrc00",
        "https://archive.example/rrc00/latest-bview.gz",
        FileKind::Snapshot,
        Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap(),
    );

    assert_eq!(
        PartitionStrategy::Flat.resolve(Path::new("out"), &d),
        PathBuf::from("out/rrc00-bview.20240101.0800.gz")
    );
}

#[test]
fn test_same_minute_different_kind_and_collector() {
    let all = [
        descriptor("rrc00", FileKind::Snapshot, 0),
        descriptor("rrc00", FileKind::Update, 0),
        descriptor("rrc01", FileKind::Update, 0),
        descriptor("route-views2", FileKind::Update, 0),
    ];

    for strategy in PartitionStrategy::ALL {
        let paths: HashSet<PathBuf> = all
            .iter()
            .map(|d| strategy.resolve(Path::new("data"), d))
            .collect();
        assert_eq!(paths.len(), all.len(), "{strategy} collides");
    }
}

fn arb_descriptor() -> impl Strategy<Value = FileDescriptor> {
    (
        prop::sample::select(vec!["rrc00", "rrc01", "rrc25", "route-views2", "route-views.sydney"]),
        prop::bool::ANY,
        0i64..(60 * 24 * 400),
    )
        .prop_map(|(collector, snapshot, minutes)| {
            let kind = if snapshot {
                FileKind::Snapshot
            } else {
                FileKind::Update
            };
            descriptor(collector, kind, minutes)
        })
}

proptest! {
    #[test]
    fn prop_distinct_descriptors_get_distinct_paths(
        descriptors in prop::collection::vec(arb_descriptor(), 1..40),
        strategy in prop::sample::select(PartitionStrategy::ALL.to_vec()),
    ) {
        let unique: HashSet<&FileDescriptor> = descriptors.iter().collect();
        let paths: HashSet<PathBuf> = unique
            .iter()
            .map(|d| strategy.resolve(Path::new("data"), d))
            .collect();
        prop_assert_eq!(paths.len(), unique.len());
    }

    #[test]
    fn prop_resolved_name_parses_back(
        d in arb_descriptor(),
        strategy in prop::sample::select(PartitionStrategy::ALL.to_vec()),
    ) {
        let path = strategy.resolve(Path::new("data"), &d);
        let parsed = parse(&path.to_string_lossy()).unwrap();

        prop_assert_eq!(parsed.kind, d.file_kind);
        prop_assert_eq!(parsed.timestamp, d.timestamp);
        if let Some(collector) = parsed.collector {
            prop_assert_eq!(collector, d.collector_id.clone());
        }
    }
}
