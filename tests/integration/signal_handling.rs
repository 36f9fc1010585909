use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use mrt_downloader::downloader::{DownloadOutcome, DownloadScheduler, DownloadTask, RetryPolicy};
use mrt_downloader::output::PartitionStrategy;
use mrt_downloader::shutdown::ShutdownCoordinator;
use mrt_downloader::{FileDescriptor, FileKind};
use tempfile::TempDir;

use crate::support::{files_under, FakeTransport, Reply};

#[tokio::test]
async fn shutdown_notifies_waiters() {
    let shutdown = ShutdownCoordinator::shared();
    let waiter = {
        let handle = shutdown.clone();
        tokio::spawn(async move {
            handle.wait_for_shutdown().await;
            true
        })
    };

    // Give the task time to start waiting
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.request_shutdown();

    let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
    assert!(result.is_ok());
}

/// A request made before anyone waits must not be missed.
#[tokio::test]
async fn shutdown_requested_before_wait_no_deadlock() {
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();

    let handle = shutdown.clone();
    let waiter = tokio::spawn(async move {
        handle.wait_for_shutdown().await;
        true
    });

    let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
    assert!(result.is_ok(), "wait_for_shutdown() deadlocked despite shutdown already requested");
}

#[tokio::test]
async fn shutdown_concurrent_waiters_all_notified() {
    let shutdown = ShutdownCoordinator::shared();

    let mut waiters = Vec::new();
    for _ in 0..10 {
        let handle = shutdown.clone();
        waiters.push(tokio::spawn(async move {
            handle.wait_for_shutdown().await;
        }));
    }

    tokio::time::sleep(Duration::from_millis(10)).await;
    shutdown.request_shutdown();

    for waiter in waiters {
        let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        assert!(result.is_ok(), "A waiter was not notified of shutdown");
    }
}

fn rrc00_tasks(base: &std::path::Path, count: u32) -> Vec<DownloadTask> {
    (0..count)
        .map(|i| {
            let ts = Utc.with_ymd_and_hms(2025, 1, 16, 0, i * 5, 0).unwrap();
            let d = FileDescriptor::new(
                "rrc00",
                format!(
                    "https://data.ris.ripe.net/rrc00/2025.01/updates.{}.gz",
                    ts.format("%Y%m%d.%H%M")
                ),
                FileKind::Update,
                ts,
            );
            let dest = PartitionStrategy::Flat.resolve(base, &d);
            DownloadTask::new(d, dest)
        })
        .collect()
}

fn scripted(tasks: &[DownloadTask]) -> Arc<FakeTransport> {
    let transport = Arc::new(FakeTransport::new());
    for task in tasks {
        transport.on(&task.descriptor.remote_url, Reply::text("mrt"));
    }
    transport
}

#[tokio::test]
async fn shutdown_before_run_cancels_everything() {
    let temp_dir = TempDir::new().unwrap();
    let tasks = rrc00_tasks(temp_dir.path(), 4);
    let transport = scripted(&tasks);
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();

    let report = DownloadScheduler::new(transport.clone())
        .with_retry_policy(RetryPolicy::no_delay())
        .with_shutdown(shutdown)
        .run(tasks, 2)
        .await;

    assert_eq!(report.summary.cancelled, 4);
    assert!(report
        .reports
        .iter()
        .all(|r| r.outcome == DownloadOutcome::Cancelled && r.worker.is_none()));
    assert_eq!(transport.total_calls(), 0);
    assert!(files_under(temp_dir.path()).is_empty());
}

#[tokio::test]
async fn shutdown_mid_run_finishes_in_flight_file_only() {
    let temp_dir = TempDir::new().unwrap();
    let tasks = rrc00_tasks(temp_dir.path(), 4);
    let transport = scripted(&tasks);
    let shutdown = ShutdownCoordinator::shared();
    transport.shutdown_on_first_download(shutdown.clone());

    let report = DownloadScheduler::new(transport.clone())
        .with_retry_policy(RetryPolicy::no_delay())
        .with_shutdown(shutdown.clone())
        .run(tasks, 1)
        .await;

    assert!(shutdown.is_shutdown_requested());
    assert_eq!(report.reports[0].outcome, DownloadOutcome::Success { bytes: 3 });
    assert!(report.reports[1..]
        .iter()
        .all(|r| r.outcome == DownloadOutcome::Cancelled));
    assert_eq!(report.summary.downloaded, 1);
    assert_eq!(report.summary.cancelled, 3);
    assert_eq!(report.summary.per_worker, vec![1]);
    assert_eq!(transport.total_calls(), 1);
    assert_eq!(
        files_under(temp_dir.path()),
        vec!["rrc00-updates.20250116.0000.gz"]
    );
}

#[tokio::test]
async fn shutdown_during_backoff_abandons_retry() {
    let temp_dir = TempDir::new().unwrap();
    let tasks = rrc00_tasks(temp_dir.path(), 1);
    let url = tasks[0].descriptor.remote_url.clone();
    let transport = Arc::new(FakeTransport::new());
    transport.on(&url, Reply::ResetAfter(b"par".to_vec()));
    let shutdown = ShutdownCoordinator::shared();

    let trigger = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            shutdown.request_shutdown();
        })
    };

    let report = DownloadScheduler::new(transport.clone())
        .with_retry_policy(
            RetryPolicy::no_delay()
                .with_backoff(Duration::from_secs(30), Duration::from_secs(30)),
        )
        .with_shutdown(shutdown)
        .run(tasks, 1)
        .await;
    trigger.await.unwrap();

    assert_eq!(report.reports[0].outcome, DownloadOutcome::Cancelled);
    assert_eq!(transport.calls_to(&url), 1);
    assert!(files_under(temp_dir.path()).is_empty());
}
