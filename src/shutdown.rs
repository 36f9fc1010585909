//! Graceful shutdown coordination utilities.
//!
//! A [`ShutdownCoordinator`] is shared by the listing fetchers and download
//! workers. Once shutdown is requested no new listing request or download task
//! is started; attempts already in flight run to completion or failure and
//! their temporary files are cleaned up as usual. A second Ctrl+C exits at once.

use futures::{Stream, StreamExt};
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::warn;

/// Shared handle to a shutdown coordinator.
pub type SharedShutdown = Arc<ShutdownCoordinator>;

static GLOBAL_SHUTDOWN: OnceCell<SharedShutdown> = OnceCell::new();

/// Register a global shutdown handle so subsystems can discover it lazily.
pub fn set_global_shutdown(handle: SharedShutdown) {
    let _ = GLOBAL_SHUTDOWN.set(handle);
}

/// Retrieve the registered global shutdown handle, if available.
pub fn get_global_shutdown() -> Option<SharedShutdown> {
    GLOBAL_SHUTDOWN.get().cloned()
}

/// Spawn a task that requests shutdown on the first Ctrl+C and exits the
/// process with status 130 on the second.
pub fn install_ctrl_c_handler(handle: SharedShutdown) {
    tokio::spawn(async move {
        let interrupts = futures::stream::unfold((), |()| async {
            tokio::signal::ctrl_c().await.ok().map(|_| ((), ()))
        });
        if watch_interrupts(handle, interrupts).await {
            std::process::exit(crate::cli::download::EXIT_INTERRUPTED);
        }
    });
}

/// Act on a stream of interrupts.
///
/// The first interrupt requests graceful shutdown. Returns `true` when a second
/// one arrives and the caller should exit immediately, `false` if the stream
/// ends first.
pub async fn watch_interrupts<S>(handle: SharedShutdown, interrupts: S) -> bool
where
    S: Stream<Item = ()>,
{
    tokio::pin!(interrupts);
    let mut received = 0u32;
    while interrupts.next().await.is_some() {
        received += 1;
        if received == 1 {
            warn!("Ctrl+C received - finishing in-flight downloads, no new files will start (press again to exit now)");
            handle.request_shutdown();
        } else {
            warn!("Second Ctrl+C received - exiting without waiting for downloads");
            return true;
        }
    }
    false
}

/// Coordinates graceful shutdown across async tasks.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    is_shutdown: AtomicBool,
    notify: Notify,
}

impl ShutdownCoordinator {
    /// Create a new coordinator.
    pub fn new() -> Self {
        Self {
            is_shutdown: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Create a new shared coordinator wrapped in [`Arc`].
    pub fn shared() -> SharedShutdown {
        Arc::new(Self::new())
    }

    /// Request shutdown. Notifies all registered waiters exactly once.
    pub fn request_shutdown(&self) {
        if !self.is_shutdown.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    /// Wait until shutdown is requested. Returns immediately if already set.
    pub async fn wait_for_shutdown(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent request is not missed
        notified.as_mut().enable();
        if self.is_shutdown_requested() {
            return;
        }
        notified.await;
    }
}
