//! Download configuration constants

use rand::Rng;
use std::time::Duration;

/// Maximum number of attempts per listing request or file download.
/// Five attempts with exponential backoff rides out short archive outages
/// without stalling a worker for more than about a minute.
pub const MAX_ATTEMPTS: u32 = 5;

/// Initial backoff delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1000; // 1 second

/// Maximum backoff delay in milliseconds.
/// Caps exponential growth (retry 5 = 32s capped to 30s).
pub const MAX_BACKOFF_MS: u64 = 30000; // 30 seconds

/// Jitter applied to each backoff, as a fraction of the delay (±25%).
pub const JITTER_RATIO: f64 = 0.25;

/// Default number of concurrent download workers.
pub const DEFAULT_WORKERS: usize = 8;

/// Upper bound on concurrent workers accepted from the command line.
pub const MAX_WORKERS: usize = 32;

/// A worker logs its running completion count every N files.
pub const PROGRESS_INTERVAL: u64 = 10;

/// Months that ended less than this many days ago may still gain files.
pub const REFRESH_GRACE_DAYS: i64 = 7;

/// Discovered collector lists are refetched after this many hours.
pub const COLLECTOR_LIST_MAX_AGE_HOURS: i64 = 24;

/// TCP connect timeout (seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Per-request timeout for directory listings (seconds).
pub const LISTING_TIMEOUT_SECS: u64 = 60;

/// Per-request timeout for file downloads (seconds).
/// RIB snapshots from large collectors run to several hundred megabytes.
pub const DOWNLOAD_TIMEOUT_SECS: u64 = 15 * 60;

/// Calculate exponential backoff delay: `initial * 2^retry_count`, capped at `max`
pub fn calculate_backoff(initial: Duration, max: Duration, retry_count: u32) -> Duration {
    initial
        .saturating_mul(2u32.saturating_pow(retry_count))
        .min(max)
}

/// Apply symmetric random jitter of `ratio` to `base`
pub fn apply_jitter(base: Duration, ratio: f64) -> Duration {
    if ratio <= 0.0 || base.is_zero() {
        return base;
    }
    let factor = rand::thread_rng().gen_range((1.0 - ratio)..=(1.0 + ratio));
    base.mul_f64(factor.max(0.0))
}
