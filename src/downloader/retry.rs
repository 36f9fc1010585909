//! Retry with exponential backoff
//!
//! [`attempt`] drives any fallible async operation up to a bounded number of
//! attempts and reports how it ended as a value: success, terminal failure,
//! exhausted retries, or cancellation. Listing fetches and file downloads both
//! go through it.

use super::config::{
    apply_jitter, calculate_backoff, INITIAL_BACKOFF_MS, JITTER_RATIO, MAX_ATTEMPTS,
    MAX_BACKOFF_MS,
};
use crate::fetcher::retry_formatter::{RetryContext, RetryErrorType};
use crate::shutdown::ShutdownCoordinator;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Errors the retry loop can classify
pub trait Retryable {
    /// Classification used for the retry decision and log wording
    fn error_type(&self) -> RetryErrorType;

    /// Whether another attempt may succeed
    fn is_retryable(&self) -> bool {
        self.error_type().is_retryable()
    }
}

/// Why a retried operation gave up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryFailure<E> {
    /// Non-retryable error on some attempt
    Terminal(E),
    /// Every attempt failed with a retryable error; holds the last one
    Exhausted(E),
    /// Shutdown was requested before the next attempt; holds the last error, if any
    Cancelled(Option<E>),
}

impl<E> RetryFailure<E> {
    /// Underlying error, if an attempt ran
    pub fn error(&self) -> Option<&E> {
        match self {
            RetryFailure::Terminal(e) | RetryFailure::Exhausted(e) => Some(e),
            RetryFailure::Cancelled(e) => e.as_ref(),
        }
    }
}

/// Result of a retried operation plus the number of attempts made
#[derive(Debug)]
pub struct Attempted<T, E> {
    /// Final result
    pub outcome: Result<T, RetryFailure<E>>,
    /// Attempts actually started (0 if cancelled before the first)
    pub attempts: u32,
}

/// Backoff schedule and attempt bound
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(MAX_BACKOFF_MS),
            jitter_ratio: JITTER_RATIO,
        }
    }
}

impl RetryPolicy {
    /// Default policy
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy that retries without sleeping (tests)
    pub fn no_delay() -> Self {
        Self {
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            jitter_ratio: 0.0,
            ..Self::default()
        }
    }

    /// Set the attempt bound (minimum 1)
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set initial and maximum backoff
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }

    /// Set jitter ratio (clamped to 0.0..=1.0)
    pub fn with_jitter(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    /// Attempt bound
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `retry_index` (0 = before the second attempt)
    pub fn backoff(&self, retry_index: u32) -> Duration {
        let base = calculate_backoff(self.initial_backoff, self.max_backoff, retry_index);
        apply_jitter(base, self.jitter_ratio)
    }

    /// Run `operation` under this policy. See [`attempt`].
    pub async fn run<T, E, F, Fut>(
        &self,
        operation: F,
        shutdown: Option<&ShutdownCoordinator>,
        target: &str,
        endpoint: &str,
    ) -> Attempted<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        attempt(
            operation,
            self.max_attempts,
            |i| self.backoff(i),
            shutdown,
            target,
            endpoint,
        )
        .await
    }
}

/// Run `operation` until it succeeds, fails terminally, runs out of attempts,
/// or shutdown is requested.
///
/// `operation` receives the 1-based attempt number. `backoff_fn` receives the
/// 0-based retry index and returns the delay to wait before that retry. A
/// shutdown request during a backoff wait ends the loop immediately with
/// [`RetryFailure::Cancelled`]; an attempt already in flight is never interrupted.
pub async fn attempt<T, E, F, Fut, B>(
    mut operation: F,
    max_attempts: u32,
    backoff_fn: B,
    shutdown: Option<&ShutdownCoordinator>,
    target: &str,
    endpoint: &str,
) -> Attempted<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
    B: Fn(u32) -> Duration,
{
    let max_attempts = max_attempts.max(1);
    let mut last_error: Option<E> = None;
    let mut last_type = RetryErrorType::NetworkGeneric;

    for n in 1..=max_attempts {
        if shutdown.is_some_and(|s| s.is_shutdown_requested()) {
            return Attempted {
                outcome: Err(RetryFailure::Cancelled(last_error)),
                attempts: n - 1,
            };
        }

        match operation(n).await {
            Ok(value) => {
                if n > 1 {
                    let ctx = RetryContext::new(
                        n,
                        max_attempts,
                        last_type,
                        Duration::ZERO,
                        target,
                        "",
                        endpoint,
                    );
                    info!(attempt = n, "{}", ctx.format_success());
                }
                return Attempted {
                    outcome: Ok(value),
                    attempts: n,
                };
            }
            Err(err) => {
                let error_type = err.error_type();
                if !err.is_retryable() {
                    return Attempted {
                        outcome: Err(RetryFailure::Terminal(err)),
                        attempts: n,
                    };
                }
                if n == max_attempts {
                    let ctx = RetryContext::new(
                        n,
                        max_attempts,
                        error_type,
                        Duration::ZERO,
                        target,
                        err.to_string(),
                        endpoint,
                    );
                    warn!(attempts = n, "{}", ctx.format_failure());
                    return Attempted {
                        outcome: Err(RetryFailure::Exhausted(err)),
                        attempts: n,
                    };
                }

                let delay = backoff_fn(n - 1);
                let ctx = RetryContext::new(
                    n + 1,
                    max_attempts,
                    error_type,
                    delay,
                    target,
                    err.to_string(),
                    endpoint,
                );
                warn!(attempt = n + 1, error = %err, "{}", ctx.format_retry());
                crate::metrics::record_retry_backoff(delay, n);

                last_type = error_type;
                last_error = Some(err);

                match shutdown {
                    Some(s) => {
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = s.wait_for_shutdown() => {
                                return Attempted {
                                    outcome: Err(RetryFailure::Cancelled(last_error)),
                                    attempts: n,
                                };
                            }
                        }
                    }
                    None => tokio::time::sleep(delay).await,
                }
            }
        }
    }

    // Loop always returns; reached only if max_attempts were 0, which is clamped above.
    Attempted {
        outcome: Err(RetryFailure::Cancelled(last_error)),
        attempts: max_attempts,
    }
}
