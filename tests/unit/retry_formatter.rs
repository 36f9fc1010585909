use std::time::Duration;

use mrt_downloader::fetcher::retry_formatter::{extract_error_type, RetryContext, RetryErrorType};
use mrt_downloader::fetcher::TransportError;

fn sample_context(error_type: RetryErrorType) -> RetryContext {
    RetryContext::new(
        2,
        5,
        error_type,
        Duration::from_secs(4),
        "updates.20250116.0050.gz",
        "network timeout",
        "https://data.ris.ripe.net/rrc00/2025.01/updates.20250116.0050.gz",
    )
}

#[test]
fn format_retry_captures_attempt_and_wait() {
    let ctx = sample_context(RetryErrorType::RateLimit);
    let message = ctx.format_retry();
    assert!(message.contains("attempt 2/5"));
    assert!(message.contains("rate limit exceeded"));
    assert!(message.contains("4.0 seconds"));
    assert!(message.contains("updates.20250116.0050.gz"));
}

#[test]
fn format_success_includes_target() {
    let ctx = sample_context(RetryErrorType::NetworkTimeout);
    let message = ctx.format_success();
    assert!(message.contains("Retry attempt 2/5 succeeded"));
    assert!(message.contains("updates.20250116.0050.gz"));
}

#[test]
fn format_failure_lists_suggestions() {
    let ctx = sample_context(RetryErrorType::ServerError(502));
    let output = ctx.format_failure();
    assert!(output.contains("failed after 2 attempts"));
    assert!(output.contains("network timeout"));
    assert!(output.contains("try again later"));
    assert!(output.contains("--max-attempts"));
    assert!(output.contains("data.ris.ripe.net"));
}

#[test]
fn terminal_failures_do_not_suggest_more_attempts() {
    let ctx = sample_context(RetryErrorType::ClientError(404));
    let output = ctx.format_failure();
    assert!(!output.contains("--max-attempts"));
    assert!(output.contains("Check the collector id and time range"));
}

#[test]
fn extract_error_type_classifies_transport_errors() {
    assert_eq!(
        extract_error_type(&TransportError::Status(404)),
        RetryErrorType::ClientError(404)
    );
    assert_eq!(
        extract_error_type(&TransportError::Status(408)),
        RetryErrorType::NetworkTimeout
    );
    assert_eq!(
        extract_error_type(&TransportError::Status(429)),
        RetryErrorType::RateLimit
    );
    assert_eq!(
        extract_error_type(&TransportError::Status(503)),
        RetryErrorType::ServerError(503)
    );
    assert_eq!(
        extract_error_type(&TransportError::Interrupted("reset".into())),
        RetryErrorType::ConnectionReset
    );
    assert_eq!(
        extract_error_type(&TransportError::Connect("refused".into())),
        RetryErrorType::NetworkOffline
    );
    assert_eq!(
        extract_error_type(&TransportError::Io("disk full".into())),
        RetryErrorType::Storage
    );
}

#[test]
fn retryability_matches_classification() {
    assert!(RetryErrorType::ServerError(500).is_retryable());
    assert!(RetryErrorType::RateLimit.is_retryable());
    assert!(RetryErrorType::ConnectionReset.is_retryable());
    assert!(RetryErrorType::LengthMismatch.is_retryable());
    assert!(!RetryErrorType::ClientError(403).is_retryable());
    assert!(!RetryErrorType::Storage.is_retryable());
}
