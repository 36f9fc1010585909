//! Retry message formatting for listing and download requests.
//!
//! Retry decisions and the log lines that announce them share one
//! classification so the message always matches what the retry loop does.

use super::TransportError;
use std::time::Duration;

/// Classification of retry errors for user messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryErrorType {
    /// Request timed out, or the server answered 408
    NetworkTimeout,
    /// Connection refused, DNS failure, or other offline scenarios
    NetworkOffline,
    /// Connection dropped while the body was streaming
    ConnectionReset,
    /// HTTP 429 rate limit exceeded
    RateLimit,
    /// HTTP 5xx server error
    ServerError(u16),
    /// 4xx other than 408/429
    ClientError(u16),
    /// Body shorter or longer than the announced Content-Length
    LengthMismatch,
    /// Local disk write or rename failed
    Storage,
    /// Generic fallback when no better classification fits
    NetworkGeneric,
}

impl RetryErrorType {
    /// User-friendly description string used inside retry log messages.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "network timeout",
            Self::NetworkOffline => "connection failed",
            Self::ConnectionReset => "connection reset",
            Self::RateLimit => "rate limit exceeded",
            Self::ServerError(code) => match code {
                500 => "internal server error",
                502 => "bad gateway",
                503 => "service unavailable",
                504 => "gateway timeout",
                _ => "server error",
            },
            Self::ClientError(code) => match code {
                403 => "access forbidden",
                404 => "resource not found",
                410 => "resource gone",
                _ => "client error",
            },
            Self::LengthMismatch => "truncated transfer",
            Self::Storage => "local write failed",
            Self::NetworkGeneric => "network error",
        }
    }

    /// Suggested remediation presented with actionable guidance after failures.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "Check your network connection and firewall settings",
            Self::NetworkOffline => "Verify internet connectivity and DNS resolution",
            Self::ConnectionReset | Self::LengthMismatch => {
                "The archive dropped the transfer; rerun later to fetch the missing files"
            }
            Self::RateLimit => "Reduce --num-workers or wait before rerunning",
            Self::ServerError(_) => "The archive may be experiencing issues, try again later",
            Self::ClientError(_) => "Check the collector id and time range",
            Self::Storage => "Check free disk space and permissions on the target directory",
            Self::NetworkGeneric => "Check network connectivity and try again",
        }
    }

    /// Determine whether the error type is typically retryable.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RetryErrorType::ClientError(_) | RetryErrorType::Storage)
    }
}

/// Context for formatting retry messages.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Attempt about to run, or the attempt that finished (1-based)
    pub attempt: u32,
    /// Maximum number of attempts configured
    pub max_attempts: u32,
    /// Type of error that triggered retry
    pub error_type: RetryErrorType,
    /// Backoff duration until next attempt
    pub backoff_duration: Duration,
    /// What is being fetched (e.g. "rrc00 2025-01 listing", a filename)
    pub target: String,
    /// Original error message for details
    pub error_message: String,
    /// URL that failed
    pub endpoint: String,
}

impl RetryContext {
    /// Convenience constructor used throughout the retry logic.
    pub fn new(
        attempt: u32,
        max_attempts: u32,
        error_type: RetryErrorType,
        backoff_duration: Duration,
        target: impl Into<String>,
        error_message: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            attempt,
            max_attempts,
            error_type,
            backoff_duration,
            target: target.into(),
            error_message: error_message.into(),
            endpoint: endpoint.into(),
        }
    }

    /// Format standardized retry message with attempt counters and context.
    pub fn format_retry(&self) -> String {
        let mut message = format!(
            "Retrying (attempt {}/{}) after {} - waiting {:.1} seconds...",
            self.attempt,
            self.max_attempts,
            self.error_type.description(),
            self.backoff_duration.as_secs_f64()
        );
        append_target(&mut message, &self.target);
        message
    }

    /// Format retry success message when a previous attempt eventually works.
    pub fn format_success(&self) -> String {
        let mut message = format!(
            "Retry attempt {}/{} succeeded",
            self.attempt, self.max_attempts
        );
        append_target(&mut message, &self.target);
        message
    }

    /// Format final failure summary with actionable suggestions.
    pub fn format_failure(&self) -> String {
        let mut lines = Vec::new();
        lines.push(format!("[FAILED] Request failed after {} attempts", self.attempt));
        lines.push(format!("  Last error: {}", self.error_message));

        let target_display = if self.target.is_empty() {
            "unknown"
        } else {
            &self.target
        };
        lines.push(format!("  Target: {target_display}"));
        lines.push(format!("  Endpoint: {}", self.endpoint));
        lines.push("  Suggestions:".to_string());

        for suggestion in self.format_suggestions() {
            lines.push(format!("    - {suggestion}"));
        }

        lines.join("\n")
    }

    /// Derive suggestions tailored to the current retry context.
    pub fn format_suggestions(&self) -> Vec<String> {
        let mut suggestions = vec![self.error_type.suggestion().to_string()];
        if self.error_type.is_retryable() {
            suggestions.push(format!(
                "Try increasing --max-attempts (current: {})",
                self.max_attempts
            ));
        }
        if let Some(host) = url::Url::parse(&self.endpoint)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
        {
            suggestions.push(format!("Check that {host} is reachable from this machine"));
        }
        suggestions
    }
}

/// Extract a [`RetryErrorType`] from a transport failure.
pub fn extract_error_type(err: &TransportError) -> RetryErrorType {
    match err {
        TransportError::Status(status) => match *status {
            408 => RetryErrorType::NetworkTimeout,
            429 => RetryErrorType::RateLimit,
            s if (500..600).contains(&s) => RetryErrorType::ServerError(s),
            s if (400..500).contains(&s) => RetryErrorType::ClientError(s),
            _ => RetryErrorType::NetworkGeneric,
        },
        TransportError::Timeout(_) => RetryErrorType::NetworkTimeout,
        TransportError::Connect(_) => RetryErrorType::NetworkOffline,
        TransportError::Interrupted(_) => RetryErrorType::ConnectionReset,
        TransportError::Io(_) => RetryErrorType::Storage,
        TransportError::Other(_) => RetryErrorType::NetworkGeneric,
    }
}

fn append_target(buffer: &mut String, target: &str) {
    if !target.is_empty() {
        buffer.push_str(" (");
        buffer.push_str(target);
        buffer.push(')');
    }
}
