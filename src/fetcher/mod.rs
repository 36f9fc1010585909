//! Listing fetchers and the network transport seam
//!
//! [`ListingFetcher`] turns one collector-month into an ordered set of
//! [`FileDescriptor`]s. All network access goes through the [`Transport`]
//! trait so tests can substitute scripted responses for the archives.

use crate::downloader::retry::{RetryFailure, RetryPolicy, Retryable};
use crate::registry::{ArchiveEndpoints, CollectorInfo};
use crate::selection::YearMonth;
use crate::shutdown::SharedShutdown;
use crate::FileDescriptor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

pub mod http;
pub mod listing;
pub mod retry_formatter;

use retry_formatter::{extract_error_type, RetryErrorType};

/// Transport-level failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Server answered with a non-success status
    #[error("HTTP status {0}")]
    Status(u16),

    /// Request or body read exceeded its timeout
    #[error("timeout: {0}")]
    Timeout(String),

    /// Could not establish a connection
    #[error("connection failed: {0}")]
    Connect(String),

    /// Connection dropped mid-transfer
    #[error("connection interrupted: {0}")]
    Interrupted(String),

    /// Local write failed while streaming the body
    #[error("IO error: {0}")]
    Io(String),

    /// Any other client error
    #[error("network error: {0}")]
    Other(String),
}

impl Retryable for TransportError {
    fn error_type(&self) -> RetryErrorType {
        extract_error_type(self)
    }
}

/// Result of streaming a response body into a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchedBody {
    /// Bytes written to the destination
    pub bytes_written: u64,
    /// `Content-Length` announced by the server, if any
    pub content_length: Option<u64>,
    /// `Last-Modified` announced by the server, if any
    pub last_modified: Option<chrono::DateTime<chrono::Utc>>,
}

/// Network access used by the fetcher and the download workers
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET `url` and return the body as text. Non-2xx statuses are errors.
    async fn fetch_text(&self, url: &str) -> Result<String, TransportError>;

    /// GET `url` and stream the body into `dest`. Non-2xx statuses are errors.
    async fn fetch_to_file(
        &self,
        url: &str,
        dest: &mut tokio::fs::File,
    ) -> Result<FetchedBody, TransportError>;
}

/// Listing fetch failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ListingError {
    /// The archive has no directory for this collector-month (HTTP 404)
    #[error("listing not found: {url}")]
    NotFound {
        /// Listing URL
        url: String,
    },

    /// Retries exhausted or a non-retryable error
    #[error("listing fetch failed for {url} after {attempts} attempts: {reason}")]
    FetchFailed {
        /// Listing URL
        url: String,
        /// Attempts made
        attempts: u32,
        /// Last error
        reason: String,
    },

    /// Shutdown requested before the listing was fetched
    #[error("listing fetch cancelled: {url}")]
    Cancelled {
        /// Listing URL
        url: String,
    },
}

/// Where a listing came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingOrigin {
    /// Fetched from the archive during this call
    Fetched,
    /// Served from the listing cache
    Cached,
    /// The archive answered 404; treated as empty
    NotFound,
}

/// Files published by one collector in one month
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    /// Descriptors ordered by timestamp, then URL
    pub descriptors: Vec<FileDescriptor>,
    /// Where the descriptors came from
    pub origin: ListingOrigin,
}

impl Listing {
    /// Build a listing, sorting and deduplicating the descriptors
    pub fn new(mut descriptors: Vec<FileDescriptor>, origin: ListingOrigin) -> Self {
        descriptors.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.remote_url.cmp(&b.remote_url))
        });
        descriptors.dedup();
        Self {
            descriptors,
            origin,
        }
    }

    /// Empty listing for a collector-month the archive does not have
    pub fn not_found() -> Self {
        Self::new(Vec::new(), ListingOrigin::NotFound)
    }
}

/// Fetches and parses collector directory listings
#[derive(Clone)]
pub struct ListingFetcher {
    transport: Arc<dyn Transport>,
    endpoints: ArchiveEndpoints,
    policy: RetryPolicy,
    shutdown: Option<SharedShutdown>,
}

impl ListingFetcher {
    /// Create a fetcher over `transport` using the public archive hosts
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            endpoints: ArchiveEndpoints::default(),
            policy: RetryPolicy::default(),
            shutdown: None,
        }
    }

    /// Override archive hosts
    pub fn with_endpoints(mut self, endpoints: ArchiveEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Override retry policy
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Stop issuing requests once shutdown is requested
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Archive hosts in use
    pub fn endpoints(&self) -> &ArchiveEndpoints {
        &self.endpoints
    }

    /// List one collector-month.
    ///
    /// A 404 on every listing URL yields an empty listing with origin
    /// [`ListingOrigin::NotFound`]. RouteViews collectors merge their `RIBS/`
    /// and `UPDATES/` sub-listings; one of them missing is not an error.
    pub async fn list(
        &self,
        collector: &CollectorInfo,
        month: YearMonth,
    ) -> Result<Listing, ListingError> {
        let urls = collector.listing_urls(&self.endpoints, month);
        let mut descriptors = Vec::new();
        let mut found_any = false;

        for url in &urls {
            match self.fetch_listing(collector, month, url).await {
                Ok(mut found) => {
                    found_any = true;
                    descriptors.append(&mut found);
                }
                Err(ListingError::NotFound { .. }) => {
                    debug!(collector = %collector.id, %month, %url, "Listing not found");
                }
                Err(e) => return Err(e),
            }
        }

        if !found_any {
            crate::metrics::record_listing_request("not_found");
            return Ok(Listing::not_found());
        }

        let listing = Listing::new(descriptors, ListingOrigin::Fetched);
        debug!(
            collector = %collector.id,
            %month,
            files = listing.descriptors.len(),
            "Listing fetched"
        );
        Ok(listing)
    }

    /// Fetch and parse a single listing URL
    async fn fetch_listing(
        &self,
        collector: &CollectorInfo,
        month: YearMonth,
        url: &str,
    ) -> Result<Vec<FileDescriptor>, ListingError> {
        let target = format!("{} {} listing", collector.id, month);
        let transport = &self.transport;
        let attempted = self
            .policy
            .run(
                move |_| transport.fetch_text(url),
                self.shutdown.as_deref(),
                &target,
                url,
            )
            .await;

        let body = match attempted.outcome {
            Ok(body) => body,
            Err(RetryFailure::Terminal(TransportError::Status(404))) => {
                return Err(ListingError::NotFound {
                    url: url.to_string(),
                });
            }
            Err(RetryFailure::Cancelled(_)) => {
                return Err(ListingError::Cancelled {
                    url: url.to_string(),
                });
            }
            Err(failure) => {
                crate::metrics::record_listing_request("error");
                let reason = failure
                    .error()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown error".to_string());
                return Err(ListingError::FetchFailed {
                    url: url.to_string(),
                    attempts: attempted.attempts,
                    reason,
                });
            }
        };
        crate::metrics::record_listing_request("ok");

        Ok(descriptors_from_body(&collector.id, url, &body))
    }
}

/// Parse every file entry in a listing body into descriptors.
///
/// Entries that do not follow a known naming convention are logged and skipped.
pub fn descriptors_from_body(collector_id: &str, listing_url: &str, body: &str) -> Vec<FileDescriptor> {
    listing::extract_entries(body)
        .into_iter()
        .filter_map(|entry| {
            let parsed = match crate::parser::parse(&entry) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(collector = %collector_id, entry = %entry, error = %e, "Skipping listing entry");
                    return None;
                }
            };
            let Some(remote_url) = listing::join_url(listing_url, &entry) else {
                warn!(collector = %collector_id, entry = %entry, "Skipping entry with unusable link");
                return None;
            };
            Some(FileDescriptor::new(
                collector_id,
                remote_url,
                parsed.kind,
                parsed.timestamp,
            ))
        })
        .collect()
}
