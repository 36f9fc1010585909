//! reqwest-backed [`Transport`]

use super::{FetchedBody, Transport, TransportError};
use crate::downloader::config::{CONNECT_TIMEOUT_SECS, DOWNLOAD_TIMEOUT_SECS, LISTING_TIMEOUT_SECS};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use reqwest::Client;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// User-Agent sent with every request
const USER_AGENT: &str = concat!("mrt-downloader/", env!("CARGO_PKG_VERSION"));

/// HTTP transport with separate timeouts for listings and file bodies.
///
/// The inner [`Client`] pools connections; clone the transport (or share it in
/// an `Arc`) rather than building one per request.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    listing_timeout: Duration,
    download_timeout: Duration,
}

impl HttpTransport {
    /// Build a transport with the default timeouts
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| TransportError::Other(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            listing_timeout: Duration::from_secs(LISTING_TIMEOUT_SECS),
            download_timeout: Duration::from_secs(DOWNLOAD_TIMEOUT_SECS),
        })
    }

    /// Override the per-request timeouts
    pub fn with_timeouts(mut self, listing: Duration, download: Duration) -> Self {
        self.listing_timeout = listing;
        self.download_timeout = download;
        self
    }

    async fn get(&self, url: &str, timeout: Duration) -> Result<reqwest::Response, TransportError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            debug!(%url, status = status.as_u16(), "Non-success response");
            return Err(TransportError::Status(status.as_u16()));
        }
        Ok(response)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch_text(&self, url: &str) -> Result<String, TransportError> {
        let response = self.get(url, self.listing_timeout).await?;
        response.text().await.map_err(classify)
    }

    async fn fetch_to_file(
        &self,
        url: &str,
        dest: &mut tokio::fs::File,
    ) -> Result<FetchedBody, TransportError> {
        let response = self.get(url, self.download_timeout).await?;
        let content_length = response.content_length();
        let last_modified = response
            .headers()
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_http_date);

        let mut stream = response.bytes_stream();
        let mut bytes_written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(classify)?;
            dest.write_all(&chunk)
                .await
                .map_err(|e| TransportError::Io(e.to_string()))?;
            bytes_written += chunk.len() as u64;
        }
        dest.flush()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;

        Ok(FetchedBody {
            bytes_written,
            content_length,
            last_modified,
        })
    }
}

/// Parse an HTTP-date (`Wed, 15 Jan 2025 00:05:00 GMT`)
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Map a reqwest error onto the retry taxonomy
fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else if err.is_body() || err.is_decode() || err.is_request() {
        TransportError::Interrupted(err.to_string())
    } else if let Some(status) = err.status() {
        TransportError::Status(status.as_u16())
    } else {
        TransportError::Other(err.to_string())
    }
}
