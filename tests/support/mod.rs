//! Scripted in-memory transport shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mrt_downloader::fetcher::{FetchedBody, Transport, TransportError};
use mrt_downloader::shutdown::SharedShutdown;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;

/// One scripted response
#[derive(Debug, Clone)]
pub enum Reply {
    /// 200 with this body and a matching Content-Length
    Body(Vec<u8>),
    /// Non-success status
    Status(u16),
    /// Transport error before any byte is written
    Error(TransportError),
    /// Writes `partial` then fails with a connection reset
    ResetAfter(Vec<u8>),
    /// 200 with a body and a Last-Modified header
    Dated {
        /// Body sent
        body: Vec<u8>,
        /// Last-Modified announced
        last_modified: DateTime<Utc>,
    },
    /// 200 whose body is shorter than the announced Content-Length
    Truncated {
        /// Bytes actually sent
        body: Vec<u8>,
        /// Content-Length announced
        announced: u64,
    },
}

impl Reply {
    /// 200 with a text body
    pub fn text(body: &str) -> Self {
        Reply::Body(body.as_bytes().to_vec())
    }

    /// Connection reset before the body
    pub fn reset() -> Self {
        Reply::Error(TransportError::Interrupted("connection reset by peer".into()))
    }
}

/// Transport answering from per-URL scripts.
///
/// Each URL has a queue of replies; the last reply repeats once the queue is
/// down to one. URLs without a script answer 404.
#[derive(Default)]
pub struct FakeTransport {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<String>>,
    shutdown_on_download: Mutex<Option<SharedShutdown>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `reply` to the script for `url`
    pub fn on(&self, url: impl Into<String>, reply: Reply) -> &Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(url.into())
            .or_default()
            .push_back(reply);
        self
    }

    /// Serve an HTML index linking `names` at `url`
    pub fn listing(&self, url: &str, names: &[&str]) -> &Self {
        let mut html = String::from("<html><body><a href=\"../\">Parent Directory</a>\n");
        for name in names {
            html.push_str(&format!("<a href=\"{name}\">{name}</a>\n"));
        }
        html.push_str("</body></html>");
        self.on(url, Reply::text(&html))
    }

    /// Request shutdown as soon as the first file download starts
    pub fn shutdown_on_first_download(&self, shutdown: SharedShutdown) {
        *self.shutdown_on_download.lock().unwrap() = Some(shutdown);
    }

    /// Every URL requested, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Requests made for `url`
    pub fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
    }

    /// Total requests made
    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn next(&self, url: &str) -> Reply {
        self.calls.lock().unwrap().push(url.to_string());
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue.front().cloned().unwrap_or(Reply::Status(404)),
            None => Reply::Status(404),
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn fetch_text(&self, url: &str) -> Result<String, TransportError> {
        match self.next(url) {
            Reply::Body(body) | Reply::Truncated { body, .. } | Reply::Dated { body, .. } => {
                Ok(String::from_utf8_lossy(&body).into_owned())
            }
            Reply::Status(code) => Err(TransportError::Status(code)),
            Reply::Error(e) => Err(e),
            Reply::ResetAfter(_) => Err(TransportError::Interrupted("connection reset".into())),
        }
    }

    async fn fetch_to_file(
        &self,
        url: &str,
        dest: &mut tokio::fs::File,
    ) -> Result<FetchedBody, TransportError> {
        if let Some(shutdown) = self.shutdown_on_download.lock().unwrap().take() {
            shutdown.request_shutdown();
        }

        let write = |e: std::io::Error| TransportError::Io(e.to_string());
        match self.next(url) {
            Reply::Body(body) => {
                dest.write_all(&body).await.map_err(write)?;
                dest.flush().await.map_err(write)?;
                Ok(FetchedBody {
                    bytes_written: body.len() as u64,
                    content_length: Some(body.len() as u64),
                    last_modified: None,
                })
            }
            Reply::Dated {
                body,
                last_modified,
            } => {
                dest.write_all(&body).await.map_err(write)?;
                dest.flush().await.map_err(write)?;
                Ok(FetchedBody {
                    bytes_written: body.len() as u64,
                    content_length: Some(body.len() as u64),
                    last_modified: Some(last_modified),
                })
            }
            Reply::Truncated { body, announced } => {
                dest.write_all(&body).await.map_err(write)?;
                dest.flush().await.map_err(write)?;
                Ok(FetchedBody {
                    bytes_written: body.len() as u64,
                    content_length: Some(announced),
                    last_modified: None,
                })
            }
            Reply::ResetAfter(partial) => {
                dest.write_all(&partial).await.map_err(write)?;
                dest.flush().await.map_err(write)?;
                Err(TransportError::Interrupted("connection reset by peer".into()))
            }
            Reply::Status(code) => Err(TransportError::Status(code)),
            Reply::Error(e) => Err(e),
        }
    }
}

/// Files in `dir` and below, relative, sorted
pub fn files_under(dir: &std::path::Path) -> Vec<String> {
    fn walk(root: &std::path::Path, dir: &std::path::Path, out: &mut Vec<String>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                walk(root, &path, out);
            } else if let Ok(rel) = path.strip_prefix(root) {
                out.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    let mut out = Vec::new();
    walk(dir, dir, &mut out);
    out.sort();
    out
}
