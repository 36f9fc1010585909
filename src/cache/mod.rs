//! Listing cache keyed by collector, month and archive host
//!
//! Archived months are immutable, so a listing fetched once is reused for
//! every later run. Months that may still grow (the current month, and months
//! that ended within the refresh grace period) are "volatile": they are reused
//! within a run but never read from or written to the durable store.
//!
//! Concurrent misses for the same key collapse into a single fetch; misses for
//! different keys proceed independently.
//!
//! The same file also keeps collector lists discovered from the project APIs,
//! each with the time it was fetched.

use crate::downloader::config::REFRESH_GRACE_DAYS;
use crate::fetcher::{Listing, ListingOrigin};
use crate::registry::{CollectorInfo, Project};
use crate::selection::YearMonth;
use crate::FileDescriptor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

pub mod store;

pub use store::{default_cache_path, CacheFile, CacheStore};

/// Cache persistence errors. None of these abort a run.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// Lock file could not be created or locked
    #[error("lock error: {0}")]
    Lock(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Cache file is not valid JSON for this schema
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Cache file written by an incompatible version
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Version this build writes
        expected: String,
        /// Version found on disk
        found: String,
    },

    /// Cache file exceeds the size limit
    #[error("cache file too large: {size} bytes (max {max})")]
    TooLarge {
        /// File size
        size: u64,
        /// Limit
        max: u64,
    },
}

/// Cache key: one collector-month as served by one archive host
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListingKey {
    /// Collector id
    pub collector_id: String,
    /// Listing month
    pub month: YearMonth,
    /// Archive base URL the listing comes from (empty when unspecified)
    pub source: String,
}

impl ListingKey {
    /// Key for `collector_id` in `month`
    pub fn new(collector_id: impl Into<String>, month: YearMonth) -> Self {
        Self {
            collector_id: collector_id.into(),
            month,
            source: String::new(),
        }
    }

    /// Tie the key to the archive host serving it, so mirrors and the public
    /// archive never share entries
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

impl std::fmt::Display for ListingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collector_id, self.month)?;
        if !self.source.is_empty() {
            write!(f, "@{}", self.source)?;
        }
        Ok(())
    }
}

/// One persisted listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingCacheEntry {
    /// `{collector}/{YYYY-MM}@{archive base}`
    pub listing_key: String,
    /// Descriptors in listing order
    pub descriptors: Vec<FileDescriptor>,
    /// When the listing was fetched
    pub fetched_at: DateTime<Utc>,
}

/// A collector list discovered from a project API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorCacheEntry {
    /// Project the list belongs to
    pub project: Project,
    /// URL the list was fetched from
    pub source: String,
    /// Collectors in API order
    pub collectors: Vec<CollectorInfo>,
    /// When the list was fetched
    pub fetched_at: DateTime<Utc>,
}

impl CollectorCacheEntry {
    fn key(&self) -> String {
        format!("{}@{}", self.project, self.source)
    }
}

/// Which months bypass the durable store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// Treat the current month and recently ended months as volatile
    pub refresh_current_month: bool,
    /// How long after a month ends it stays volatile
    pub refresh_grace: chrono::Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            refresh_current_month: true,
            refresh_grace: chrono::Duration::days(REFRESH_GRACE_DAYS),
        }
    }
}

impl CachePolicy {
    /// Whether listings for `month` may still change as of `now`
    pub fn is_volatile(&self, month: YearMonth, now: DateTime<Utc>) -> bool {
        if !self.refresh_current_month {
            return false;
        }
        now < month.end() + self.refresh_grace
    }
}

/// Listing cache handle, opened once per run.
///
/// Dropping the handle flushes pending entries; call [`ListingCache::flush`]
/// to observe write errors.
pub struct ListingCache {
    persisted: RwLock<HashMap<ListingKey, ListingCacheEntry>>,
    session: RwLock<HashMap<ListingKey, Listing>>,
    key_locks: Mutex<HashMap<ListingKey, Arc<tokio::sync::Mutex<()>>>>,
    collectors: RwLock<HashMap<(Project, String), CollectorCacheEntry>>,
    store: Option<CacheStore>,
    policy: CachePolicy,
    force_refresh: bool,
    dirty: AtomicBool,
}

impl ListingCache {
    fn empty(store: Option<CacheStore>) -> Self {
        Self {
            persisted: RwLock::new(HashMap::new()),
            session: RwLock::new(HashMap::new()),
            key_locks: Mutex::new(HashMap::new()),
            collectors: RwLock::new(HashMap::new()),
            store,
            policy: CachePolicy::default(),
            force_refresh: false,
            dirty: AtomicBool::new(false),
        }
    }

    /// Cache without durable storage
    pub fn in_memory() -> Self {
        Self::empty(None)
    }

    /// Open the cache file at `path`.
    ///
    /// An unreadable, oversized or incompatible file is logged and treated as
    /// empty. It is replaced on the next flush unless a newer version wrote it.
    ///
    /// Reads the file synchronously; from async code prefer
    /// [`ListingCache::open_async`].
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let store = CacheStore::new(path);
        let mut persisted = HashMap::new();
        let mut collectors = HashMap::new();

        match store.load() {
            Ok(file) => {
                for (key, entry) in file.entries {
                    match parse_key(&key) {
                        Some(k) => {
                            persisted.insert(k, entry);
                        }
                        None => warn!(key = %key, "Ignoring malformed cache key"),
                    }
                }
                for entry in file.collectors.into_values() {
                    collectors.insert((entry.project, entry.source.clone()), entry);
                }
                info!(
                    path = %store.path().display(),
                    entries = persisted.len(),
                    collector_lists = collectors.len(),
                    "Listing cache opened"
                );
            }
            Err(e) => {
                warn!(
                    path = %store.path().display(),
                    error = %e,
                    "Listing cache unavailable, starting empty"
                );
            }
        }

        let cache = Self::empty(Some(store));
        if let Ok(mut map) = cache.persisted.write() {
            *map = persisted;
        }
        if let Ok(mut map) = cache.collectors.write() {
            *map = collectors;
        }
        cache
    }

    /// [`ListingCache::open`] on the blocking thread pool
    pub async fn open_async(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let fallback = path.clone();
        match tokio::task::spawn_blocking(move || Self::open(path)).await {
            Ok(cache) => cache,
            Err(e) => {
                warn!(error = %e, "Opening listing cache failed, starting empty");
                Self::empty(Some(CacheStore::new(fallback)))
            }
        }
    }

    /// Set the volatility policy
    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Ignore stored entries for this run; fresh results are still stored
    pub fn with_force_refresh(mut self, force_refresh: bool) -> Self {
        self.force_refresh = force_refresh;
        self
    }

    /// Backing file, if any
    pub fn path(&self) -> Option<&Path> {
        self.store.as_ref().map(|s| s.path())
    }

    /// Number of durable entries currently held
    pub fn len(&self) -> usize {
        self.persisted.read().map(|m| m.len()).unwrap_or(0)
    }

    /// Whether no durable entries are held
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Collector list for `project` fetched from `source` less than `max_age`
    /// before `now`. Ignored under force refresh.
    pub fn cached_collectors(
        &self,
        project: Project,
        source: &str,
        max_age: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Option<Vec<CollectorInfo>> {
        if self.force_refresh {
            return None;
        }
        let lists = self.collectors.read().ok()?;
        let entry = lists.get(&(project, source.to_string()))?;
        if now - entry.fetched_at >= max_age {
            debug!(%project, fetched_at = %entry.fetched_at, "Cached collector list is stale");
            return None;
        }
        debug!(%project, collectors = entry.collectors.len(), "Using cached collector list");
        Some(entry.collectors.clone())
    }

    /// Remember a freshly discovered collector list
    pub fn store_collectors(
        &self,
        project: Project,
        source: &str,
        collectors: Vec<CollectorInfo>,
        fetched_at: DateTime<Utc>,
    ) {
        let entry = CollectorCacheEntry {
            project,
            source: source.to_string(),
            collectors,
            fetched_at,
        };
        if let Ok(mut lists) = self.collectors.write() {
            lists.insert((project, source.to_string()), entry);
            self.dirty.store(true, Ordering::SeqCst);
        }
    }

    /// Return the listing for `key`, calling `fetch_fn` only on a miss.
    ///
    /// Errors from `fetch_fn` are returned unchanged and nothing is cached.
    /// Listings the archive answered 404 for are reused within this handle but
    /// never persisted.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: &ListingKey, fetch_fn: F) -> Result<Listing, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Listing, E>>,
    {
        if let Some(hit) = self.lookup(key) {
            return Ok(hit);
        }

        let key_lock = self.key_lock(key);
        let _guard = key_lock.lock().await;

        // Another task may have filled the key while we waited
        if let Some(hit) = self.lookup(key) {
            return Ok(hit);
        }

        debug!(key = %key, "Listing cache miss");
        let listing = fetch_fn().await?;
        self.insert(key, &listing);
        Ok(listing)
    }

    fn lookup(&self, key: &ListingKey) -> Option<Listing> {
        if let Some(listing) = self.session.read().ok()?.get(key) {
            debug!(key = %key, "Listing reused within run");
            crate::metrics::record_cache_hit();
            return Some(as_cached(listing.clone()));
        }

        if self.force_refresh || self.policy.is_volatile(key.month, Utc::now()) {
            return None;
        }

        let persisted = self.persisted.read().ok()?;
        let entry = persisted.get(key)?;
        debug!(key = %key, files = entry.descriptors.len(), "Listing cache hit");
        crate::metrics::record_cache_hit();
        Some(Listing::new(entry.descriptors.clone(), ListingOrigin::Cached))
    }

    fn insert(&self, key: &ListingKey, listing: &Listing) {
        if let Ok(mut session) = self.session.write() {
            session.insert(key.clone(), listing.clone());
        }

        if listing.origin != ListingOrigin::Fetched {
            return;
        }
        if self.policy.is_volatile(key.month, Utc::now()) {
            debug!(key = %key, "Not persisting listing for volatile month");
            return;
        }

        let entry = ListingCacheEntry {
            listing_key: key.to_string(),
            descriptors: listing.descriptors.clone(),
            fetched_at: Utc::now(),
        };
        if let Ok(mut persisted) = self.persisted.write() {
            persisted.insert(key.clone(), entry);
            self.dirty.store(true, Ordering::SeqCst);
        }
    }

    fn key_lock(&self, key: &ListingKey) -> Arc<tokio::sync::Mutex<()>> {
        match self.key_locks.lock() {
            Ok(mut locks) => locks.entry(key.clone()).or_default().clone(),
            // Poisoned map: fall back to an unshared lock, losing only single-flight
            Err(_) => Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Write pending entries to the durable store.
    ///
    /// No-op for in-memory caches or when nothing changed. Blocks on file
    /// locking and fsync; from async code prefer [`ListingCache::flush_async`].
    pub fn flush(&self) -> Result<(), CacheError> {
        let Some((store, update)) = self.take_pending()? else {
            return Ok(());
        };
        let result = store.merge_and_save(&update).map(|_| ());
        self.settle(result)
    }

    /// [`ListingCache::flush`] with the file work on the blocking thread pool
    pub async fn flush_async(&self) -> Result<(), CacheError> {
        let Some((store, update)) = self.take_pending()? else {
            return Ok(());
        };
        let result = tokio::task::spawn_blocking(move || store.merge_and_save(&update))
            .await
            .map_err(|e| CacheError::Io(format!("cache flush task failed: {e}")))
            .and_then(|saved| saved.map(|_| ()));
        self.settle(result)
    }

    fn take_pending(&self) -> Result<Option<(CacheStore, CacheFile)>, CacheError> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(None);
        }

        let poisoned = || CacheError::Io("cache state poisoned".to_string());
        let entries: BTreeMap<String, ListingCacheEntry> = self
            .persisted
            .read()
            .map_err(|_| poisoned())?
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        let collectors: BTreeMap<String, CollectorCacheEntry> = self
            .collectors
            .read()
            .map_err(|_| poisoned())?
            .values()
            .map(|entry| (entry.key(), entry.clone()))
            .collect();

        Ok(Some((
            store.clone(),
            CacheFile {
                entries,
                collectors,
                ..CacheFile::default()
            },
        )))
    }

    /// Re-arm the dirty flag after a failed save, unless the file belongs to a
    /// newer version and retrying cannot succeed
    fn settle(&self, result: Result<(), CacheError>) -> Result<(), CacheError> {
        if let Err(e) = &result {
            if !matches!(e, CacheError::SchemaVersionMismatch { .. }) {
                self.dirty.store(true, Ordering::SeqCst);
            }
        }
        result
    }
}

impl Drop for ListingCache {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(error = %e, "Failed to flush listing cache");
        }
    }
}

fn as_cached(mut listing: Listing) -> Listing {
    if listing.origin == ListingOrigin::Fetched {
        listing.origin = ListingOrigin::Cached;
    }
    listing
}

fn parse_key(key: &str) -> Option<ListingKey> {
    let (listing, source) = key.split_once('@').unwrap_or((key, ""));
    let (collector, month) = listing.rsplit_once('/')?;
    if collector.is_empty() {
        return None;
    }
    Some(ListingKey::new(collector, month.parse().ok()?).with_source(source))
}
