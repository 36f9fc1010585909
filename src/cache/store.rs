//! Durable listing cache file
//!
//! Atomic writes via `tempfile::NamedTempFile` + rename, and cross-process
//! coordination via an `fd-lock` guarded sibling `.lock` file.

use super::{CacheError, CollectorCacheEntry, ListingCacheEntry};
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Current cache file schema version
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Maximum allowed cache file size (64 MB) to prevent memory exhaustion
pub const MAX_CACHE_FILE_SIZE: u64 = 64 * 1024 * 1024;

/// On-disk cache document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheFile {
    /// Schema version tag
    pub schema_version: String,
    /// Entries keyed by listing key (`{collector}/{YYYY-MM}@{archive base}`)
    pub entries: BTreeMap<String, ListingCacheEntry>,
    /// Discovered collector lists keyed by `{project}@{source url}`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub collectors: BTreeMap<String, CollectorCacheEntry>,
}

impl Default for CacheFile {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            entries: BTreeMap::new(),
            collectors: BTreeMap::new(),
        }
    }
}

/// Only the version tag, read before the rest of the document
#[derive(Deserialize)]
struct VersionTag {
    schema_version: String,
}

/// Whether a file tagged `found` was written by a newer (or unknown) schema.
///
/// Such files are never overwritten; older ones are replaced.
pub fn is_foreign_version(found: &str) -> bool {
    fn parse(v: &str) -> Option<(u64, u64, u64)> {
        let mut parts = v.split('.').map(|p| p.parse::<u64>().ok());
        let version = (parts.next()??, parts.next()??, parts.next()??);
        parts.next().is_none().then_some(version)
    }
    match (parse(found), parse(SCHEMA_VERSION)) {
        (Some(found), Some(ours)) => found > ours,
        _ => true,
    }
}

/// Default cache location: `<user cache dir>/mrt-downloader/listings.json`
pub fn default_cache_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("mrt-downloader").join("listings.json"))
}

/// Handle to a cache file on disk
#[derive(Debug, Clone)]
pub struct CacheStore {
    path: PathBuf,
}

impl CacheStore {
    /// Store at `path`; nothing is touched until load or save
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Cache file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }

    fn open_lock_file(&self) -> Result<std::fs::File, CacheError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| CacheError::Io(e.to_string()))?;
            }
        }
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path())
            .map_err(|e| CacheError::Lock(format!("Failed to create lock file: {e}")))
    }

    /// Load the cache file under a shared lock. A missing file is an empty cache.
    pub fn load(&self) -> Result<CacheFile, CacheError> {
        debug!(path = %self.path.display(), "Loading listing cache");

        if !self.path.exists() {
            return Ok(CacheFile::default());
        }

        let lock_file = self.open_lock_file()?;
        let lock = RwLock::new(lock_file);
        let _guard = lock
            .read()
            .map_err(|e| CacheError::Lock(format!("Failed to acquire read lock: {e}")))?;

        let file = read_file(&self.path)?;
        debug!(
            entries = file.entries.len(),
            schema_version = %file.schema_version,
            "Listing cache loaded"
        );
        Ok(file)
    }

    /// Merge `update` into the file on disk and write it back atomically.
    ///
    /// Runs under the exclusive lock so entries written by another process
    /// since this one loaded are kept. Entries in `update` replace on-disk
    /// entries with the same key. A corrupt, oversized or older-version file is
    /// replaced; a file from a newer schema is left untouched and
    /// [`CacheError::SchemaVersionMismatch`] is returned.
    pub fn merge_and_save(&self, update: &CacheFile) -> Result<usize, CacheError> {
        debug!(
            path = %self.path.display(),
            entries = update.entries.len(),
            collector_lists = update.collectors.len(),
            "Saving listing cache"
        );

        let lock_file = self.open_lock_file()?;
        let mut lock = RwLock::new(lock_file);
        let _guard = lock
            .write()
            .map_err(|e| CacheError::Lock(format!("Failed to acquire write lock: {e}")))?;

        let mut merged = if self.path.exists() {
            match read_file(&self.path) {
                Ok(file) => file,
                Err(CacheError::SchemaVersionMismatch { expected, found })
                    if is_foreign_version(&found) =>
                {
                    warn!(
                        path = %self.path.display(),
                        %found,
                        "Listing cache written by a newer version, leaving it untouched"
                    );
                    return Err(CacheError::SchemaVersionMismatch { expected, found });
                }
                Err(e) => {
                    warn!(error = %e, "Replacing unreadable listing cache");
                    CacheFile::default()
                }
            }
        } else {
            CacheFile::default()
        };
        for (key, entry) in &update.entries {
            merged.entries.insert(key.clone(), entry.clone());
        }
        for (key, entry) in &update.collectors {
            merged.collectors.insert(key.clone(), entry.clone());
        }

        let json = serde_json::to_string(&merged)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;

        let parent_dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut temp_file = tempfile::NamedTempFile::new_in(parent_dir)
            .map_err(|e| CacheError::Io(format!("Failed to create temp file: {e}")))?;
        temp_file
            .write_all(json.as_bytes())
            .map_err(|e| CacheError::Io(format!("Failed to write to temp file: {e}")))?;
        temp_file
            .flush()
            .map_err(|e| CacheError::Io(format!("Failed to flush temp file: {e}")))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| CacheError::Io(format!("Failed to sync temp file: {e}")))?;
        temp_file
            .persist(&self.path)
            .map_err(|e| CacheError::Io(format!("Failed to persist temp file: {e}")))?;

        // Fsync parent directory so the rename is durable
        if let Ok(dir) = std::fs::File::open(parent_dir) {
            let _ = dir.sync_all();
        }

        info!(
            path = %self.path.display(),
            entries = merged.entries.len(),
            "Listing cache saved"
        );
        Ok(merged.entries.len())
    }

    /// Delete the cache file and its lock file. Missing files are not an error.
    pub fn clear(&self) -> Result<(), CacheError> {
        for path in [self.path.clone(), self.lock_path()] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(CacheError::Io(format!("{}: {e}", path.display()))),
            }
        }
        Ok(())
    }
}

fn read_file(path: &Path) -> Result<CacheFile, CacheError> {
    let metadata = std::fs::metadata(path).map_err(|e| CacheError::Io(e.to_string()))?;
    if metadata.len() > MAX_CACHE_FILE_SIZE {
        return Err(CacheError::TooLarge {
            size: metadata.len(),
            max: MAX_CACHE_FILE_SIZE,
        });
    }

    let contents = std::fs::read_to_string(path).map_err(|e| CacheError::Io(e.to_string()))?;

    // Check the tag first: another version's entries may not fit this layout
    let tag: VersionTag =
        serde_json::from_str(&contents).map_err(|e| CacheError::Deserialization(e.to_string()))?;
    if tag.schema_version != SCHEMA_VERSION {
        return Err(CacheError::SchemaVersionMismatch {
            expected: SCHEMA_VERSION.to_string(),
            found: tag.schema_version,
        });
    }

    serde_json::from_str(&contents).map_err(|e| CacheError::Deserialization(e.to_string()))
}
