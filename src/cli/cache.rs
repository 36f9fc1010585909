//! Cache maintenance subcommand

use super::download::OutputFormat;
use super::CliError;
use crate::cache::store::{is_foreign_version, CacheFile};
use crate::cache::{default_cache_path, CacheError, CacheStore};
use clap::Parser;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Cache command for inspecting and clearing the listing cache
#[derive(Parser, Debug)]
pub struct CacheCommand {
    /// What to do
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache actions
#[derive(clap::Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAction {
    /// Show location, schema version and entry counts
    Info,
    /// Delete the cache file
    Clear,
}

/// What `cache info` reports
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CacheInfo {
    /// Cache file path
    pub path: PathBuf,
    /// Whether the file exists
    pub exists: bool,
    /// Schema version found in the file
    pub schema_version: Option<String>,
    /// Number of cached collector-months
    pub entries: usize,
    /// Cached collector-months per collector
    pub per_collector: BTreeMap<String, usize>,
    /// Number of discovered collector lists
    pub collector_lists: usize,
    /// Why the file could not be read, if it could not
    pub error: Option<String>,
    /// The file was written by a newer version and is never overwritten
    pub newer_version: bool,
}

impl CacheInfo {
    fn from_file(path: &Path, file: &CacheFile) -> Self {
        let mut per_collector = BTreeMap::new();
        for key in file.entries.keys() {
            let listing = key.split_once('@').map_or(key.as_str(), |(l, _)| l);
            let collector = listing.rsplit_once('/').map_or(listing, |(c, _)| c);
            *per_collector.entry(collector.to_string()).or_insert(0) += 1;
        }
        Self {
            path: path.to_path_buf(),
            exists: true,
            schema_version: Some(file.schema_version.clone()),
            entries: file.entries.len(),
            per_collector,
            collector_lists: file.collectors.len(),
            error: None,
            newer_version: false,
        }
    }
}

impl CacheCommand {
    /// Execute the cache command against `cache_file` (or the default location)
    pub async fn execute(
        &self,
        cache_file: Option<&Path>,
        format: OutputFormat,
    ) -> Result<(), CliError> {
        let path = cache_file
            .map(Path::to_path_buf)
            .or_else(default_cache_path)
            .ok_or_else(|| {
                CliError::ConfigurationError(
                    "No user cache directory available; pass --cache-file".to_string(),
                )
            })?;
        let store = CacheStore::new(path);

        match self.action {
            CacheAction::Info => {
                let info = inspect(&store);
                match format {
                    OutputFormat::Json => println!("{}", serde_json::to_string(&info)?),
                    OutputFormat::Human => print_info(&info),
                }
                Ok(())
            }
            CacheAction::Clear => {
                store.clear()?;
                match format {
                    OutputFormat::Json => println!(
                        "{}",
                        serde_json::json!({ "cleared": store.path().display().to_string() })
                    ),
                    OutputFormat::Human => println!("Cleared {}", store.path().display()),
                }
                Ok(())
            }
        }
    }
}

/// Read the cache file for reporting. Unreadable files are reported, not failed.
pub fn inspect(store: &CacheStore) -> CacheInfo {
    let path = store.path();
    let empty = |exists: bool| CacheInfo {
        path: path.to_path_buf(),
        exists,
        schema_version: None,
        entries: 0,
        per_collector: BTreeMap::new(),
        collector_lists: 0,
        error: None,
        newer_version: false,
    };
    if !path.exists() {
        return empty(false);
    }
    match store.load() {
        Ok(file) => CacheInfo::from_file(path, &file),
        Err(e) => {
            let newer_version = matches!(
                &e,
                CacheError::SchemaVersionMismatch { found, .. } if is_foreign_version(found)
            );
            let schema_version = match &e {
                CacheError::SchemaVersionMismatch { found, .. } => Some(found.clone()),
                _ => None,
            };
            CacheInfo {
                schema_version,
                error: Some(e.to_string()),
                newer_version,
                ..empty(true)
            }
        }
    }
}

fn print_info(info: &CacheInfo) {
    println!("Cache file: {}", info.path.display());
    if !info.exists {
        println!("  (not created yet)");
        return;
    }
    if let Some(error) = &info.error {
        println!("  Unreadable: {error}");
        if info.newer_version {
            println!("  It was written by a newer version and is left untouched.");
        } else {
            println!("  It will be replaced on the next download run.");
        }
        return;
    }
    if let Some(version) = &info.schema_version {
        println!("  Schema version: {version}");
    }
    println!("  Cached listings: {}", info.entries);
    for (collector, count) in &info.per_collector {
        println!("    {collector}: {count}");
    }
    if info.collector_lists > 0 {
        println!("  Discovered collector lists: {}", info.collector_lists);
    }
}
