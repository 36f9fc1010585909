//! CLI command for listing known collectors

use crate::cache::{default_cache_path, ListingCache};
use crate::fetcher::http::HttpTransport;
use crate::fetcher::Transport;
use crate::registry::{CollectorDiscovery, CollectorInfo, CollectorRegistry, Project};
use crate::selection::YearMonth;
use anyhow::{anyhow, Context, Result};
use clap::Args;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Collectors subcommand
#[derive(Debug, Args)]
pub struct CollectorsCommand {
    /// Optional collector ids or patterns (supports wildcards)
    pub patterns: Vec<String>,

    /// Restrict to a project: ris or routeviews (repeatable)
    #[arg(long = "project")]
    pub projects: Vec<Project>,

    /// Only collectors publishing data in this month (YYYY-MM)
    #[arg(long)]
    pub active_at: Option<YearMonth>,

    /// Output format
    #[arg(long, value_enum, default_value = "human")]
    pub format: ListFormat,

    /// Refresh the list from the project APIs (cached for 24 hours)
    #[arg(long, default_value_t = false)]
    pub discover: bool,
}

/// Output format for the collectors command
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ListFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}

impl CollectorsCommand {
    /// Execute the collectors command; `cache_file` holds discovered lists
    pub async fn execute(&self, cache_file: Option<&Path>) -> Result<()> {
        let registry = if self.discover {
            let transport = HttpTransport::new().context("Failed to create HTTP client")?;
            let cache = match cache_file.map(Path::to_path_buf).or_else(default_cache_path) {
                Some(path) => ListingCache::open_async(path).await,
                None => {
                    warn!("No user cache directory available, collector list not cached");
                    ListingCache::in_memory()
                }
            };
            let registry = self.load_registry(Arc::new(transport), &cache).await?;
            if let Err(e) = cache.flush_async().await {
                warn!(error = %e, "Failed to save collector list");
            }
            registry
        } else {
            CollectorRegistry::load().map_err(|e| anyhow!("{e}"))?.clone()
        };
        let collectors = self.resolve(&registry)?;

        match self.format {
            ListFormat::Json => {
                let rows: Vec<_> = collectors
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "project": c.project.to_string(),
                            "installed": c.installed.to_string(),
                            "removed": c.removed.map(|m| m.to_string()),
                        })
                    })
                    .collect();
                println!(
                    "{}",
                    serde_json::to_string_pretty(&rows)
                        .context("Failed to serialize collectors to JSON")?
                );
            }
            ListFormat::Human => {
                println!(
                    "{} collectors (registry {}, updated {}):\n",
                    collectors.len(),
                    registry.schema_version(),
                    registry.last_updated()
                );
                for c in &collectors {
                    println!("{}", format_row(c));
                }
            }
        }

        Ok(())
    }

    /// Embedded registry, refreshed over `transport` when `--discover` is set
    pub async fn load_registry(
        &self,
        transport: Arc<dyn Transport>,
        cache: &ListingCache,
    ) -> Result<CollectorRegistry> {
        let mut registry = CollectorRegistry::load().map_err(|e| anyhow!("{e}"))?.clone();
        if self.discover {
            CollectorDiscovery::new(transport)
                .refresh(&mut registry, cache, &self.projects)
                .await;
        }
        Ok(registry)
    }

    /// Collectors matching the patterns, projects and activity month
    pub fn resolve(&self, registry: &CollectorRegistry) -> Result<Vec<CollectorInfo>> {
        let mut collectors = registry.select(&self.patterns, &self.projects)?;
        if let Some(month) = self.active_at {
            collectors.retain(|c| c.is_active_in(month));
        }
        Ok(collectors)
    }
}

fn format_row(c: &CollectorInfo) -> String {
    let removed = c
        .removed
        .map(|m| m.to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{:<24} | {:<10} | since {} | removed {}",
        c.id,
        c.project.to_string(),
        c.installed,
        removed
    )
}
