//! Collector registry for RIPE RIS and RouteViews
//!
//! The registry lists every known route collector with its project and the
//! months during which it published data, and knows how each project lays out
//! its monthly directory listings. The embedded list can be refreshed at run
//! time from the project APIs, see [`discovery`].

use crate::selection::YearMonth;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

pub mod discovery;

pub use discovery::CollectorDiscovery;

/// Embedded registry data
const REGISTRY_JSON: &str = include_str!("collectors.json");

/// Global registry instance (loaded once)
static REGISTRY: Lazy<Result<CollectorRegistry, RegistryError>> =
    Lazy::new(|| CollectorRegistry::from_json(REGISTRY_JSON));

static RIS_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^rrc\d{2,}$").unwrap_or_else(|e| panic!("invalid RIS id pattern: {e}"))
});

/// Default RIS archive host
pub const DEFAULT_RIS_BASE: &str = "https://data.ris.ripe.net/";

/// Default RouteViews archive host
pub const DEFAULT_ROUTEVIEWS_BASE: &str = "https://archive.routeviews.org/";

/// RouteViews collector whose archive sits at the host root
const ROUTEVIEWS_ROOT_COLLECTOR: &str = "route-views2";

/// Project operating a collector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Project {
    /// RIPE NCC Routing Information Service
    Ris,
    /// University of Oregon RouteViews
    #[serde(rename = "routeviews")]
    RouteViews,
}

impl std::fmt::Display for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Project::Ris => write!(f, "ris"),
            Project::RouteViews => write!(f, "routeviews"),
        }
    }
}

impl std::str::FromStr for Project {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ris" | "ripe" | "ripe-ris" => Ok(Project::Ris),
            "routeviews" | "route-views" | "rv" => Ok(Project::RouteViews),
            _ => Err(format!("Unknown project: {s}. Expected ris or routeviews")),
        }
    }
}

/// Archive hosts the listing URLs are built from.
///
/// Overridable so tests and mirrors can point at another host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEndpoints {
    /// RIS archive base URL, with trailing slash
    pub ris_base: String,
    /// RouteViews archive base URL, with trailing slash
    pub routeviews_base: String,
}

impl Default for ArchiveEndpoints {
    fn default() -> Self {
        Self {
            ris_base: DEFAULT_RIS_BASE.to_string(),
            routeviews_base: DEFAULT_ROUTEVIEWS_BASE.to_string(),
        }
    }
}

impl ArchiveEndpoints {
    /// Point both projects at a single host (mock servers, mirrors)
    pub fn single_host(base: &str) -> Self {
        let base = with_trailing_slash(base);
        Self {
            ris_base: base.clone(),
            routeviews_base: base,
        }
    }

    /// Archive base serving `project`
    pub fn base_for(&self, project: Project) -> &str {
        match project {
            Project::Ris => &self.ris_base,
            Project::RouteViews => &self.routeviews_base,
        }
    }
}

fn with_trailing_slash(s: &str) -> String {
    if s.ends_with('/') {
        s.to_string()
    } else {
        format!("{s}/")
    }
}

/// A known route collector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorInfo {
    /// Collector id as used in archive paths (e.g. "rrc00", "route-views.sydney")
    pub id: String,
    /// Operating project
    pub project: Project,
    /// First month with data
    pub installed: YearMonth,
    /// First month without data, if decommissioned
    #[serde(default)]
    pub removed: Option<YearMonth>,
}

impl CollectorInfo {
    /// Create a collector entry that is active from `installed` onwards
    pub fn new(id: impl Into<String>, project: Project, installed: YearMonth) -> Self {
        Self {
            id: id.into(),
            project,
            installed,
            removed: None,
        }
    }

    /// Whether the collector published data during `month`
    pub fn is_active_in(&self, month: YearMonth) -> bool {
        month >= self.installed && self.removed.map_or(true, |removed| month < removed)
    }

    /// Listing URLs for one collector-month.
    ///
    /// RIS publishes both kinds in a single monthly directory; RouteViews splits
    /// them into `RIBS/` and `UPDATES/` sub-directories.
    pub fn listing_urls(&self, endpoints: &ArchiveEndpoints, month: YearMonth) -> Vec<String> {
        match self.project {
            Project::Ris => vec![format!(
                "{}{}/{}/",
                with_trailing_slash(&endpoints.ris_base),
                self.id,
                month.dotted()
            )],
            Project::RouteViews => {
                let base = with_trailing_slash(&endpoints.routeviews_base);
                let root = if self.id == ROUTEVIEWS_ROOT_COLLECTOR {
                    format!("{base}bgpdata/{}/", month.dotted())
                } else {
                    format!("{base}{}/bgpdata/{}/", self.id, month.dotted())
                };
                vec![format!("{root}RIBS/"), format!("{root}UPDATES/")]
            }
        }
    }
}

/// Registry of known collectors
#[derive(Debug, Clone)]
pub struct CollectorRegistry {
    schema_version: String,
    last_updated: String,
    endpoints: ArchiveEndpoints,
    collectors: BTreeMap<String, CollectorInfo>,
}

impl CollectorRegistry {
    /// Load the embedded registry
    ///
    /// This is a singleton operation - the registry is loaded once and cached.
    pub fn load() -> Result<&'static Self, &'static RegistryError> {
        REGISTRY.as_ref()
    }

    /// Load embedded registry, returning an owned copy
    pub fn load_embedded() -> Result<Self, RegistryError> {
        Self::from_json(REGISTRY_JSON)
    }

    /// Parse registry from JSON string
    pub fn from_json(json: &str) -> Result<Self, RegistryError> {
        let raw: RawRegistry = serde_json::from_str(json)
            .map_err(|e| RegistryError::ParseError(format!("Failed to parse registry: {e}")))?;

        let collectors = raw
            .collectors
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();

        Ok(Self {
            schema_version: raw.schema_version,
            last_updated: raw.last_updated,
            endpoints: raw.endpoints,
            collectors,
        })
    }

    /// Registry schema version
    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    /// Date the embedded collector list was last revised
    pub fn last_updated(&self) -> &str {
        &self.last_updated
    }

    /// Default archive endpoints
    pub fn endpoints(&self) -> &ArchiveEndpoints {
        &self.endpoints
    }

    /// All collectors, ordered by id
    pub fn collectors(&self) -> impl Iterator<Item = &CollectorInfo> {
        self.collectors.values()
    }

    /// Look up a collector by id
    pub fn get(&self, id: &str) -> Option<&CollectorInfo> {
        self.collectors.get(id)
    }

    /// Replace every collector of `project` with `collectors`.
    ///
    /// Collectors of other projects are untouched. Returns how many collectors
    /// the project now has.
    pub fn replace_project(&mut self, project: Project, collectors: Vec<CollectorInfo>) -> usize {
        self.collectors.retain(|_, c| c.project != project);
        let mut count = 0;
        for c in collectors.into_iter().filter(|c| c.project == project) {
            if self.collectors.insert(c.id.clone(), c).is_none() {
                count += 1;
            }
        }
        count
    }

    /// Resolve collector patterns into collectors, ordered by id.
    ///
    /// # Pattern Syntax
    /// - exact id: `rrc00`, `route-views.sydney`
    /// - `*` matches any sequence of characters: `rrc0*`, `route-views.*`
    ///
    /// An empty pattern list selects every collector. A non-empty `projects`
    /// list restricts the result to those projects. Unknown exact ids shaped like
    /// `rrcNN` are accepted as RIS collectors (new collectors appear before the
    /// embedded list is revised); other unknown ids are rejected.
    pub fn select(
        &self,
        patterns: &[String],
        projects: &[Project],
    ) -> Result<Vec<CollectorInfo>, RegistryError> {
        let project_ok = |p: Project| projects.is_empty() || projects.contains(&p);
        let mut selected: BTreeMap<String, CollectorInfo> = BTreeMap::new();

        if patterns.is_empty() {
            for c in self.collectors().filter(|c| project_ok(c.project)) {
                selected.insert(c.id.clone(), c.clone());
            }
        }

        for pattern in patterns {
            let pattern = pattern.trim();
            if pattern.contains('*') {
                let matches: Vec<&CollectorInfo> = self
                    .collectors()
                    .filter(|c| matches_pattern(pattern, &c.id))
                    .collect();
                if matches.is_empty() {
                    return Err(RegistryError::NotFound(format!(
                        "Pattern {pattern} does not match any collector"
                    )));
                }
                for c in matches.into_iter().filter(|c| project_ok(c.project)) {
                    selected.insert(c.id.clone(), c.clone());
                }
            } else if let Some(c) = self.get(pattern) {
                if project_ok(c.project) {
                    selected.insert(c.id.clone(), c.clone());
                }
            } else if RIS_ID.is_match(pattern) {
                warn!(
                    collector = %pattern,
                    "Collector not in registry, assuming RIS layout"
                );
                if project_ok(Project::Ris) {
                    let installed = YearMonth { year: 1999, month: 1 };
                    selected.insert(
                        pattern.to_string(),
                        CollectorInfo::new(pattern, Project::Ris, installed),
                    );
                }
            } else {
                return Err(RegistryError::NotFound(format!(
                    "Collector {pattern} not found in registry"
                )));
            }
        }

        Ok(selected.into_values().collect())
    }
}

/// Helper function to match a pattern with wildcards
fn matches_pattern(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    if !pattern.contains('*') {
        return pattern == value;
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let last = parts.len() - 1;

    let mut pos = 0;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }

        if i == 0 {
            if !value.starts_with(part) {
                return false;
            }
            pos = part.len();
        } else if i == last {
            // Suffix must not overlap what earlier parts consumed
            if value.len() < pos + part.len() || !value.ends_with(part) {
                return false;
            }
        } else if let Some(found_pos) = value[pos..].find(part) {
            pos += found_pos + part.len();
        } else {
            return false;
        }
    }

    true
}

/// Raw registry structure for deserialization
#[derive(Debug, Deserialize)]
struct RawRegistry {
    schema_version: String,
    last_updated: String,
    #[serde(default)]
    endpoints: ArchiveEndpoints,
    collectors: Vec<CollectorInfo>,
}

/// Errors that can occur when working with the registry
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Failed to parse registry JSON
    #[error("registry parse error: {0}")]
    ParseError(String),

    /// Collector not found in registry
    #[error("collector not found: {0}")]
    NotFound(String),

    /// Collector list could not be fetched or understood
    #[error("collector discovery failed: {0}")]
    Discovery(String),
}
