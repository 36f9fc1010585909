//! Runtime collector discovery
//!
//! Both projects publish their collector lists over HTTP. A fetched list
//! replaces the embedded one for its project and is kept in the listing cache
//! file for [`COLLECTOR_LIST_MAX_AGE_HOURS`]. When a list cannot be fetched
//! the embedded collectors stay in use.

use super::{CollectorInfo, CollectorRegistry, Project, RegistryError, ROUTEVIEWS_ROOT_COLLECTOR};
use crate::cache::ListingCache;
use crate::downloader::config::COLLECTOR_LIST_MAX_AGE_HOURS;
use crate::downloader::retry::{RetryFailure, RetryPolicy};
use crate::fetcher::Transport;
use crate::selection::YearMonth;
use crate::shutdown::SharedShutdown;
use chrono::{Datelike, NaiveDate, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// RIPEstat endpoint listing RIS route collectors
pub const RIS_COLLECTORS_URL: &str = "https://stat.ripe.net/data/rrc-info/data.json";

/// RouteViews API endpoint listing collectors
pub const ROUTEVIEWS_COLLECTORS_URL: &str = "https://api.routeviews.org/guest/collector/";

/// Fetches collector lists from the project APIs
#[derive(Clone)]
pub struct CollectorDiscovery {
    transport: Arc<dyn Transport>,
    ris_url: String,
    routeviews_url: String,
    policy: RetryPolicy,
    shutdown: Option<SharedShutdown>,
    max_age: chrono::Duration,
}

impl CollectorDiscovery {
    /// Discovery over `transport` against the public APIs
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            ris_url: RIS_COLLECTORS_URL.to_string(),
            routeviews_url: ROUTEVIEWS_COLLECTORS_URL.to_string(),
            policy: RetryPolicy::default(),
            shutdown: None,
            max_age: chrono::Duration::hours(COLLECTOR_LIST_MAX_AGE_HOURS),
        }
    }

    /// Override the API URLs
    pub fn with_urls(mut self, ris_url: impl Into<String>, routeviews_url: impl Into<String>) -> Self {
        self.ris_url = ris_url.into();
        self.routeviews_url = routeviews_url.into();
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

    /// How long a cached list stays fresh
    pub fn with_max_age(mut self, max_age: chrono::Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// API URL for `project`
    pub fn url_for(&self, project: Project) -> &str {
        match project {
            Project::Ris => &self.ris_url,
            Project::RouteViews => &self.routeviews_url,
        }
    }

    /// Fetch and parse the collector list of `project`
    pub async fn fetch(&self, project: Project) -> Result<Vec<CollectorInfo>, RegistryError> {
        let url = self.url_for(project);
        let target = format!("{project} collector list");
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
            Err(RetryFailure::Cancelled(_)) => {
                return Err(RegistryError::Discovery(format!("{url}: cancelled")));
            }
            Err(failure) => {
                let reason = failure
                    .error()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown error".to_string());
                return Err(RegistryError::Discovery(format!(
                    "{url}: {reason} after {} attempts",
                    attempted.attempts
                )));
            }
        };

        let collectors = match project {
            Project::Ris => parse_ris_collectors(&body)?,
            Project::RouteViews => parse_routeviews_collectors(&body)?,
        };
        if collectors.is_empty() {
            return Err(RegistryError::Discovery(format!("{url}: no collectors listed")));
        }
        Ok(collectors)
    }

    /// Replace the collectors of each project in `projects` (all projects when
    /// empty) with the discovered list, from `cache` while fresh.
    ///
    /// Failures are logged and leave that project's embedded list in place.
    /// Returns how many projects were refreshed.
    pub async fn refresh(
        &self,
        registry: &mut CollectorRegistry,
        cache: &ListingCache,
        projects: &[Project],
    ) -> usize {
        let wanted = if projects.is_empty() {
            vec![Project::Ris, Project::RouteViews]
        } else {
            projects.to_vec()
        };

        let mut refreshed = 0;
        for project in wanted {
            let url = self.url_for(project).to_string();
            let now = Utc::now();
            let collectors = match cache.cached_collectors(project, &url, self.max_age, now) {
                Some(cached) => cached,
                None => match self.fetch(project).await {
                    Ok(fetched) => {
                        cache.store_collectors(project, &url, fetched.clone(), now);
                        fetched
                    }
                    Err(e) => {
                        warn!(%project, error = %e, "Collector discovery failed, using embedded list");
                        continue;
                    }
                },
            };

            let count = registry.replace_project(project, collectors);
            info!(%project, collectors = count, "Collector list refreshed");
            refreshed += 1;
        }
        refreshed
    }
}

#[derive(Deserialize)]
struct RisResponse {
    data: RisData,
}

#[derive(Deserialize)]
struct RisData {
    rrcs: Vec<RisCollector>,
}

#[derive(Deserialize)]
struct RisCollector {
    name: String,
    activated_on: String,
    #[serde(default)]
    deactivated_on: Option<String>,
}

/// Parse a RIPEstat `rrc-info` response.
///
/// Months are `YYYY-MM`; an empty deactivation month means still active. A
/// collector deactivated in some month still has data for that month.
pub fn parse_ris_collectors(body: &str) -> Result<Vec<CollectorInfo>, RegistryError> {
    let response: RisResponse = serde_json::from_str(body)
        .map_err(|e| RegistryError::Discovery(format!("unexpected rrc-info response: {e}")))?;

    let collectors = response
        .data
        .rrcs
        .into_iter()
        .filter_map(|rrc| {
            let id = rrc.name.trim().to_lowercase();
            let Ok(installed) = rrc.activated_on.parse::<YearMonth>() else {
                warn!(collector = %id, activated_on = %rrc.activated_on, "Skipping collector with bad activation month");
                return None;
            };
            let removed = match rrc.deactivated_on.as_deref().map(str::trim) {
                None | Some("") => None,
                Some(month) => match month.parse::<YearMonth>() {
                    Ok(month) => Some(month.next()),
                    Err(_) => {
                        warn!(collector = %id, deactivated_on = %month, "Skipping collector with bad deactivation month");
                        return None;
                    }
                },
            };
            Some(CollectorInfo {
                id,
                project: Project::Ris,
                installed,
                removed,
            })
        })
        .collect();
    Ok(collectors)
}

#[derive(Deserialize)]
struct RouteViewsResponse {
    results: Vec<RouteViewsCollector>,
}

#[derive(Deserialize)]
struct RouteViewsCollector {
    name: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    installed: Option<String>,
    #[serde(default)]
    removed: Option<String>,
}

/// Parse a RouteViews `collector` API response.
///
/// The collector id is the archive directory in front of `bgpdata/` in its
/// URL, falling back to the collector name. Dates are ISO 8601; the month a
/// collector was removed in still has data.
pub fn parse_routeviews_collectors(body: &str) -> Result<Vec<CollectorInfo>, RegistryError> {
    let response: RouteViewsResponse = serde_json::from_str(body)
        .map_err(|e| RegistryError::Discovery(format!("unexpected collector response: {e}")))?;

    let collectors = response
        .results
        .into_iter()
        .filter_map(|rv| {
            let id = rv
                .url
                .as_deref()
                .and_then(archive_dir)
                .unwrap_or_else(|| rv.name.trim().to_string());
            let Some(installed) = rv.installed.as_deref().and_then(month_of_date) else {
                debug!(collector = %id, "Skipping collector without installation date");
                return None;
            };
            let removed = match rv.removed.as_deref().map(str::trim) {
                None | Some("") => None,
                Some(date) => match month_of_date(date) {
                    Some(month) => Some(month.next()),
                    None => {
                        warn!(collector = %id, removed = %date, "Skipping collector with bad removal date");
                        return None;
                    }
                },
            };
            Some(CollectorInfo {
                id,
                project: Project::RouteViews,
                installed,
                removed,
            })
        })
        .collect();
    Ok(collectors)
}

/// Archive directory of a RouteViews collector URL such as
/// `http://archive.routeviews.org/route-views.sydney/bgpdata/`
fn archive_dir(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segments: Vec<&str> = parsed.path_segments()?.filter(|s| !s.is_empty()).collect();
    match segments.iter().position(|s| *s == "bgpdata")? {
        0 => Some(ROUTEVIEWS_ROOT_COLLECTOR.to_string()),
        i => Some(segments[i - 1].to_string()),
    }
}

/// Month of an ISO 8601 date or date-time
fn month_of_date(value: &str) -> Option<YearMonth> {
    let date = NaiveDate::parse_from_str(value.trim().get(..10)?, "%Y-%m-%d").ok()?;
    YearMonth::new(date.year(), date.month())
}
