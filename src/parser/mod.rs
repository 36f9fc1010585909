//! MRT filename parsing
//!
//! Recognizes the naming conventions used by the public archives:
//!
//! - RIS: `bview.YYYYMMDD.HHMM.gz`, `updates.YYYYMMDD.HHMM.gz`
//! - RouteViews: `rib.YYYYMMDD.HHMM.bz2`, `updates.YYYYMMDD.HHMM.bz2`
//! - Collector-prefixed: `{collector}-{name}` where `{name}` is one of the above
//!
//! The time component may omit minutes (`HH`), in which case minute 0 is assumed.
//! Conventions are tried in the order listed and the first match wins.

use crate::FileKind;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static RIS_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(bview|updates)\.(\d{8})\.(\d{2})(\d{2})?\.([A-Za-z0-9]+)$")
        .unwrap_or_else(|e| panic!("invalid RIS filename pattern: {e}"))
});

static ROUTEVIEWS_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(rib|updates)\.(\d{8})\.(\d{2})(\d{2})?\.([A-Za-z0-9]+)$")
        .unwrap_or_else(|e| panic!("invalid RouteViews filename pattern: {e}"))
});

/// Naming convention a filename matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convention {
    /// `bview.*` / `updates.*`
    Ris,
    /// `rib.*` / `updates.*`
    RouteViews,
    /// `{collector}-{ris or routeviews name}`
    CollectorPrefixed,
}

/// Result of parsing a filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    /// Collector id embedded in the name (collector-prefixed names only)
    pub collector: Option<String>,
    /// Snapshot or update
    pub kind: FileKind,
    /// Dump time, minute precision
    pub timestamp: DateTime<Utc>,
    /// Leading token as it appeared (`bview`, `rib` or `updates`)
    pub token: String,
    /// Compression extension as it appeared (`gz`, `bz2`, ...)
    pub extension: String,
    /// Convention that matched
    pub convention: Convention,
}

/// Filename parse failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Name does not follow any known convention
    #[error("unrecognized MRT filename: {0}")]
    UnrecognizedFormat(String),

    /// Name follows a convention but its date or time is not a real instant
    #[error("invalid timestamp in MRT filename {name}: {reason}")]
    InvalidTimestamp {
        /// Offending filename
        name: String,
        /// What was wrong with it
        reason: String,
    },
}

/// Parse an MRT filename (or URL / path; only the final segment is considered).
///
/// ```
/// use mrt_downloader::{parse, FileKind};
///
/// let parsed = parse("updates.20250116.0050.gz").unwrap();
/// assert_eq!(parsed.kind, FileKind::Update);
/// assert_eq!(parsed.timestamp.to_rfc3339(), "2025-01-16T00:50:00+00:00");
/// ```
pub fn parse(name_or_path: &str) -> Result<ParsedName, ParseError> {
    let name = last_segment(name_or_path);

    match parse_bare(name) {
        Ok(Some(parsed)) => return Ok(parsed),
        Err(e) => return Err(e),
        Ok(None) => {}
    }

    // Collector ids may themselves contain '-', so try every split position
    for (idx, _) in name.match_indices('-') {
        let (collector, rest) = (&name[..idx], &name[idx + 1..]);
        if collector.is_empty() {
            continue;
        }
        match parse_bare(rest) {
            Ok(Some(mut parsed)) => {
                parsed.collector = Some(collector.to_string());
                parsed.convention = Convention::CollectorPrefixed;
                return Ok(parsed);
            }
            Err(ParseError::InvalidTimestamp { reason, .. }) => {
                return Err(ParseError::InvalidTimestamp {
                    name: name.to_string(),
                    reason,
                });
            }
            _ => continue,
        }
    }

    Err(ParseError::UnrecognizedFormat(name.to_string()))
}

fn last_segment(input: &str) -> &str {
    let trimmed = input.split(['?', '#']).next().unwrap_or(input);
    trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed)
}

/// Ok(None) means the name matched neither bare convention.
fn parse_bare(name: &str) -> Result<Option<ParsedName>, ParseError> {
    for (regex, convention) in [
        (&*RIS_NAME, Convention::Ris),
        (&*ROUTEVIEWS_NAME, Convention::RouteViews),
    ] {
        let Some(caps) = regex.captures(name) else {
            continue;
        };
        let token = &caps[1];
        let kind = match token {
            "bview" | "rib" => FileKind::Snapshot,
            _ => FileKind::Update,
        };
        let minute = caps.get(4).map(|m| m.as_str()).unwrap_or("00");
        let timestamp = build_timestamp(name, &caps[2], &caps[3], minute)?;

        return Ok(Some(ParsedName {
            collector: None,
            kind,
            timestamp,
            token: token.to_string(),
            extension: caps[5].to_string(),
            convention,
        }));
    }
    Ok(None)
}

fn build_timestamp(
    name: &str,
    date: &str,
    hour: &str,
    minute: &str,
) -> Result<DateTime<Utc>, ParseError> {
    let invalid = |reason: String| ParseError::InvalidTimestamp {
        name: name.to_string(),
        reason,
    };

    let day = NaiveDate::parse_from_str(date, "%Y%m%d")
        .map_err(|e| invalid(format!("date {date}: {e}")))?;
    let hour: u32 = hour
        .parse()
        .map_err(|_| invalid(format!("hour {hour}")))?;
    let minute: u32 = minute
        .parse()
        .map_err(|_| invalid(format!("minute {minute}")))?;
    let naive = day
        .and_hms_opt(hour, minute, 0)
        .ok_or_else(|| invalid(format!("time {hour:02}:{minute:02} out of range")))?;

    Ok(Utc.from_utc_datetime(&naive))
}
