//! Directory listing body extraction
//!
//! Archive index pages come as HTML (Apache/nginx autoindex) or JSON
//! (nginx `autoindex_format json`, or a bare array of names). Both are reduced
//! to the list of file entries they link to.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use url::Url;

static HREF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)href\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
        .unwrap_or_else(|e| panic!("invalid href pattern: {e}"))
});

/// File entries linked from a listing body, in document order, without duplicates.
///
/// Query strings and fragments are stripped. Parent links, sort links,
/// absolute links to other hosts and sub-directories are dropped.
pub fn extract_entries(body: &str) -> Vec<String> {
    let trimmed = body.trim_start();
    let raw: Vec<String> = if trimmed.starts_with('[') || trimmed.starts_with('{') {
        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => json_entries(&value),
            Err(_) => html_entries(body),
        }
    } else {
        html_entries(body)
    };

    let mut seen = std::collections::HashSet::new();
    raw.into_iter()
        .filter_map(|entry| clean_entry(&entry))
        .filter(|entry| seen.insert(entry.clone()))
        .collect()
}

fn html_entries(body: &str) -> Vec<String> {
    HREF.captures_iter(body)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| decode_entities(m.as_str()))
        .collect()
}

fn json_entries(value: &Value) -> Vec<String> {
    let items = match value {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("files").or_else(|| map.get("entries")) {
            Some(Value::Array(items)) => items.as_slice(),
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    items
        .iter()
        .filter_map(|item| match item {
            Value::String(name) => Some(name.clone()),
            Value::Object(obj) => {
                let is_dir = obj
                    .get("type")
                    .and_then(Value::as_str)
                    .is_some_and(|t| t.eq_ignore_ascii_case("directory"));
                if is_dir {
                    return None;
                }
                obj.get("name").and_then(Value::as_str).map(str::to_string)
            }
            _ => None,
        })
        .collect()
}

fn clean_entry(entry: &str) -> Option<String> {
    let entry = entry.split(['?', '#']).next().unwrap_or("").trim();
    if entry.is_empty() || entry.ends_with('/') || entry == "." || entry == ".." {
        return None;
    }
    if entry.starts_with("mailto:") || entry.starts_with("javascript:") {
        return None;
    }
    Some(entry.to_string())
}

fn decode_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
}

/// Resolve `entry` against the listing URL it came from.
///
/// Returns `None` when the result would leave the listing's host, or when
/// either side is not a valid URL.
pub fn join_url(listing_url: &str, entry: &str) -> Option<String> {
    let base = Url::parse(listing_url).ok()?;
    let joined = base.join(entry).ok()?;
    if joined.host_str() != base.host_str() || joined.scheme() != base.scheme() {
        return None;
    }
    Some(joined.to_string())
}
