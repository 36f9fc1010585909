//! Calendar month arithmetic for listing keys

use crate::TimeRange;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Year and month of a collector listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct YearMonth {
    /// Year (e.g., 2025)
    pub year: i32,
    /// Month (1-12)
    pub month: u32,
}

impl YearMonth {
    /// Create a YearMonth, returning `None` if `month` is not 1-12
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    /// Month containing `ts`
    pub fn of(ts: DateTime<Utc>) -> Self {
        Self {
            year: ts.year(),
            month: ts.month(),
        }
    }

    /// Get current YearMonth
    pub fn now() -> Self {
        Self::of(Utc::now())
    }

    /// Following month
    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// First instant of the month (00:00:00 UTC on day 1)
    pub fn start(&self) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// First instant of the following month
    pub fn end(&self) -> DateTime<Utc> {
        self.next().start()
    }

    /// Archive directory segment: `YYYY.MM`
    pub fn dotted(&self) -> String {
        format!("{:04}.{:02}", self.year, self.month)
    }

    /// Every month overlapping `range`, in ascending order.
    ///
    /// The end bound is exclusive, so a range ending exactly at midnight on the
    /// first of a month does not include that month.
    pub fn months_overlapping(range: &TimeRange) -> Vec<YearMonth> {
        let first = Self::of(range.start());
        let last = Self::of(range.end() - chrono::Duration::nanoseconds(1));

        let mut months = Vec::new();
        let mut current = first;
        while current <= last {
            months.push(current);
            current = current.next();
        }
        months
    }
}

impl std::fmt::Display for YearMonth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = String;

    /// Accepts `YYYY-MM` and `YYYY.MM`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s
            .split_once(['-', '.'])
            .ok_or_else(|| format!("Invalid month: {s}. Expected YYYY-MM"))?;
        let year: i32 = year
            .parse()
            .map_err(|_| format!("Invalid year in {s}"))?;
        let month: u32 = month
            .parse()
            .map_err(|_| format!("Invalid month in {s}"))?;
        Self::new(year, month).ok_or_else(|| format!("Month out of range in {s}"))
    }
}

impl TryFrom<String> for YearMonth {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<YearMonth> for String {
    fn from(value: YearMonth) -> Self {
        value.to_string()
    }
}
