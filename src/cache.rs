//! Cache-lifetime policy for scraped records.
//!
//! Older items change rarely, freshly released ones change often, and
//! unreleased ones change most of all right up until release. The TTL table
//! below encodes that curve keyed off the item's release date.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DAY: u64 = 24 * 60 * 60;

/// Window after release during which an item still counts as "recent".
const RECENT_WINDOW_DAYS: i64 = 90;

/// Items older than this are considered settled for good.
const ESTABLISHED_WINDOW_DAYS: i64 = 3 * 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseCategory {
    Future,
    Recent,
    CurrentYear,
    Established,
    Legacy,
    Unknown,
}

/// Per-category TTLs in days. Overridable through configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheTtlTable {
    pub future_days: u64,
    pub recent_days: u64,
    pub current_year_days: u64,
    pub established_days: u64,
    pub legacy_days: u64,
    pub unknown_days: u64,
}

impl Default for CacheTtlTable {
    fn default() -> Self {
        Self {
            future_days: 7,
            recent_days: 14,
            current_year_days: 30,
            established_days: 60,
            legacy_days: 90,
            unknown_days: 90,
        }
    }
}

impl CacheTtlTable {
    pub fn ttl(&self, category: ReleaseCategory) -> Duration {
        let days = match category {
            ReleaseCategory::Future => self.future_days,
            ReleaseCategory::Recent => self.recent_days,
            ReleaseCategory::CurrentYear => self.current_year_days,
            ReleaseCategory::Established => self.established_days,
            ReleaseCategory::Legacy => self.legacy_days,
            ReleaseCategory::Unknown => self.unknown_days,
        };
        Duration::from_secs(days * DAY)
    }
}

/// Parse a release date as scraped from the site. Accepts `YYYY-MM-DD`,
/// `YYYY-MM` (first of the month) and `YYYY` (January 1st). Anything else,
/// including "TBA", is unparseable.
pub fn parse_release_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(year) = s.parse::<i32>() {
        if (1900..=2200).contains(&year) {
            return NaiveDate::from_ymd_opt(year, 1, 1);
        }
    }
    None
}

pub fn categorize(release: Option<NaiveDate>, now: NaiveDate) -> ReleaseCategory {
    let date = match release {
        Some(d) => d,
        None => return ReleaseCategory::Unknown,
    };

    if date > now {
        return ReleaseCategory::Future;
    }
    let age_days = (now - date).num_days();
    if age_days <= RECENT_WINDOW_DAYS {
        return ReleaseCategory::Recent;
    }
    if date.year() == now.year() {
        return ReleaseCategory::CurrentYear;
    }
    if age_days <= ESTABLISHED_WINDOW_DAYS {
        return ReleaseCategory::Established;
    }
    ReleaseCategory::Legacy
}

/// TTL for a raw release-date string; total over all inputs.
pub fn calculate_cache_ttl(raw_release: &str, now: NaiveDate, table: &CacheTtlTable) -> Duration {
    table.ttl(categorize(parse_release_date(raw_release), now))
}

/// Whether a record cached at `cached_at` is still fresh at `now`.
pub fn is_cache_valid(
    cached_at: chrono::DateTime<chrono::Utc>,
    raw_release: &str,
    now: chrono::DateTime<chrono::Utc>,
    table: &CacheTtlTable,
) -> bool {
    let ttl = calculate_cache_ttl(raw_release, now.date_naive(), table);
    let age = now.signed_duration_since(cached_at);
    match age.to_std() {
        Ok(age) => age < ttl,
        // cached_at in the future: treat as fresh
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn mid_2024() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    #[test]
    fn parse_accepts_common_site_formats() {
        assert_eq!(
            parse_release_date("2024-12-01"),
            NaiveDate::from_ymd_opt(2024, 12, 1)
        );
        assert_eq!(
            parse_release_date("2024-12"),
            NaiveDate::from_ymd_opt(2024, 12, 1)
        );
        assert_eq!(parse_release_date("2020"), NaiveDate::from_ymd_opt(2020, 1, 1));
        assert_eq!(parse_release_date("TBA"), None);
        assert_eq!(parse_release_date(""), None);
        assert_eq!(parse_release_date("late 2024"), None);
    }

    #[test]
    fn ttl_table_matches_expected_categories() {
        let table = CacheTtlTable::default();
        let now = mid_2024();

        let cases = [
            ("2024-12-01", ReleaseCategory::Future, 7),
            ("2024-05-01", ReleaseCategory::Recent, 14),
            ("2024-01-15", ReleaseCategory::CurrentYear, 30),
            ("2023-06-15", ReleaseCategory::Established, 60),
            ("2020-01-15", ReleaseCategory::Legacy, 90),
            ("TBA", ReleaseCategory::Unknown, 90),
        ];

        for (raw, category, days) in cases {
            assert_eq!(categorize(parse_release_date(raw), now), category, "{raw}");
            assert_eq!(
                calculate_cache_ttl(raw, now, &table),
                Duration::from_secs(days * DAY),
                "{raw}"
            );
        }
    }

    #[test]
    fn cache_validity_is_age_under_ttl() {
        let table = CacheTtlTable::default();
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();

        // Legacy item: 90 day TTL.
        let fresh = now - chrono::Duration::days(89);
        let stale = now - chrono::Duration::days(91);
        assert!(is_cache_valid(fresh, "2020-01-15", now, &table));
        assert!(!is_cache_valid(stale, "2020-01-15", now, &table));

        // Future item: 7 day TTL.
        let fresh = now - chrono::Duration::days(6);
        let stale = now - chrono::Duration::days(8);
        assert!(is_cache_valid(fresh, "2024-12-01", now, &table));
        assert!(!is_cache_valid(stale, "2024-12-01", now, &table));
    }
}
