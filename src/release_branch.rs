//! Ordering and lookup over date-encoded `release/yyyyMMdd` branches.

use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;

fn release_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^release/([0-9]{4})([0-9]{2})([0-9]{2})$").expect("release pattern is valid")
    })
}

/// True iff `name` is `release/` followed by exactly eight ASCII digits.
pub fn is_release_branch(name: &str) -> bool {
    release_pattern().is_match(name)
}

/// Parses the branch date at UTC midnight.
///
/// Returns `None` when the name does not match the release pattern or the
/// digits are not a calendar date (e.g. `release/20240230`).
pub fn parse_date(name: &str) -> Option<DateTime<Utc>> {
    let caps = release_pattern().captures(name)?;
    let year = caps[1].parse::<i32>().ok()?;
    let month = caps[2].parse::<u32>().ok()?;
    let day = caps[3].parse::<u32>().ok()?;

    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
}

/// Valid release branches, newest first. Anything unparseable is dropped.
pub fn sort_descending<S: AsRef<str>>(branches: &[S]) -> Vec<String> {
    let mut dated: Vec<(DateTime<Utc>, &str)> = branches
        .iter()
        .filter_map(|b| parse_date(b.as_ref()).map(|d| (d, b.as_ref())))
        .collect();

    dated.sort_by(|a, b| b.0.cmp(&a.0));
    dated.into_iter().map(|(_, name)| name.to_owned()).collect()
}

/// The release that immediately follows `current`: the oldest branch strictly
/// newer than it.
pub fn find_next_newer<S: AsRef<str>>(current: &str, all_branches: &[S]) -> Option<String> {
    let current_date = parse_date(current)?;

    sort_descending(all_branches)
        .into_iter()
        .filter(|b| parse_date(b).is_some_and(|d| d > current_date))
        .last()
}

pub fn is_latest<S: AsRef<str>>(name: &str, all_branches: &[S]) -> bool {
    if !is_release_branch(name) {
        return false;
    }
    sort_descending(all_branches)
        .first()
        .is_some_and(|latest| latest == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn test_is_release_branch() {
        assert!(is_release_branch("release/20240101"));
        assert!(!is_release_branch("release/2024011"));
        assert!(!is_release_branch("release/202401011"));
        assert!(!is_release_branch("Release/20240101"));
        assert!(!is_release_branch("release/2024-01-01"));
        assert!(!is_release_branch("feature/release/20240101"));
        assert!(!is_release_branch(""));
        assert!(!is_release_branch("   "));
        assert!(!is_release_branch("release/٢٠٢٤٠١٠١"));
    }

    #[test]
    fn test_parse_date_round_trips_calendar_dates() {
        for (y, m, d) in [(2024, 1, 1), (2024, 2, 29), (1999, 12, 31), (2030, 6, 15)] {
            let name = format!("release/{y:04}{m:02}{d:02}");
            let parsed = parse_date(&name).unwrap();
            assert_eq!((parsed.year(), parsed.month(), parsed.day()), (y, m, d));
            assert_eq!(parsed.timestamp() % 86_400, 0);
        }
    }

    #[test]
    fn test_parse_date_rejects_invalid() {
        assert!(parse_date("release/20230229").is_none());
        assert!(parse_date("release/20241301").is_none());
        assert!(parse_date("release/20240100").is_none());
        assert!(parse_date("main").is_none());
        assert!(parse_date("release/abc").is_none());
    }

    #[test]
    fn test_sort_descending_filters_and_orders() {
        let branches = [
            "release/20240115",
            "main",
            "release/20240301",
            "release/20231201",
            "release/20240230",
        ];
        assert_eq!(
            sort_descending(&branches),
            vec!["release/20240301", "release/20240115", "release/20231201"]
        );
    }

    #[test]
    fn test_sort_descending_is_idempotent() {
        let once = sort_descending(&["release/20240101", "release/20250101", "release/20240601"]);
        let twice = sort_descending(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_find_next_newer_returns_nearest() {
        let all = ["release/20240115", "release/20240201"];
        assert_eq!(
            find_next_newer("release/20240101", &all),
            Some("release/20240115".to_string())
        );
    }

    #[test]
    fn test_find_next_newer_on_latest_is_none() {
        let all = ["release/20240101", "release/20240115", "release/20240201"];
        assert_eq!(find_next_newer("release/20240201", &all), None);
    }

    #[test]
    fn test_find_next_newer_with_invalid_current() {
        let all = ["release/20240115"];
        assert_eq!(find_next_newer("main", &all), None);
    }

    #[test]
    fn test_is_latest_holds_for_exactly_one() {
        let all = ["release/20240101", "release/20240115", "release/20240201", "develop"];
        let latest: Vec<_> = all.iter().filter(|b| is_latest(b, &all)).collect();
        assert_eq!(latest, vec![&"release/20240201"]);
        assert!(!is_latest("develop", &all));
        assert!(!is_latest("release/20240101", &all));
    }
}
