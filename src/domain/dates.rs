//! Canonical monthly dates. The relational store keys monthly rows on the
//! string `YYYY/MM`; source documents carry `YYYY-MM`, `YYYY/MM`, `YYYYMM`
//! or full ISO-8601 timestamps depending on which client wrote them.

use chrono::{Months, NaiveDate};

/// Normalizes a spending/validity date to the canonical `YYYY/MM` form.
///
/// Accepts `YYYY-MM`, `YYYY/MM`, `YYYYMM` and ISO-8601 prefixes (first seven
/// characters when the input is at least that long). Empty and unrecognized
/// inputs pass through unchanged, so the function is a retraction:
/// `canonical_month(canonical_month(x)) == canonical_month(x)`.
pub fn canonical_month(date: &str) -> String {
    if date.is_empty() {
        return String::new();
    }

    let digits: String = date.chars().filter(|c| *c != '-' && *c != '/').collect();
    if digits.len() == 6 && digits.chars().all(|c| c.is_ascii_digit()) {
        return format!("{}/{}", &digits[..4], &digits[4..]);
    }

    if date.len() >= 7 && date.is_char_boundary(4) && date.is_char_boundary(5) && date.is_char_boundary(7) {
        return format!("{}/{}", &date[..4], &date[5..7]);
    }

    date.to_string()
}

/// Parses a `YYYY/MM` or `YYYY-MM` string into the first day of that month.
/// Anything else, including the empty string, is `None`.
pub fn parse_month(date: &str) -> Option<NaiveDate> {
    if date.is_empty() {
        return None;
    }

    let normalized = date.replace('-', "/");
    let mut parts = normalized.split('/');
    let year: i32 = parts.next()?.parse().ok()?;
    let month: u32 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }

    NaiveDate::from_ymd_opt(year, month, 1)
}

/// Adds `months` to a canonical month and returns the result in `YYYY/MM`.
pub fn add_months(date: &str, months: u32) -> Option<String> {
    let start = parse_month(date)?;
    let shifted = start.checked_add_months(Months::new(months))?;
    Some(shifted.format("%Y/%m").to_string())
}

/// All months from `start` through `end` inclusive, in canonical form and
/// ascending order. Empty when either bound fails to parse or `start > end`.
pub fn month_range(start: &str, end: &str) -> Vec<String> {
    let Some(mut cursor) = parse_month(start) else {
        return Vec::new();
    };
    let Some(end) = parse_month(end) else {
        return Vec::new();
    };

    let mut months = Vec::new();
    while cursor <= end {
        months.push(cursor.format("%Y/%m").to_string());
        match cursor.checked_add_months(Months::new(1)) {
            Some(next) => cursor = next,
            None => break,
        }
    }
    months
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_every_accepted_format() {
        assert_eq!(canonical_month("2024-03"), "2024/03");
        assert_eq!(canonical_month("2024/03"), "2024/03");
        assert_eq!(canonical_month("202403"), "2024/03");
        assert_eq!(canonical_month("2026-03-01T03:00:00Z"), "2026/03");
        assert_eq!(canonical_month("2024-03-15"), "2024/03");
    }

    #[test]
    fn unrecognized_input_passes_through() {
        assert_eq!(canonical_month(""), "");
        assert_eq!(canonical_month("march"), "march");
        assert_eq!(canonical_month("24-03"), "24-03");
    }

    #[test]
    fn canonical_month_is_a_retraction() {
        for input in [
            "2024-03",
            "2024/03",
            "202403",
            "2026-03-01T03:00:00Z",
            "",
            "march",
            "24-03",
            "garbage-value",
        ] {
            let once = canonical_month(input);
            assert_eq!(canonical_month(&once), once, "input: {input}");
        }
    }

    #[test]
    fn parses_month_to_first_of_month() {
        assert_eq!(
            parse_month("2024/03"),
            Some(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
        );
        assert_eq!(
            parse_month("2024-12"),
            Some(NaiveDate::from_ymd_opt(2024, 12, 1).unwrap())
        );
        assert_eq!(parse_month(""), None);
        assert_eq!(parse_month("2024"), None);
        assert_eq!(parse_month("2024/13"), None);
        assert_eq!(parse_month("2026-03-01T03:00:00Z"), None);
    }

    #[test]
    fn adds_months_across_year_boundaries() {
        assert_eq!(add_months("2024/11", 1).as_deref(), Some("2024/12"));
        assert_eq!(add_months("2024/12", 1).as_deref(), Some("2025/01"));
        assert_eq!(add_months("2024/01", 14).as_deref(), Some("2025/03"));
        assert_eq!(add_months("nonsense", 1), None);
    }

    #[test]
    fn month_range_is_inclusive_and_ordered() {
        assert_eq!(
            month_range("2024/11", "2025/02"),
            vec!["2024/11", "2024/12", "2025/01", "2025/02"]
        );
        assert_eq!(month_range("2024/05", "2024/05"), vec!["2024/05"]);
    }

    #[test]
    fn month_range_is_empty_when_start_exceeds_end() {
        assert!(month_range("2024/05", "2024/04").is_empty());
        assert!(month_range("", "2024/04").is_empty());
        assert!(month_range("2024/05", "").is_empty());
    }
}
