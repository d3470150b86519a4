use chrono::NaiveDate;
use regex::Regex;
use std::sync::LazyLock;

/// Fallback date formats, tried in order after any explicitly configured format. Two-digit
/// years come before four-digit ones because `%Y` also accepts `25`.
pub const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%m/%d/%y", "%m/%d/%Y", "%d/%m/%Y", "%Y/%m/%d", "%m-%d-%Y", "%d-%m-%Y", "%Y%m%d",
    "%b %d, %Y", "%d %b %Y",
];

static NON_ALNUM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Parses a statement date, trying `explicit` first and then each of [`DATE_FORMATS`].
pub fn parse_date(s: &str, explicit: Option<&str>) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    explicit
        .into_iter()
        .chain(DATE_FORMATS.iter().copied())
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

/// Lowercases a header cell and collapses runs of non-alphanumerics to a single space,
/// so `Transaction_Date`, `transaction date` and ` TRANSACTION-DATE ` all compare equal.
pub fn normalize_header(s: &str) -> String {
    NON_ALNUM
        .replace_all(&s.trim().to_lowercase(), " ")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parse_date_iso() {
        assert_eq!(parse_date("2024-01-15", None), Some(ymd(2024, 1, 15)));
    }

    #[test]
    fn parse_date_us_slash() {
        assert_eq!(parse_date("01/15/2024", None), Some(ymd(2024, 1, 15)));
        assert_eq!(parse_date("10/18/25", None), Some(ymd(2025, 10, 18)));
    }

    #[test]
    fn parse_date_explicit_format_wins() {
        // Ambiguous day/month resolved by the configured format.
        assert_eq!(parse_date("03/04/2024", Some("%d/%m/%Y")), Some(ymd(2024, 4, 3)));
        assert_eq!(parse_date("03/04/2024", None), Some(ymd(2024, 3, 4)));
    }

    #[test]
    fn parse_date_named_month() {
        assert_eq!(parse_date("Jan 05, 2024", None), Some(ymd(2024, 1, 5)));
        assert_eq!(parse_date("5 Jan 2024", None), Some(ymd(2024, 1, 5)));
    }

    #[test]
    fn parse_date_invalid() {
        assert_eq!(parse_date("not-a-date", None), None);
        assert_eq!(parse_date("", None), None);
    }

    #[test]
    fn normalize_header_collapses_punctuation() {
        assert_eq!(normalize_header("Transaction_Date"), "transaction date");
        assert_eq!(normalize_header(" POSTING-DATE "), "posting date");
        assert_eq!(normalize_header("Check or Slip #"), "check or slip");
    }
}
