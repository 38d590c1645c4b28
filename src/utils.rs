//! Shared utility functions for the statistics pipeline

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::ConfigError;

/// Rewrite a public cbr.ru URL so it goes through an internal gateway prefix
///
/// The last path segment of the prefix (e.g. `cbr`, `rosstat`, `moex`) is looked
/// up in the URL after the scheme. Everything from the start of the URL up to
/// the first `.ru` following that segment is replaced by the prefix, and the
/// rest of the URL is appended.
///
/// # Examples
///
/// ```
/// use cbr_stats::utils::apply_inbank_prefix;
///
/// assert_eq!(
///     apply_inbank_prefix("https://gate.x/ex/cbr", "https://www.cbr.ru/a/b").unwrap(),
///     "https://gate.x/ex/cbr/a/b"
/// );
/// assert!(apply_inbank_prefix("https://gate.x/ex/moex", "https://www.cbr.ru/a/b").is_err());
/// ```
pub fn apply_inbank_prefix(prefix: &str, original_url: &str) -> Result<String, ConfigError> {
    let prefix = prefix.trim_end_matches('/');
    if !prefix.contains('/') {
        return Err(ConfigError::InvalidPrefix(format!(
            "prefix must contain at least one '/': {prefix}"
        )));
    }

    let tail = prefix.rsplit('/').next().unwrap_or_default().trim();
    if tail.is_empty() {
        return Err(ConfigError::InvalidPrefix(format!(
            "prefix must end with a non-empty segment (e.g. '/cbr'): {prefix}"
        )));
    }

    let url = original_url.trim();
    // ASCII lowercasing keeps byte offsets aligned with `url`
    let lower = url.to_ascii_lowercase();

    let start = lower.find("://").map(|pos| pos + 3).unwrap_or(0);
    let tail_pos = lower[start..]
        .find(&tail.to_ascii_lowercase())
        .map(|pos| pos + start)
        .ok_or_else(|| {
            ConfigError::InvalidPrefix(format!("segment '{tail}' not found in {url}"))
        })?;

    let ru_pos = lower[tail_pos..]
        .find(".ru")
        .map(|pos| pos + tail_pos)
        .ok_or_else(|| {
            ConfigError::InvalidPrefix(format!(
                "no '.ru' domain after segment '{tail}' in {url}"
            ))
        })?;

    let remainder = &url[ru_pos + 3..];
    if remainder.starts_with(['/', '?', '#']) {
        Ok(format!("{prefix}{remainder}"))
    } else {
        Ok(format!("{prefix}/{remainder}"))
    }
}

static TRAILING_FOOTNOTE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s*\d]+$").unwrap());

static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})-(\d{1,2})-(\d{1,2})").unwrap());

static DAY_MONTH_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})[._\-\s/](\d{1,2})[._\-\s/](\d{4})").unwrap());

static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

static MONTH_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2})[._\-\s/](\d{4})$").unwrap());

/// Collapse runs of whitespace (including non-breaking spaces) into one space and trim
pub fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Remove footnote markers appended to header or region text
///
/// Only the trailing run of whitespace, digits and asterisks is removed:
/// `"Объем средств2 *"` becomes `"Объем средств"`, while `"Кредиты 2 уровня"`
/// is kept as is.
pub fn strip_footnote(value: &str) -> String {
    let collapsed = collapse_whitespace(value);
    TRAILING_FOOTNOTE.replace(&collapsed, "").trim_end().to_string()
}

/// Extract a date from a publisher filename (e.g. `escrow_01022024.xlsx`)
///
/// The compact `DDMMYYYY` form is tried first since it is what the monthly
/// files use; separated day-first forms are accepted as well.
pub fn extract_date_from_filename(name: &str) -> Option<NaiveDate> {
    let stem = name.rsplit(['/', '\\']).next().unwrap_or(name);
    compact_date(stem)
        .or_else(|| parse_day_first_date(stem))
}

/// Parse a day-first date token such as a sheet name
///
/// Accepted forms, in order: ISO `YYYY-MM-DD`, `DD.MM.YYYY` (any of `._-/` or
/// space as separator), compact `DDMMYYYY`, and `MM.YYYY` (first day of month).
pub fn parse_day_first_date(token: &str) -> Option<NaiveDate> {
    let token = token.trim();
    captures_to_date(&ISO_DATE, token, DateOrder::YearMonthDay)
        .or_else(|| captures_to_date(&DAY_MONTH_YEAR, token, DateOrder::DayMonthYear))
        .or_else(|| compact_date(token))
        .or_else(|| captures_to_date(&MONTH_YEAR, token, DateOrder::MonthYear))
}

#[derive(Clone, Copy)]
enum DateOrder {
    YearMonthDay,
    DayMonthYear,
    MonthYear,
}

fn captures_to_date(re: &Regex, text: &str, order: DateOrder) -> Option<NaiveDate> {
    re.captures_iter(text)
        .find_map(|caps| date_from_captures(&caps, order))
}

/// First run of exactly eight digits that reads as a valid `DDMMYYYY` date
fn compact_date(text: &str) -> Option<NaiveDate> {
    DIGIT_RUN
        .find_iter(text)
        .map(|m| m.as_str())
        .filter(|run| run.len() == 8)
        .find_map(|run| {
            let day = run[0..2].parse().ok()?;
            let month = run[2..4].parse().ok()?;
            let year = run[4..8].parse().ok()?;
            NaiveDate::from_ymd_opt(year, month, day)
        })
}

fn date_from_captures(caps: &regex::Captures, order: DateOrder) -> Option<NaiveDate> {
    let num = |idx: usize| -> Option<u32> { caps.get(idx)?.as_str().parse().ok() };

    let (year, month, day) = match order {
        DateOrder::YearMonthDay => (num(1)?, num(2)?, num(3)?),
        DateOrder::DayMonthYear => (num(3)?, num(2)?, num(1)?),
        DateOrder::MonthYear => (num(2)?, num(1)?, 1),
    };

    NaiveDate::from_ymd_opt(i32::try_from(year).ok()?, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_inbank_prefix_basic() {
        assert_eq!(
            apply_inbank_prefix("https://gate.x/ex/cbr", "https://www.cbr.ru/a/b").unwrap(),
            "https://gate.x/ex/cbr/a/b"
        );
    }

    #[test]
    fn test_apply_inbank_prefix_trailing_slash_on_prefix() {
        assert_eq!(
            apply_inbank_prefix(
                "https://gate.rshb.ru/ex/cbr/",
                "https://www.cbr.ru/banking_sector/credit/FullCoList/"
            )
            .unwrap(),
            "https://gate.rshb.ru/ex/cbr/banking_sector/credit/FullCoList/"
        );
    }

    #[test]
    fn test_apply_inbank_prefix_case_insensitive_segment() {
        assert_eq!(
            apply_inbank_prefix("https://gate.x/ex/cbr", "https://WWW.CBR.RU/Content/x.xlsx")
                .unwrap(),
            "https://gate.x/ex/cbr/Content/x.xlsx"
        );
    }

    #[test]
    fn test_apply_inbank_prefix_query_remainder() {
        assert_eq!(
            apply_inbank_prefix("https://gate.x/ex/cbr", "https://cbr.ru?x=1").unwrap(),
            "https://gate.x/ex/cbr?x=1"
        );
    }

    #[test]
    fn test_apply_inbank_prefix_adds_separator() {
        assert_eq!(
            apply_inbank_prefix("https://gate.x/ex/cbr", "https://cbr.rufoo").unwrap(),
            "https://gate.x/ex/cbr/foo"
        );
    }

    #[test]
    fn test_apply_inbank_prefix_longer_domain() {
        assert_eq!(
            apply_inbank_prefix("https://gate.x/ex/rosstat", "https://rosstat.gov.ru/folder/210")
                .unwrap(),
            "https://gate.x/ex/rosstat/folder/210"
        );
    }

    #[test]
    fn test_apply_inbank_prefix_tail_missing() {
        let err = apply_inbank_prefix("https://gate.x/ex/moex", "https://www.cbr.ru/a/b");
        assert!(matches!(err, Err(ConfigError::InvalidPrefix(_))));
    }

    #[test]
    fn test_apply_inbank_prefix_no_ru_domain() {
        let err = apply_inbank_prefix("https://gate.x/ex/cbr", "https://www.cbr.com/a/b");
        assert!(matches!(err, Err(ConfigError::InvalidPrefix(_))));
    }

    #[test]
    fn test_apply_inbank_prefix_without_slash() {
        assert!(apply_inbank_prefix("cbr", "https://www.cbr.ru/a").is_err());
    }

    #[test]
    fn test_strip_footnote_trailing_digits_and_stars() {
        assert_eq!(strip_footnote("Объем средств на счетах эскроу1"), "Объем средств на счетах эскроу");
        assert_eq!(strip_footnote("Количество договоров 2 *"), "Количество договоров");
        assert_eq!(strip_footnote("Москва  "), "Москва");
    }

    #[test]
    fn test_strip_footnote_keeps_embedded_digits() {
        assert_eq!(strip_footnote("Кредиты 2 уровня"), "Кредиты 2 уровня");
    }

    #[test]
    fn test_strip_footnote_collapses_whitespace() {
        assert_eq!(strip_footnote("Объем\u{a0}  средств\n3"), "Объем средств");
    }

    #[test]
    fn test_extract_date_from_filename_compact() {
        assert_eq!(
            extract_date_from_filename("escrow_01022024.xlsx"),
            NaiveDate::from_ymd_opt(2024, 2, 1)
        );
    }

    #[test]
    fn test_extract_date_from_filename_with_path() {
        assert_eq!(
            extract_date_from_filename("/tmp/work/31122023.xlsx"),
            NaiveDate::from_ymd_opt(2023, 12, 31)
        );
    }

    #[test]
    fn test_extract_date_from_filename_skips_non_date_runs() {
        assert_eq!(
            extract_date_from_filename("12345678_01022024.xlsx"),
            NaiveDate::from_ymd_opt(2024, 2, 1)
        );
        assert_eq!(extract_date_from_filename("escrow_010220245.xlsx"), None);
    }

    #[test]
    fn test_extract_date_from_filename_missing() {
        assert_eq!(extract_date_from_filename("Debt_sme.xlsx"), None);
    }

    #[test]
    fn test_parse_day_first_date_forms() {
        let feb_first = NaiveDate::from_ymd_opt(2024, 2, 1);
        assert_eq!(parse_day_first_date("01.02.2024"), feb_first);
        assert_eq!(parse_day_first_date("01_02_2024"), feb_first);
        assert_eq!(parse_day_first_date("1 2 2024"), feb_first);
        assert_eq!(parse_day_first_date("01022024"), feb_first);
        assert_eq!(parse_day_first_date("2024-02-01"), feb_first);
        assert_eq!(parse_day_first_date("02.2024"), feb_first);
    }

    #[test]
    fn test_parse_day_first_date_rejects_invalid() {
        assert_eq!(parse_day_first_date("32.01.2024"), None);
        assert_eq!(parse_day_first_date("Содержание"), None);
    }
}
