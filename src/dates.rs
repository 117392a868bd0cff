//! Heuristic parsing of chapter upload dates.
//!
//! Listing pages phrase release dates dozens of ways: absolute dates
//! with or without ordinal suffixes, "2 hours ago" relatives, or
//! locale words for today/yesterday. Everything collapses to a single
//! epoch-millisecond value; `0` means the date is unknown and the
//! chapter is unordered by date. The reference time zone is UTC.

use chrono::{DateTime, Duration, Months, NaiveDate, NaiveTime, TimeZone, Utc};
use regex::Regex;
use std::sync::LazyLock;

/// First run of digits in a relative phrase.
static NUMBER_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)").unwrap());

/// Ordinal day suffixes, "January 3rd, 2024" style.
static ORDINAL_SUFFIX_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)(st|nd|rd|th)").unwrap());

/// Calendar unit of a relative date phrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

/// Word tables for one locale's date phrases.
///
/// Unit words are resolved first-match over the declared order, so an
/// ambiguous token resolves to whichever entry is listed first. The
/// `id` table lists Indonesian words before the English ones for this
/// reason: "minggu" (week) must win over the English "min" prefix.
#[derive(Debug, Clone)]
pub struct DateVocabulary {
    today: &'static [&'static str],
    yesterday: &'static [&'static str],
    ago_markers: &'static [&'static str],
    units: &'static [(&'static str, DateUnit)],
}

impl DateVocabulary {
    /// English-only table.
    pub fn english() -> Self {
        Self {
            today: &["today"],
            yesterday: &["yesterday"],
            ago_markers: &["ago"],
            units: &[
                ("min", DateUnit::Minute),
                ("hour", DateUnit::Hour),
                ("day", DateUnit::Day),
                ("week", DateUnit::Week),
                ("month", DateUnit::Month),
                ("year", DateUnit::Year),
            ],
        }
    }

    /// Indonesian table, with the English words as a tail so mixed-
    /// language sites keep working.
    pub fn indonesian() -> Self {
        Self {
            today: &["hari ini", "today"],
            yesterday: &["kemarin", "yesterday"],
            ago_markers: &["lalu", "ago"],
            units: &[
                ("menit", DateUnit::Minute),
                ("jam", DateUnit::Hour),
                ("minggu", DateUnit::Week),
                ("bulan", DateUnit::Month),
                ("tahun", DateUnit::Year),
                ("hari", DateUnit::Day),
                ("min", DateUnit::Minute),
                ("hour", DateUnit::Hour),
                ("day", DateUnit::Day),
                ("week", DateUnit::Week),
                ("month", DateUnit::Month),
                ("year", DateUnit::Year),
            ],
        }
    }

    /// Table for a locale code; unknown codes fall back to English.
    pub fn for_locale(code: &str) -> Self {
        match code {
            "id" => Self::indonesian(),
            _ => Self::english(),
        }
    }

    fn unit_of(&self, text: &str) -> Option<DateUnit> {
        self.units
            .iter()
            .find(|(word, _)| text.contains(word))
            .map(|(_, unit)| *unit)
    }
}

/// Parses a free-text date expression into epoch milliseconds, `0` if
/// nothing matches. `format` is the site's absolute-date pattern.
pub fn parse_chapter_date(text: &str, format: &str, vocab: &DateVocabulary) -> i64 {
    parse_chapter_date_at(text, format, vocab, Utc::now())
}

/// Same as [`parse_chapter_date`] with an explicit reference instant.
pub fn parse_chapter_date_at(
    text: &str,
    format: &str,
    vocab: &DateVocabulary,
    now: DateTime<Utc>,
) -> i64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0;
    }
    let lower = trimmed.to_lowercase();

    if vocab.today.iter().any(|w| lower.contains(w)) {
        return start_of_day(now);
    }
    if vocab.yesterday.iter().any(|w| lower.contains(w)) {
        return start_of_day(now - Duration::days(1));
    }

    if vocab.ago_markers.iter().any(|w| lower.contains(w))
        && let Some(n) = NUMBER_REGEX
            .captures(&lower)
            .and_then(|c| c[1].parse::<u32>().ok())
        && let Some(unit) = vocab.unit_of(&lower)
    {
        return subtract_unit(now, unit, n).timestamp_millis();
    }

    // Ordinal suffixes break fixed-pattern parsing; strip them first.
    let stripped = ORDINAL_SUFFIX_REGEX.replace_all(trimmed, "$1");
    if let Ok(date) = NaiveDate::parse_from_str(stripped.trim(), format) {
        return Utc
            .from_utc_datetime(&date.and_time(NaiveTime::MIN))
            .timestamp_millis();
    }

    log::debug!("unparseable chapter date: '{trimmed}'");
    0
}

fn start_of_day(t: DateTime<Utc>) -> i64 {
    Utc.from_utc_datetime(&t.date_naive().and_time(NaiveTime::MIN))
        .timestamp_millis()
}

/// Month and year go through calendar-field subtraction; the rest are
/// fixed durations.
fn subtract_unit(now: DateTime<Utc>, unit: DateUnit, n: u32) -> DateTime<Utc> {
    match unit {
        DateUnit::Minute => now - Duration::minutes(i64::from(n)),
        DateUnit::Hour => now - Duration::hours(i64::from(n)),
        DateUnit::Day => now - Duration::days(i64::from(n)),
        DateUnit::Week => now - Duration::weeks(i64::from(n)),
        DateUnit::Month => now.checked_sub_months(Months::new(n)).unwrap_or(now),
        DateUnit::Year => now
            .checked_sub_months(Months::new(n.saturating_mul(12)))
            .unwrap_or(now),
    }
}
