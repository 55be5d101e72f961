//! Small pure helpers: flexible date parsing and relative-time rendering.

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Parses a date given in one of several accepted formats.
///
/// Accepted, in order of preference:
/// - RFC 3339 (`2024-05-01T12:00:00Z`)
/// - Date and time without a zone (`2024-05-01 12:00:00`), assumed UTC
/// - Date only (`2024-05-01`), midnight UTC
/// - Day-first date (`01/05/2024`), midnight UTC
///
/// # Errors
///
/// Returns an error naming the accepted formats when none of them match.
pub fn parse_date(input: &str) -> Result<DateTime<Utc>> {
    let input = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(input, "%Y-%m-%d %H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    for format in ["%Y-%m-%d", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(input, format) {
            let naive = date
                .and_hms_opt(0, 0, 0)
                .expect("midnight is always a valid time");
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }

    bail!(
        "Could not parse date '{}' (expected RFC 3339, YYYY-MM-DD HH:MM:SS, YYYY-MM-DD, or DD/MM/YYYY)",
        input
    )
}

/// Renders a timestamp as a human-relative phrase ("2 hours ago", "in 3 days").
///
/// Thresholds follow the usual humanization conventions: up to 45 seconds is
/// "just now", unit boundaries round to the nearest sensible phrase rather
/// than switching exactly at 60/24/etc.
pub fn humanize_since(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = now.signed_duration_since(then);
    let future = delta.num_seconds() < 0;
    let seconds = delta.num_seconds().unsigned_abs();

    let phrase = match seconds {
        0..=44 => return "just now".to_string(),
        45..=89 => "a minute".to_string(),
        90..=2_699 => format!("{} minutes", (seconds + 30) / 60),
        2_700..=5_399 => "an hour".to_string(),
        5_400..=79_199 => format!("{} hours", (seconds + 1_800) / 3_600),
        79_200..=129_599 => "a day".to_string(),
        129_600..=2_246_399 => format!("{} days", (seconds + 43_200) / 86_400),
        2_246_400..=3_887_999 => "a month".to_string(),
        3_888_000..=29_807_999 => {
            format!("{} months", ((seconds + 1_296_000) / 2_592_000).max(2))
        }
        29_808_000..=47_303_999 => "a year".to_string(),
        _ => format!("{} years", ((seconds + 15_768_000) / 31_536_000).max(2)),
    };

    if future {
        format!("in {}", phrase)
    } else {
        format!("{} ago", phrase)
    }
}
