//! Tolerant parsing of RFC 5322 `Date` header values.

use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Utc};
use tracing::debug;

/// Parse a mail date string in the common formats seen in the wild.
///
/// Tries RFC 2822, then ISO 8601, then a table of broken real-world variants,
/// then named-timezone replacement, and finally `mail-parser` as a last
/// resort. Returns `None` when nothing matches.
///
/// Legacy two-digit-century years (`13 Dec 101`) are rejected: they predate
/// any real mail and only appear in corrupt headers.
pub fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    let trimmed = date_str.trim();
    if trimmed.is_empty() {
        return None;
    }

    // RFC 2822 obs-year mapping would turn "101" into 2001; such headers are
    // corrupt and must stay unparsed.
    if has_legacy_year(trimmed) {
        debug!(date = trimmed, "Rejecting legacy short year");
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return plausible(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return plausible(dt.with_timezone(&Utc));
    }

    // Remove leading day-of-week: "Thu, " or "Thu "
    let no_dow = strip_day_of_week(trimmed);

    let formats = [
        "%d %b %Y %H:%M:%S %z",
        "%d %b %Y %H:%M:%S",
        "%d %b %Y %H:%M %z",
        "%d %b %Y %H:%M",
        "%b %d %H:%M:%S %Y",
        "%Y-%m-%dT%H:%M:%S%z",
        "%Y-%m-%d %H:%M:%S %z",
        "%Y-%m-%d %H:%M:%S",
    ];

    for fmt in &formats {
        if let Ok(dt) = DateTime::parse_from_str(&no_dow, fmt) {
            return plausible(dt.with_timezone(&Utc));
        }
        if let Ok(ndt) = NaiveDateTime::parse_from_str(&no_dow, fmt) {
            return plausible(Utc.from_utc_datetime(&ndt));
        }
    }

    // Replace well-known timezone abbreviations with offsets and retry.
    let replaced = replace_named_tz(&no_dow);
    if replaced != no_dow {
        for fmt in &formats {
            if let Ok(dt) = DateTime::parse_from_str(&replaced, fmt) {
                return plausible(dt.with_timezone(&Utc));
            }
        }
    }

    if let Some(dt) = mail_parser_date(trimmed) {
        return plausible(dt);
    }

    debug!(date = trimmed, "Could not parse date");
    None
}

/// Reject parses that landed on an implausible year.
fn plausible(dt: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if dt.year() < 1000 {
        None
    } else {
        Some(dt)
    }
}

/// Detect a bare 1-3 digit year token (`13 Dec 101 …`).
///
/// A standalone digit run too large to be a day-of-month but shorter than a
/// real year can only be a truncated century.
fn has_legacy_year(s: &str) -> bool {
    s.split_whitespace().any(|token| {
        token.len() <= 3
            && !token.is_empty()
            && token.bytes().all(|b| b.is_ascii_digit())
            && token.parse::<u32>().is_ok_and(|n| n > 31)
    })
}

/// Attempt to parse a date using `mail-parser`'s built-in parser.
fn mail_parser_date(input: &str) -> Option<DateTime<Utc>> {
    use mail_parser::MessageParser;

    // Wrap input in a minimal RFC 5322 message so mail-parser can parse it
    let fake_msg = format!("Date: {input}\n\n");
    let parser = MessageParser::default();
    let parsed = parser.parse(fake_msg.as_bytes())?;
    let dt = parsed.date()?.to_rfc3339();
    DateTime::parse_from_rfc3339(&dt)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Strip leading day-of-week prefix (e.g. "Thu, " or "Thu ").
fn strip_day_of_week(s: &str) -> String {
    let days = [
        "Mon,", "Tue,", "Wed,", "Thu,", "Fri,", "Sat,", "Sun,", "Mon ", "Tue ", "Wed ", "Thu ",
        "Fri ", "Sat ", "Sun ",
    ];
    for day in &days {
        if let Some(rest) = s.strip_prefix(day) {
            return rest.trim().to_string();
        }
    }
    s.to_string()
}

/// Replace well-known timezone abbreviations with numeric offsets.
fn replace_named_tz(s: &str) -> String {
    let tzs = [
        ("EST", "-0500"),
        ("EDT", "-0400"),
        ("CST", "-0600"),
        ("CDT", "-0500"),
        ("MST", "-0700"),
        ("MDT", "-0600"),
        ("PST", "-0800"),
        ("PDT", "-0700"),
        ("GMT", "+0000"),
        ("UTC", "+0000"),
        ("CET", "+0100"),
        ("CEST", "+0200"),
        ("JST", "+0900"),
    ];
    let mut result = s.to_string();
    for (name, offset) in &tzs {
        if result.ends_with(name) {
            let pos = result.len() - name.len();
            result.replace_range(pos.., offset);
            return result;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_rfc2822() {
        let dt = parse_date("Thu, 04 Jan 2024 10:00:00 +0000").unwrap();
        assert_eq!(dt.format("%Y-%m-%d").to_string(), "2024-01-04");
    }

    #[test]
    fn test_parse_date_timezone_conversion() {
        // 23:30 at -0300 is 02:30 UTC the next day
        let dt = parse_date("Fri, 05 Jan 2024 23:30:00 -0300").unwrap();
        assert_eq!(dt.format("%Y-%m-%d %H:%M").to_string(), "2024-01-06 02:30");
    }

    #[test]
    fn test_parse_date_without_dow() {
        assert!(parse_date("04 Jan 2024 10:00:00 +0000").is_some());
    }

    #[test]
    fn test_parse_date_named_tz() {
        assert!(parse_date("Thu, 04 Jan 2024 10:00:00 EST").is_some());
    }

    #[test]
    fn test_parse_date_iso8601() {
        assert!(parse_date("2024-01-04T10:00:00Z").is_some());
    }

    #[test]
    fn test_parse_date_missing_seconds() {
        assert!(parse_date("Thu, 04 Jan 2024 10:00 +0000").is_some());
    }

    #[test]
    fn test_two_digit_century_year_rejected() {
        // Legacy unparsable date seen in real archives
        assert!(parse_date("Thu, 13 Dec 101 15:30 WET").is_none());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(parse_date("not a date").is_none());
        assert!(parse_date("").is_none());
    }
}
