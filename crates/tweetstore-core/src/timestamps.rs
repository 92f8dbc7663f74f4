use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

static OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%z",
    "%a %b %d %H:%M:%S %z %Y",
];

static NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

/// Parses a source timestamp into UTC. Values without an offset are taken as UTC.
///
/// Returns `None` for anything unrecognized; callers decide what stands in for it.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(trimmed, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    #[test]
    fn naive_values_are_utc() {
        assert_eq!(
            parse_timestamp("2021-02-01 10:00:00"),
            Some(utc(2021, 2, 1, 10, 0, 0))
        );
        assert_eq!(
            parse_timestamp("2021-02-01 10:00"),
            Some(utc(2021, 2, 1, 10, 0, 0))
        );
    }

    #[test]
    fn offsets_are_normalized_to_utc() {
        assert_eq!(
            parse_timestamp("2021-02-01T10:00:00+02:00"),
            Some(utc(2021, 2, 1, 8, 0, 0))
        );
        assert_eq!(
            parse_timestamp("2021-02-01 10:00:00+0000"),
            Some(utc(2021, 2, 1, 10, 0, 0))
        );
        assert_eq!(
            parse_timestamp("2021-02-01T10:00:00.250Z").map(|dt| dt.timestamp()),
            Some(utc(2021, 2, 1, 10, 0, 0).timestamp())
        );
    }

    #[test]
    fn legacy_twitter_format_is_accepted() {
        assert_eq!(
            parse_timestamp("Mon Feb 01 10:00:00 +0000 2021"),
            Some(utc(2021, 2, 1, 10, 0, 0))
        );
    }

    #[test]
    fn bare_dates_are_midnight() {
        assert_eq!(parse_timestamp("2021-02-01"), Some(utc(2021, 2, 1, 0, 0, 0)));
    }

    #[test]
    fn garbage_is_rejected() {
        assert_eq!(parse_timestamp("not-a-date"), None);
        assert_eq!(parse_timestamp("   "), None);
        assert_eq!(parse_timestamp("2021-13-45 99:00:00"), None);
    }
}
