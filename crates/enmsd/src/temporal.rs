//! Temporal expression resolver.
//!
//! Time ranges are always re-derived here from the raw utterance, after
//! whichever tier matched. Tiers never get to decide time.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};
use enms_shared::time_range::{start_of_day, start_of_month, TimeRange};
use regex::Regex;
use std::sync::LazyLock;

static EXPLICIT_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:from|between)\s+(.+?)\s+(?:to|until|till|through|and)\s+(.+)")
        .expect("explicit range pattern")
});

static LAST_N: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:last|past|previous)\s+(\d+|one|two|three|four|five|six|seven|eight|nine|ten|eleven|twelve|twenty[- ]four|thirty)\s+(hours?|days?|weeks?|months?)\b",
    )
    .expect("last-n pattern")
});

/// Longest look-back a count may name; anything further is not a window
/// the plant has data for
const MAX_LOOKBACK_DAYS: i64 = 3650;

/// Most words a single day expression spans ("the 5th of March 2024")
const MAX_DAY_WORDS: usize = 5;

static LAST_UNIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:last|past)\s+(hour|day)\b").expect("last-unit pattern"));

static PERIOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(this|last|previous|past)\s+(week|month|year)\b").expect("period pattern")
});

static YESTERDAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\byesterday\b").expect("yesterday pattern"));

static TODAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(today|so far today|this morning)\b").expect("today pattern"));

static VAGUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(recently|lately|a while ago|earlier|the other day|some time ago)\b")
        .expect("vague pattern")
});

static NOW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(right now|now|currently|at the moment|current|live)\b").expect("now pattern")
});

static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})$").expect("iso date pattern"));

static MONTH_DAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^([a-z]+)\s+(\d{1,2})(?:st|nd|rd|th)?(?:,?\s+(\d{4}))?$").expect("month day pattern")
});

static DAY_MONTH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:the\s+)?(\d{1,2})(?:st|nd|rd|th)?\s+(?:of\s+)?([a-z]+)(?:,?\s+(\d{4}))?$")
        .expect("day month pattern")
});

/// Resolve the first temporal expression in `text` relative to `now`.
///
/// Precedence: explicit from/to, last N units, this/last period,
/// yesterday, today, vague wording (ambiguous), "now".
pub fn resolve_time_range(text: &str, now: DateTime<Utc>) -> Option<TimeRange> {
    if let Some(range) = explicit_range(text, now) {
        return Some(range);
    }

    if let Some(caps) = LAST_N.captures(text) {
        // Only a count too long for an i64 fails to parse
        let Some(count) = parse_count(&caps[1]) else {
            return Some(TimeRange::ambiguous());
        };
        return last_n(now, count, &caps[2].to_lowercase());
    }

    if let Some(caps) = LAST_UNIT.captures(text) {
        return last_n(now, 1, &caps[1].to_lowercase());
    }

    if let Some(caps) = PERIOD.captures(text) {
        let current = caps[1].eq_ignore_ascii_case("this");
        return period(now, current, &caps[2].to_lowercase());
    }

    if YESTERDAY.is_match(text) {
        return Some(TimeRange::yesterday(now));
    }
    if TODAY.is_match(text) {
        return Some(TimeRange::today(now));
    }
    if VAGUE.is_match(text) {
        return Some(TimeRange::ambiguous());
    }
    if NOW.is_match(text) {
        return Some(TimeRange::now(now));
    }
    None
}

fn explicit_range(text: &str, now: DateTime<Utc>) -> Option<TimeRange> {
    let caps = EXPLICIT_RANGE.captures(text)?;
    let from = parse_day(caps[1].trim(), now)?;
    let to = leading_day(&caps[2], now)?;
    let (first, last) = if from <= to { (from, to) } else { (to, from) };
    let end = (last + Duration::days(1)).min(now).max(first);
    let days = (end - first).num_days().max(1);
    Some(TimeRange::new(first, end, "custom").with_duration(format!("P{}D", days)))
}

/// The longest run of leading words that names a day. The end of a range
/// is usually followed by more of the question ("to March 5 for Boiler-1").
fn leading_day(s: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let words: Vec<&str> = s.split_whitespace().take(MAX_DAY_WORDS).collect();
    (1..=words.len()).rev().find_map(|n| {
        let phrase = words[..n].join(" ");
        parse_day(phrase.trim_end_matches(|c: char| matches!(c, '?' | '.' | '!' | ',')), now)
    })
}

/// Past `count` units. A count reaching further back than
/// `MAX_LOOKBACK_DAYS` resolves to an ambiguous range.
fn last_n(now: DateTime<Utc>, count: i64, unit: &str) -> Option<TimeRange> {
    if count <= 0 {
        return None;
    }
    let unit = unit.trim_end_matches('s');
    let days_per_unit = match unit {
        "hour" => 0,
        "day" => 1,
        "week" => 7,
        "month" => 30,
        _ => return None,
    };
    let too_far = if days_per_unit == 0 {
        count > MAX_LOOKBACK_DAYS * 24
    } else {
        count > MAX_LOOKBACK_DAYS / days_per_unit
    };
    if too_far {
        return Some(TimeRange::ambiguous());
    }

    let range = match unit {
        "hour" => TimeRange::last_hours(now, count),
        "day" => TimeRange::last_days(now, count),
        "week" => TimeRange::new(now - Duration::weeks(count), now, format!("last_{}_weeks", count))
            .with_duration(format!("P{}W", count)),
        "month" => TimeRange::new(
            now - Duration::days(30 * count),
            now,
            format!("last_{}_months", count),
        )
        .with_duration(format!("P{}M", count)),
        _ => return None,
    };
    Some(range)
}

fn period(now: DateTime<Utc>, current: bool, unit: &str) -> Option<TimeRange> {
    match unit {
        "week" => {
            let this_week = start_of_day(now) - Duration::days(now.weekday().num_days_from_monday() as i64);
            if current {
                Some(TimeRange::new(this_week, now, "this_week").with_duration("P1W"))
            } else {
                Some(
                    TimeRange::new(this_week - Duration::weeks(1), this_week, "last_week")
                        .with_duration("P1W"),
                )
            }
        }
        "month" => {
            if current {
                Some(TimeRange::this_month(now))
            } else {
                let this_month = start_of_month(now);
                let prev = start_of_month(this_month - Duration::days(1));
                Some(TimeRange::new(prev, this_month, "last_month").with_duration("P1M"))
            }
        }
        "year" => {
            let this_year = Utc.with_ymd_and_hms(now.year(), 1, 1, 0, 0, 0).single()?;
            if current {
                Some(TimeRange::new(this_year, now, "this_year").with_duration("P1Y"))
            } else {
                let prev = Utc.with_ymd_and_hms(now.year() - 1, 1, 1, 0, 0, 0).single()?;
                Some(TimeRange::new(prev, this_year, "last_year").with_duration("P1Y"))
            }
        }
        _ => None,
    }
}

fn parse_count(s: &str) -> Option<i64> {
    let lower = s.to_lowercase().replace('-', " ");
    let n = match lower.as_str() {
        "one" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        "eleven" => 11,
        "twelve" => 12,
        "twenty four" => 24,
        "thirty" => 30,
        digits => digits.parse().ok()?,
    };
    Some(n)
}

/// Start of the day named by `s`
fn parse_day(s: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let lower = s.to_lowercase();
    match lower.as_str() {
        "today" | "now" => return Some(start_of_day(now)),
        "yesterday" => return Some(start_of_day(now) - Duration::days(1)),
        _ => {}
    }

    if let Some(weekday) = parse_weekday(&lower) {
        let back = (now.weekday().num_days_from_monday() + 7 - weekday.num_days_from_monday()) % 7;
        return Some(start_of_day(now) - Duration::days(back as i64));
    }

    let date = if let Some(caps) = ISO_DATE.captures(&lower) {
        NaiveDate::from_ymd_opt(caps[1].parse().ok()?, caps[2].parse().ok()?, caps[3].parse().ok()?)?
    } else if let Some(caps) = MONTH_DAY.captures(&lower) {
        let month = parse_month(&caps[1])?;
        let day: u32 = caps[2].parse().ok()?;
        dated(now, month, day, caps.get(3).map(|m| m.as_str()))?
    } else if let Some(caps) = DAY_MONTH.captures(&lower) {
        let day: u32 = caps[1].parse().ok()?;
        let month = parse_month(&caps[2])?;
        dated(now, month, day, caps.get(3).map(|m| m.as_str()))?
    } else {
        return None;
    };

    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

/// Month/day without a year means the most recent such date
fn dated(now: DateTime<Utc>, month: u32, day: u32, year: Option<&str>) -> Option<NaiveDate> {
    if let Some(y) = year {
        return NaiveDate::from_ymd_opt(y.parse().ok()?, month, day);
    }
    let this_year = NaiveDate::from_ymd_opt(now.year(), month, day)?;
    if this_year > now.date_naive() {
        NaiveDate::from_ymd_opt(now.year() - 1, month, day)
    } else {
        Some(this_year)
    }
}

fn parse_month(s: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let lower = s.to_lowercase();
    if lower.len() < 3 {
        return None;
    }
    MONTHS
        .iter()
        .position(|m| lower.starts_with(m))
        .map(|i| i as u32 + 1)
}

fn parse_weekday(s: &str) -> Option<Weekday> {
    let day = match s.trim_start_matches("last ").trim_start_matches("on ") {
        "monday" => Weekday::Mon,
        "tuesday" => Weekday::Tue,
        "wednesday" => Weekday::Wed,
        "thursday" => Weekday::Thu,
        "friday" => Weekday::Fri,
        "saturday" => Weekday::Sat,
        "sunday" => Weekday::Sun,
        _ => return None,
    };
    Some(day)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Thursday 2024-03-14 15:00 UTC
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 14, 15, 0, 0).unwrap()
    }

    fn day(m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_today_and_yesterday() {
        let r = resolve_time_range("energy of boiler 1 today", now()).unwrap();
        assert_eq!(r.relative, "today");
        assert_eq!(r.start, Some(day(3, 14)));

        let r = resolve_time_range("what did it use yesterday?", now()).unwrap();
        assert_eq!(r.relative, "yesterday");
        assert_eq!(r.start, Some(day(3, 13)));
        assert_eq!(r.end, Some(day(3, 14)));
    }

    #[test]
    fn test_last_n_units() {
        let r = resolve_time_range("anomalies in the last 24 hours", now()).unwrap();
        assert_eq!(r.relative, "last_24_hours");
        assert_eq!(r.start, Some(now() - Duration::hours(24)));

        let r = resolve_time_range("energy over the past seven days", now()).unwrap();
        assert_eq!(r.relative, "last_7_days");

        let r = resolve_time_range("last 2 weeks", now()).unwrap();
        assert_eq!(r.start, Some(now() - Duration::weeks(2)));
    }

    #[test]
    fn test_last_hour_without_count() {
        let r = resolve_time_range("power in the last hour", now()).unwrap();
        assert_eq!(r.relative, "last_1_hours");
    }

    #[test]
    fn test_calendar_periods() {
        let r = resolve_time_range("cost this week", now()).unwrap();
        assert_eq!(r.start, Some(day(3, 11)));
        assert_eq!(r.relative, "this_week");

        let r = resolve_time_range("cost last week", now()).unwrap();
        assert_eq!(r.start, Some(day(3, 4)));
        assert_eq!(r.end, Some(day(3, 11)));

        let r = resolve_time_range("cost last month", now()).unwrap();
        assert_eq!(r.start, Some(day(2, 1)));
        assert_eq!(r.end, Some(day(3, 1)));

        let r = resolve_time_range("this year", now()).unwrap();
        assert_eq!(r.start, Some(day(1, 1)));
    }

    #[test]
    fn test_explicit_range() {
        let r = resolve_time_range("energy from March 1 to March 5", now()).unwrap();
        assert_eq!(r.relative, "custom");
        assert_eq!(r.start, Some(day(3, 1)));
        assert_eq!(r.end, Some(day(3, 6)));
    }

    #[test]
    fn test_explicit_range_reversed_is_ordered() {
        let r = resolve_time_range("between 2024-03-10 and 2024-03-02", now()).unwrap();
        assert!(r.is_ordered());
        assert_eq!(r.start, Some(day(3, 2)));
    }

    #[test]
    fn test_explicit_range_to_today_is_clamped_to_now() {
        let r = resolve_time_range("from monday to today", now()).unwrap();
        assert_eq!(r.start, Some(day(3, 11)));
        assert_eq!(r.end, Some(now()));
    }

    #[test]
    fn test_vague_is_ambiguous() {
        let r = resolve_time_range("how was the boiler recently", now()).unwrap();
        assert!(r.is_ambiguous());
    }

    #[test]
    fn test_now() {
        let r = resolve_time_range("current power of boiler 1", now()).unwrap();
        assert_eq!(r.relative, "now");
    }

    #[test]
    fn test_explicit_range_followed_by_more_words() {
        let r = resolve_time_range("energy from March 1 to March 5 for Boiler-1", now()).unwrap();
        assert_eq!(r.relative, "custom");
        assert_eq!(r.start, Some(day(3, 1)));
        assert_eq!(r.end, Some(day(3, 6)));

        let r = resolve_time_range("cost between 2024-03-02 and 2024-03-04 on HVAC-Main please", now()).unwrap();
        assert_eq!(r.start, Some(day(3, 2)));
        assert_eq!(r.end, Some(day(3, 5)));

        let r = resolve_time_range("from the 1st of March 2024 till yesterday, please", now()).unwrap();
        assert_eq!(r.start, Some(day(3, 1)));
        assert_eq!(r.end, Some(day(3, 14)));
    }

    #[test]
    fn test_huge_count_is_ambiguous() {
        for text in [
            "energy of Boiler-1 in the last 100000000 days",
            "last 99999999999 hours",
            "past 5000 weeks",
            "last 9223372036854775807 months",
        ] {
            let r = resolve_time_range(text, now()).unwrap();
            assert!(r.is_ambiguous(), "{}", text);
        }
        // The cap itself still resolves
        let r = resolve_time_range("last 3650 days", now()).unwrap();
        assert_eq!(r.relative, "last_3650_days");
        let r = resolve_time_range("last 120 months", now()).unwrap();
        assert_eq!(r.relative, "last_120_months");
    }

    #[test]
    fn test_count_beyond_i64_is_ambiguous() {
        let r = resolve_time_range("last 99999999999999999999999 days", now()).unwrap();
        assert!(r.is_ambiguous());
    }

    #[test]
    fn test_nothing_temporal() {
        assert!(resolve_time_range("top 3", now()).is_none());
    }
}
