//! Time ranges resolved from spoken expressions.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Label used when the utterance names a period too vaguely to resolve
pub const AMBIGUOUS_LABEL: &str = "ambiguous";

/// A concrete (or deliberately unresolved) time window.
///
/// `start <= end` whenever both are set; constructors swap reversed bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    /// "today", "yesterday", "last_7_days", "ambiguous", ...
    pub relative: String,
    /// ISO-8601-ish duration hint ("P7D", "PT24H") when the label implies one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, relative: impl Into<String>) -> Self {
        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        Self {
            start: Some(start),
            end: Some(end),
            relative: relative.into(),
            duration: None,
        }
    }

    /// Label only, no timestamps
    pub fn label(relative: impl Into<String>) -> Self {
        Self {
            start: None,
            end: None,
            relative: relative.into(),
            duration: None,
        }
    }

    pub fn ambiguous() -> Self {
        Self::label(AMBIGUOUS_LABEL)
    }

    pub fn with_duration(mut self, duration: impl Into<String>) -> Self {
        self.duration = Some(duration.into());
        self
    }

    pub fn is_ambiguous(&self) -> bool {
        self.relative == AMBIGUOUS_LABEL
    }

    pub fn is_ordered(&self) -> bool {
        match (self.start, self.end) {
            (Some(s), Some(e)) => s <= e,
            _ => true,
        }
    }

    /// Instant reading: start == end == now
    pub fn now(now: DateTime<Utc>) -> Self {
        Self::new(now, now, "now")
    }

    /// Midnight UTC up to now
    pub fn today(now: DateTime<Utc>) -> Self {
        Self::new(start_of_day(now), now, "today").with_duration("P1D")
    }

    pub fn yesterday(now: DateTime<Utc>) -> Self {
        let today = start_of_day(now);
        Self::new(today - Duration::days(1), today, "yesterday").with_duration("P1D")
    }

    pub fn last_hours(now: DateTime<Utc>, hours: i64) -> Self {
        Self::new(back_from(now, Duration::try_hours(hours)), now, format!("last_{}_hours", hours))
            .with_duration(format!("PT{}H", hours))
    }

    pub fn last_days(now: DateTime<Utc>, days: i64) -> Self {
        Self::new(back_from(now, Duration::try_days(days)), now, format!("last_{}_days", days))
            .with_duration(format!("P{}D", days))
    }

    /// Calendar month to date
    pub fn this_month(now: DateTime<Utc>) -> Self {
        Self::new(start_of_month(now), now, "this_month").with_duration("P1M")
    }
}

/// `now - span`, saturating at the earliest representable instant
fn back_from(now: DateTime<Utc>, span: Option<Duration>) -> DateTime<Utc> {
    span.and_then(|d| now.checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

pub fn start_of_day(t: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(t.year(), t.month(), t.day(), 0, 0, 0)
        .single()
        .unwrap_or(t)
}

pub fn start_of_month(t: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(t.year(), t.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(t)
}
