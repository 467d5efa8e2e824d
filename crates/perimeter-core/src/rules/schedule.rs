//! Time-of-day windows and recurrence patterns.
//!
//! A [`TimeRule`] is a daily wall-clock window, bounded by a date range and
//! filtered by a [`Recurrence`]. Windows are compared as minute-of-day, so a
//! window whose start is after its end (one that would cross midnight) never
//! matches.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Wall-clock time with minute resolution, written `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    /// Create a time of day, `None` if out of range.
    #[must_use]
    pub const fn new(hour: u8, minute: u8) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Some(Self { hour, minute })
        } else {
            None
        }
    }

    /// Hour, 0-23.
    #[must_use]
    pub const fn hour(self) -> u8 {
        self.hour
    }

    /// Minute, 0-59.
    #[must_use]
    pub const fn minute(self) -> u8 {
        self.minute
    }

    /// Minutes since midnight.
    #[must_use]
    pub const fn minute_of_day(self) -> u32 {
        self.hour as u32 * 60 + self.minute as u32
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hour, minute) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| format!("invalid time '{s}': expected HH:MM"))?;
        let hour: u8 = hour
            .parse()
            .map_err(|_| format!("invalid hour in '{s}'"))?;
        let minute: u8 = minute
            .parse()
            .map_err(|_| format!("invalid minute in '{s}'"))?;
        Self::new(hour, minute).ok_or_else(|| format!("time '{s}' is out of range"))
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(value: TimeOfDay) -> Self {
        value.to_string()
    }
}

/// Which days a time rule applies on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Recurrence {
    /// Every day.
    Daily,

    /// Listed weekdays, numbered 1 = Sunday through 7 = Saturday.
    Weekly {
        /// Weekday numbers.
        days_of_week: Vec<u8>,
    },

    /// Listed days of the month, 1-31.
    Monthly {
        /// Day-of-month numbers.
        days_of_month: Vec<u8>,
    },

    /// Every `interval_days` days counted from the rule's start date.
    Custom {
        /// Period in days, at least 1.
        interval_days: u32,
    },
}

/// A recurring daily time window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TimeRule {
    /// Identifier.
    pub id: Uuid,

    /// Inactive rules never match.
    #[serde(default = "default_active")]
    pub is_active: bool,

    /// First instant the rule can match.
    pub start_date: DateTime<Utc>,

    /// Last instant the rule can match, open-ended when absent.
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,

    /// Window start, inclusive.
    #[schema(value_type = String, example = "09:00")]
    pub start_time: TimeOfDay,

    /// Window end, inclusive.
    #[schema(value_type = String, example = "17:00")]
    pub end_time: TimeOfDay,

    /// Day filter.
    pub recurrence: Recurrence,
}

const fn default_active() -> bool {
    true
}

impl TimeRule {
    /// Whether `now`, read as wall-clock time in `timezone`, falls inside this rule.
    #[must_use]
    pub fn matches(&self, now: DateTime<Utc>, timezone: Tz) -> bool {
        if !self.is_active || now < self.start_date {
            return false;
        }
        if self.end_date.is_some_and(|end| now > end) {
            return false;
        }

        let local = now.with_timezone(&timezone);
        let minute_of_day = local.hour() * 60 + local.minute();
        let (start, end) = (self.start_time.minute_of_day(), self.end_time.minute_of_day());
        if !(start <= minute_of_day && minute_of_day <= end) {
            return false;
        }

        match &self.recurrence {
            Recurrence::Daily => true,
            Recurrence::Weekly { days_of_week } => {
                let weekday = local.weekday().number_from_sunday();
                days_of_week.iter().any(|&day| u32::from(day) == weekday)
            }
            Recurrence::Monthly { days_of_month } => {
                let day = local.day();
                days_of_month.iter().any(|&d| u32::from(d) == day)
            }
            Recurrence::Custom { interval_days } => {
                if *interval_days == 0 {
                    return false;
                }
                let start_day = self.start_date.with_timezone(&timezone).date_naive();
                let days = (local.date_naive() - start_day).num_days();
                days >= 0 && days % i64::from(*interval_days) == 0
            }
        }
    }

    /// Returns a description of the first problem found, if any.
    #[must_use]
    pub fn problem(&self) -> Option<String> {
        if self.end_date.is_some_and(|end| end < self.start_date) {
            return Some(format!("time rule {} ends before it starts", self.id));
        }
        match &self.recurrence {
            Recurrence::Daily => None,
            Recurrence::Weekly { days_of_week } => {
                if days_of_week.is_empty() {
                    Some(format!("time rule {} has no days of week", self.id))
                } else if days_of_week.iter().any(|d| !(1..=7).contains(d)) {
                    Some(format!(
                        "time rule {} has a day of week outside 1-7",
                        self.id
                    ))
                } else {
                    None
                }
            }
            Recurrence::Monthly { days_of_month } => {
                if days_of_month.is_empty() {
                    Some(format!("time rule {} has no days of month", self.id))
                } else if days_of_month.iter().any(|d| !(1..=31).contains(d)) {
                    Some(format!(
                        "time rule {} has a day of month outside 1-31",
                        self.id
                    ))
                } else {
                    None
                }
            }
            Recurrence::Custom { interval_days } => (*interval_days == 0)
                .then(|| format!("time rule {} has a zero-day interval", self.id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hm(hour: u8, minute: u8) -> TimeOfDay {
        TimeOfDay::new(hour, minute).unwrap()
    }

    fn rule(recurrence: Recurrence, start: TimeOfDay, end: TimeOfDay) -> TimeRule {
        TimeRule {
            id: Uuid::nil(),
            is_active: true,
            start_date: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            end_date: None,
            start_time: start,
            end_time: end,
            recurrence,
        }
    }

    #[test]
    fn test_time_of_day_parsing() {
        assert_eq!("09:05".parse::<TimeOfDay>().unwrap(), hm(9, 5));
        assert!("24:00".parse::<TimeOfDay>().is_err());
        assert!("9".parse::<TimeOfDay>().is_err());
        assert_eq!(hm(17, 0).to_string(), "17:00");
        assert_eq!(hm(1, 30).minute_of_day(), 90);
    }

    #[test]
    fn test_daily_window_is_inclusive() {
        let r = rule(Recurrence::Daily, hm(9, 0), hm(17, 0));
        let day = |h, m| Utc.with_ymd_and_hms(2025, 3, 4, h, m, 0).unwrap();
        assert!(r.matches(day(9, 0), Tz::UTC));
        assert!(r.matches(day(17, 0), Tz::UTC));
        assert!(!r.matches(day(8, 59), Tz::UTC));
        assert!(!r.matches(day(17, 1), Tz::UTC));
    }

    #[test]
    fn test_weekly_uses_sunday_based_numbering() {
        let weekdays = rule(
            Recurrence::Weekly {
                days_of_week: vec![2, 3, 4, 5, 6],
            },
            hm(9, 0),
            hm(17, 0),
        );
        // 2025-03-08 is a Saturday, 2025-03-10 a Monday.
        let saturday = Utc.with_ymd_and_hms(2025, 3, 8, 10, 0, 0).unwrap();
        let monday = Utc.with_ymd_and_hms(2025, 3, 10, 10, 0, 0).unwrap();
        assert!(!weekdays.matches(saturday, Tz::UTC));
        assert!(weekdays.matches(monday, Tz::UTC));
    }

    #[test]
    fn test_monthly() {
        let r = rule(
            Recurrence::Monthly {
                days_of_month: vec![1, 15],
            },
            hm(0, 0),
            hm(23, 59),
        );
        assert!(r.matches(Utc.with_ymd_and_hms(2025, 4, 15, 12, 0, 0).unwrap(), Tz::UTC));
        assert!(!r.matches(Utc.with_ymd_and_hms(2025, 4, 16, 12, 0, 0).unwrap(), Tz::UTC));
    }

    #[test]
    fn test_custom_interval_counts_from_start_date() {
        let r = rule(Recurrence::Custom { interval_days: 3 }, hm(0, 0), hm(23, 59));
        let day = |d| Utc.with_ymd_and_hms(2025, 1, d, 12, 0, 0).unwrap();
        assert!(r.matches(day(1), Tz::UTC));
        assert!(!r.matches(day(2), Tz::UTC));
        assert!(!r.matches(day(3), Tz::UTC));
        assert!(r.matches(day(4), Tz::UTC));
        assert!(r.matches(day(7), Tz::UTC));
    }

    #[test]
    fn test_midnight_crossing_window_never_matches() {
        let overnight = rule(Recurrence::Daily, hm(22, 0), hm(6, 0));
        for hour in [0, 3, 6, 12, 22, 23] {
            let now = Utc.with_ymd_and_hms(2025, 3, 4, hour, 0, 0).unwrap();
            assert!(!overnight.matches(now, Tz::UTC), "matched at {hour}:00");
        }
    }

    #[test]
    fn test_date_bounds_and_activity() {
        let mut r = rule(Recurrence::Daily, hm(0, 0), hm(23, 59));
        let before = Utc.with_ymd_and_hms(2024, 12, 31, 12, 0, 0).unwrap();
        assert!(!r.matches(before, Tz::UTC));

        r.end_date = Some(Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap());
        assert!(!r.matches(Utc.with_ymd_and_hms(2025, 2, 2, 12, 0, 0).unwrap(), Tz::UTC));

        r.end_date = None;
        r.is_active = false;
        assert!(!r.matches(Utc.with_ymd_and_hms(2025, 2, 2, 12, 0, 0).unwrap(), Tz::UTC));
    }

    #[test]
    fn test_timezone_shifts_window() {
        let r = rule(Recurrence::Daily, hm(9, 0), hm(17, 0));
        // 08:30 UTC is 09:30 in Amsterdam during winter.
        let now = Utc.with_ymd_and_hms(2025, 1, 15, 8, 30, 0).unwrap();
        assert!(!r.matches(now, Tz::UTC));
        assert!(r.matches(now, chrono_tz::Europe::Amsterdam));
    }

    #[test]
    fn test_problem_detection() {
        let r = rule(
            Recurrence::Weekly {
                days_of_week: vec![0],
            },
            hm(9, 0),
            hm(17, 0),
        );
        assert!(r.problem().is_some());
        let r = rule(Recurrence::Custom { interval_days: 0 }, hm(9, 0), hm(17, 0));
        assert!(r.problem().is_some());
        let r = rule(Recurrence::Daily, hm(9, 0), hm(17, 0));
        assert!(r.problem().is_none());
    }

    #[test]
    fn test_time_rule_deserialization() {
        let json = r#"{
            "id": "00000000-0000-0000-0000-000000000000",
            "start_date": "2025-01-01T00:00:00Z",
            "start_time": "09:00",
            "end_time": "17:00",
            "recurrence": {"type": "weekly", "days_of_week": [2, 3, 4, 5, 6]}
        }"#;
        let r: TimeRule = serde_json::from_str(json).unwrap();
        assert!(r.is_active);
        assert_eq!(r.start_time, hm(9, 0));
        assert!(matches!(r.recurrence, Recurrence::Weekly { .. }));
    }
}
