//! A five-field cron subset evaluated in UTC.
//!
//! Supported per field: `*`, numbers, lists (`1,3`), ranges (`1-5`) and steps
//! (`*/15`, `0-30/10`). Day-of-week accepts `0-7` (both 0 and 7 are Sunday)
//! and `SUN`..`SAT`; month accepts `JAN`..`DEC`. As in classic cron, when both
//! day-of-month and day-of-week are restricted a day matching either fires.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CronError {
    #[error("expected 5 fields (minute hour day month weekday), got {0}")]
    FieldCount(usize),
    #[error("invalid {field} field '{value}'")]
    InvalidField { field: &'static str, value: String },
}

const WEEKDAYS: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];
const MONTHS: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

// Searching further than this without a match means the expression can never fire
// (e.g. `0 0 31 2 *`).
const SEARCH_DAYS: u32 = 366 * 5;

/// Set of allowed values for one field, as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet {
    bits: u64,
    any: bool,
}

impl FieldSet {
    fn contains(self, v: u32) -> bool {
        self.bits & (1u64 << v) != 0
    }
}

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    // offset added to a name's index to get its value
    name_base: u32,
}

const MINUTE: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59, names: &[], name_base: 0 };
const HOUR: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23, names: &[], name_base: 0 };
const DAY: FieldSpec = FieldSpec { name: "day-of-month", min: 1, max: 31, names: &[], name_base: 0 };
const MONTH: FieldSpec = FieldSpec { name: "month", min: 1, max: 12, names: &MONTHS, name_base: 1 };
const WEEKDAY: FieldSpec = FieldSpec { name: "day-of-week", min: 0, max: 7, names: &WEEKDAYS, name_base: 0 };

impl FieldSpec {
    fn parse(&self, raw: &str) -> Result<FieldSet, CronError> {
        let invalid = || CronError::InvalidField { field: self.name, value: raw.to_string() };
        let mut bits = 0u64;

        for part in raw.split(',') {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => (range, step.parse::<u32>().map_err(|_| invalid())?),
                None => (part, 1),
            };
            if step == 0 {
                return Err(invalid());
            }

            let (lo, hi) = if range == "*" {
                (self.min, self.max)
            } else if let Some((lo, hi)) = range.split_once('-') {
                (self.value(lo).ok_or_else(invalid)?, self.value(hi).ok_or_else(invalid)?)
            } else {
                let v = self.value(range).ok_or_else(invalid)?;
                // `5/10` means "from 5 to the end, every 10"
                (v, if part.contains('/') { self.max } else { v })
            };
            if lo > hi {
                return Err(invalid());
            }

            for v in (lo..=hi).step_by(step as usize) {
                bits |= 1u64 << v;
            }
        }

        Ok(FieldSet { bits, any: raw == "*" })
    }

    fn value(&self, token: &str) -> Option<u32> {
        let upper = token.to_ascii_uppercase();
        let v = match self.names.iter().position(|n| *n == upper) {
            Some(idx) => idx as u32 + self.name_base,
            None => token.parse().ok()?,
        };
        (self.min..=self.max).contains(&v).then_some(v)
    }
}

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq)]
pub struct CronSchedule {
    expr: String,
    minutes: FieldSet,
    hours: FieldSet,
    days: FieldSet,
    months: FieldSet,
    weekdays: FieldSet,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self, CronError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        let [minute, hour, day, month, weekday] = fields[..] else {
            return Err(CronError::FieldCount(fields.len()));
        };

        let mut weekdays = WEEKDAY.parse(weekday)?;
        if weekdays.contains(7) {
            weekdays.bits |= 1;
        }

        Ok(Self {
            expr: fields.join(" "),
            minutes: MINUTE.parse(minute)?,
            hours: HOUR.parse(hour)?,
            days: DAY.parse(day)?,
            months: MONTH.parse(month)?,
            weekdays,
        })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// The first firing strictly after `after`, at whole-minute resolution.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after.naive_utc().with_second(0)?.with_nanosecond(0)? + chrono::Duration::minutes(1);
        let mut date = start.date();

        for _ in 0..SEARCH_DAYS {
            if self.day_matches(date) {
                let (first_hour, first_minute) = if date == start.date() {
                    (start.hour(), start.minute())
                } else {
                    (0, 0)
                };
                for hour in (first_hour..24).filter(|h| self.hours.contains(*h)) {
                    let from = if hour == first_hour { first_minute } else { 0 };
                    if let Some(minute) = (from..60).find(|m| self.minutes.contains(*m)) {
                        let at = date.and_hms_opt(hour, minute, 0)?;
                        return Some(Utc.from_utc_datetime(&at));
                    }
                }
            }
            date = date.succ_opt()?;
        }
        None
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        if !self.months.contains(date.month()) {
            return false;
        }
        let dom = self.days.contains(date.day());
        let dow = self.weekdays.contains(date.weekday().num_days_from_sunday());
        match (self.days.any, self.weekdays.any) {
            (true, _) | (_, true) => dom && dow,
            (false, false) => dom || dow,
        }
    }
}

impl FromStr for CronSchedule {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CronSchedule::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn weekly_saturday_morning() {
        let cron = CronSchedule::parse("30 6 * * SAT").unwrap();
        // 2023-08-13 is a Sunday
        assert_eq!(cron.next_after(at("2023-08-13T00:00:00Z")), Some(at("2023-08-19T06:30:00Z")));
        // exactly at a firing: the next one is a week later
        assert_eq!(cron.next_after(at("2023-08-19T06:30:00Z")), Some(at("2023-08-26T06:30:00Z")));
        // same day, before the firing
        assert_eq!(cron.next_after(at("2023-08-19T06:29:59Z")), Some(at("2023-08-19T06:30:00Z")));
    }

    #[test]
    fn steps_ranges_and_lists() {
        let cron = CronSchedule::parse("*/15 9-17 * * MON-FRI").unwrap();
        // Friday 17:50 -> Monday 09:00
        assert_eq!(cron.next_after(at("2023-08-18T17:50:00Z")), Some(at("2023-08-21T09:00:00Z")));

        let cron = CronSchedule::parse("0 0,12 * * *").unwrap();
        assert_eq!(cron.next_after(at("2023-08-18T00:00:00Z")), Some(at("2023-08-18T12:00:00Z")));
    }

    #[test]
    fn sunday_as_seven() {
        let cron = CronSchedule::parse("0 0 * * 7").unwrap();
        assert_eq!(cron.next_after(at("2023-08-14T00:00:00Z")), Some(at("2023-08-20T00:00:00Z")));
    }

    #[test]
    fn day_of_month_or_weekday() {
        // the 1st of the month or any Monday
        let cron = CronSchedule::parse("0 0 1 * MON").unwrap();
        assert_eq!(cron.next_after(at("2023-08-25T00:00:00Z")), Some(at("2023-08-28T00:00:00Z")));
        assert_eq!(cron.next_after(at("2023-08-28T00:00:00Z")), Some(at("2023-09-01T00:00:00Z")));
    }

    #[test]
    fn impossible_date_never_fires() {
        let cron = CronSchedule::parse("0 0 31 2 *").unwrap();
        assert_eq!(cron.next_after(at("2023-01-01T00:00:00Z")), None);
    }

    #[test]
    fn rejects_malformed_expressions() {
        assert_eq!(CronSchedule::parse("30 6 * *"), Err(CronError::FieldCount(4)));
        assert!(matches!(
            CronSchedule::parse("61 6 * * SAT"),
            Err(CronError::InvalidField { field: "minute", .. })
        ));
        assert!(matches!(
            CronSchedule::parse("0 6 * * FUNDAY"),
            Err(CronError::InvalidField { field: "day-of-week", .. })
        ));
        assert!(CronSchedule::parse("*/0 * * * *").is_err());
        assert!(CronSchedule::parse("0 5-1 * * *").is_err());
    }
}
