//! Five-field cron expressions evaluated in an arbitrary timezone
//!
//! Expressions are written in the classic `minute hour dom month dow` form
//! and evaluated by the `cron` crate, which expects a leading seconds field
//! and numbers weekdays from Sunday = 1. The weekday field is therefore
//! rewritten to day names. When both day fields are restricted a date
//! matching either one fires, so such an expression is evaluated as two
//! schedules and the earlier fire time wins.

use chrono::{DateTime, TimeZone, Utc};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const FIELD_NAMES: [&str; 5] = ["minute", "hour", "day-of-month", "month", "day-of-week"];

const WEEKDAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CronError {
    #[error("expected 5 fields, found {0}")]
    FieldCount(usize),

    #[error("invalid {field} field '{value}': {reason}")]
    InvalidField {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("unknown macro '{0}'")]
    UnknownMacro(String),

    #[error("invalid cron expression '{expr}': {reason}")]
    Invalid { expr: String, reason: String },
}

fn invalid_field(index: usize, value: &str, reason: impl Into<String>) -> CronError {
    CronError::InvalidField {
        field: FIELD_NAMES[index],
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn expand_macro(expr: &str) -> Result<&'static str, CronError> {
    match expr.to_ascii_lowercase().as_str() {
        "@yearly" | "@annually" => Ok("0 0 1 1 *"),
        "@monthly" => Ok("0 0 1 * *"),
        "@weekly" => Ok("0 0 * * 0"),
        "@daily" | "@midnight" => Ok("0 0 * * *"),
        "@hourly" => Ok("0 * * * *"),
        _ => Err(CronError::UnknownMacro(expr.to_string())),
    }
}

/// `*/0` would never advance
fn check_steps(index: usize, value: &str) -> Result<(), CronError> {
    for item in value.split(',') {
        if let Some((_, step)) = item.split_once('/') {
            match step.parse::<u32>() {
                Ok(0) => return Err(invalid_field(index, value, "step must be positive")),
                Ok(_) => {}
                Err(_) => return Err(invalid_field(index, value, "step is not a number")),
            }
        }
    }
    Ok(())
}

/// 0 and 7 both spell Sunday
fn parse_weekday(value: &str, token: &str) -> Result<usize, CronError> {
    if let Ok(n) = token.parse::<usize>() {
        return match n {
            0..=7 => Ok(n),
            _ => Err(invalid_field(4, value, format!("{n} outside 0-7"))),
        };
    }
    WEEKDAY_NAMES
        .iter()
        .position(|name| name.eq_ignore_ascii_case(token))
        .ok_or_else(|| invalid_field(4, value, format!("unknown weekday '{token}'")))
}

/// Rewrite a numeric or named day-of-week field as a list of day names
fn weekday_field(value: &str) -> Result<String, CronError> {
    if value == "*" || value == "?" {
        return Ok("*".to_string());
    }

    let mut days = [false; 7];
    for item in value.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, step.parse::<usize>().unwrap_or(1)),
            None => (item, 1),
        };
        let (start, end) = match range {
            "*" | "?" => (0, 6),
            _ => match range.split_once('-') {
                Some((start, end)) => (parse_weekday(value, start)?, parse_weekday(value, end)?),
                None => {
                    let day = parse_weekday(value, range)?;
                    // `n/step` runs from n to the end of the week
                    (day, if item.contains('/') { 6 } else { day })
                }
            },
        };
        if start > end {
            return Err(invalid_field(4, value, "range start after end"));
        }
        for day in (start..=end).step_by(step) {
            days[day % 7] = true;
        }
    }

    Ok(WEEKDAY_NAMES
        .iter()
        .zip(days)
        .filter(|(_, on)| *on)
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(","))
}

fn restricts(value: &str) -> bool {
    !value.starts_with('*') && value != "?"
}

/// A parsed cron expression
#[derive(Debug, Clone)]
pub struct CronSchedule {
    source: String,
    schedules: Vec<::cron::Schedule>,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self, CronError> {
        let trimmed = expr.trim();
        let expanded = if trimmed.starts_with('@') {
            expand_macro(trimmed)?
        } else {
            trimmed
        };

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::FieldCount(fields.len()));
        }
        for (index, value) in fields.iter().enumerate() {
            check_steps(index, value)?;
        }

        let [minute, hour, day_of_month, month, day_of_week] =
            [fields[0], fields[1], fields[2], fields[3], fields[4]];
        let weekdays = weekday_field(day_of_week)?;

        let day_variants = if restricts(day_of_month) && restricts(day_of_week) {
            vec![(day_of_month, "*".to_string()), ("*", weekdays)]
        } else {
            vec![(day_of_month, weekdays)]
        };

        let schedules = day_variants
            .into_iter()
            .map(|(dom, dow)| {
                let with_seconds = format!("0 {minute} {hour} {dom} {month} {dow}");
                ::cron::Schedule::from_str(&with_seconds).map_err(|e| CronError::Invalid {
                    expr: trimmed.to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            source: trimmed.to_string(),
            schedules,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Earliest fire instant strictly after `after`, with wall-clock fields
    /// read in `tz`. `None` when the expression never fires again.
    pub fn next_after<Tz: TimeZone>(&self, after: DateTime<Utc>, tz: &Tz) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(tz);
        self.schedules
            .iter()
            .filter_map(|schedule| schedule.after(&local).next())
            .map(|at| at.with_timezone(&Utc))
            .min()
    }
}

impl FromStr for CronSchedule {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Duration, Timelike, Weekday};
    use chrono_tz::Tz;
    use proptest::prelude::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_weekday_field_rewrite() {
        assert_eq!(weekday_field("*").unwrap(), "*");
        assert_eq!(weekday_field("1-5").unwrap(), "Mon,Tue,Wed,Thu,Fri");
        assert_eq!(weekday_field("mon-fri").unwrap(), "Mon,Tue,Wed,Thu,Fri");
        assert_eq!(weekday_field("6-7").unwrap(), "Sun,Sat");
        assert_eq!(weekday_field("*/2").unwrap(), "Sun,Tue,Thu,Sat");
        assert_eq!(weekday_field("1/3").unwrap(), "Mon,Thu");
        for sunday in ["0", "7", "sun", "SUN"] {
            assert_eq!(weekday_field(sunday).unwrap(), "Sun", "{sunday}");
        }
        assert!(weekday_field("8").is_err());
        assert!(weekday_field("5-1").is_err());
        assert!(weekday_field("someday").is_err());
    }

    #[test]
    fn test_rejects_malformed_expressions() {
        assert!(matches!(
            CronSchedule::parse("* * * *"),
            Err(CronError::FieldCount(4))
        ));
        assert!(CronSchedule::parse("60 * * * *").is_err());
        assert!(CronSchedule::parse("* 24 * * *").is_err());
        assert!(CronSchedule::parse("* * 0 * *").is_err());
        assert!(CronSchedule::parse("* * * 13 *").is_err());
        assert!(matches!(
            CronSchedule::parse("*/0 * * * *"),
            Err(CronError::InvalidField { field: "minute", .. })
        ));
        assert!(matches!(
            CronSchedule::parse("@fortnightly"),
            Err(CronError::UnknownMacro(_))
        ));
        assert!(CronSchedule::parse("a b c d e").is_err());
    }

    #[test]
    fn test_macros() {
        let hourly = CronSchedule::parse("@hourly").unwrap();
        assert_eq!(
            hourly.next_after(utc(2024, 5, 1, 12, 30, 0), &Utc),
            Some(utc(2024, 5, 1, 13, 0, 0))
        );
        let weekly = CronSchedule::parse("@weekly").unwrap();
        assert_eq!(weekly.source(), "@weekly");
        // 2024-05-01 is a Wednesday
        assert_eq!(
            weekly.next_after(utc(2024, 5, 1, 0, 0, 0), &Utc),
            Some(utc(2024, 5, 5, 0, 0, 0))
        );
    }

    #[test]
    fn test_hourly_boundaries() {
        let cron = CronSchedule::parse("0 * * * *").unwrap();
        assert_eq!(
            cron.next_after(utc(2024, 5, 1, 12, 0, 0), &Utc),
            Some(utc(2024, 5, 1, 13, 0, 0))
        );
        assert_eq!(
            cron.next_after(utc(2024, 5, 1, 13, 5, 0), &Utc),
            Some(utc(2024, 5, 1, 14, 0, 0))
        );
        assert_eq!(
            cron.next_after(utc(2024, 5, 1, 12, 59, 59), &Utc),
            Some(utc(2024, 5, 1, 13, 0, 0))
        );
    }

    #[test]
    fn test_day_fields_combine_with_or_when_both_restricted() {
        // 2024-06-01 is a Saturday and the 3rd a Monday
        let cron = CronSchedule::parse("0 0 15 * mon").unwrap();
        assert_eq!(
            cron.next_after(utc(2024, 6, 1, 0, 0, 0), &Utc),
            Some(utc(2024, 6, 3, 0, 0, 0))
        );
        // After the Monday on the 10th the 15th (a Saturday) comes first
        assert_eq!(
            cron.next_after(utc(2024, 6, 10, 0, 0, 0), &Utc),
            Some(utc(2024, 6, 15, 0, 0, 0))
        );

        // With `*` day-of-month only Mondays fire
        let mondays = CronSchedule::parse("0 0 * * mon").unwrap();
        assert_eq!(
            mondays.next_after(utc(2024, 6, 10, 0, 0, 0), &Utc),
            Some(utc(2024, 6, 17, 0, 0, 0))
        );
    }

    #[test]
    fn test_evaluated_in_schedule_timezone() {
        let tz: Tz = "America/New_York".parse().unwrap();
        let cron = CronSchedule::parse("0 9 * * *").unwrap();
        // 09:00 EDT is 13:00 UTC
        assert_eq!(
            cron.next_after(utc(2024, 7, 1, 12, 0, 0), &tz),
            Some(utc(2024, 7, 1, 13, 0, 0))
        );
        // 09:00 EST is 14:00 UTC
        assert_eq!(
            cron.next_after(utc(2024, 12, 2, 12, 0, 0), &tz),
            Some(utc(2024, 12, 2, 14, 0, 0))
        );
    }

    #[test]
    fn test_dst_gap_is_skipped() {
        // 2024-03-10 02:30 does not exist in New York
        let tz: Tz = "America/New_York".parse().unwrap();
        let cron = CronSchedule::parse("30 2 * * *").unwrap();
        let next = cron.next_after(utc(2024, 3, 10, 5, 0, 0), &tz).unwrap();
        // 2024-03-11 02:30 EDT
        assert_eq!(next, utc(2024, 3, 11, 6, 30, 0));
    }

    #[test]
    fn test_never_firing_expression() {
        let cron = CronSchedule::parse("0 0 30 2 *").unwrap();
        assert_eq!(cron.next_after(utc(2024, 1, 1, 0, 0, 0), &Utc), None);

        let leap = CronSchedule::parse("0 0 29 2 *").unwrap();
        assert_eq!(
            leap.next_after(utc(2024, 3, 1, 0, 0, 0), &Utc),
            Some(utc(2028, 2, 29, 0, 0, 0))
        );
    }

    #[test]
    fn test_weekday_numbering_matches_classic_cron() {
        // Classic 1-5 is Monday to Friday
        let cron = CronSchedule::parse("0 12 * * 1-5").unwrap();
        let mut at = utc(2024, 6, 1, 0, 0, 0);
        for _ in 0..10 {
            at = cron.next_after(at, &Utc).unwrap();
            assert!(!matches!(at.weekday(), Weekday::Sat | Weekday::Sun), "{at}");
        }
    }

    proptest! {
        #[test]
        fn prop_next_fire_is_strictly_later_and_matches(
            minute in 0u32..60,
            hour in 0u32..24,
            offset_secs in 0i64..(3 * 365 * 24 * 3600),
            tz_index in 0usize..4,
        ) {
            let zones = ["UTC", "Europe/London", "America/New_York", "Asia/Kolkata"];
            let tz: Tz = zones[tz_index].parse().unwrap();
            let cron = CronSchedule::parse(&format!("{minute} {hour} * * *")).unwrap();
            let after = utc(2023, 1, 1, 0, 0, 0) + Duration::seconds(offset_secs);

            let next = cron.next_after(after, &tz);
            prop_assert!(next.is_some());
            let next = next.unwrap();
            prop_assert!(next > after);
            let local = next.with_timezone(&tz);
            prop_assert_eq!(local.minute(), minute);
            prop_assert_eq!(local.hour(), hour);
        }
    }
}
