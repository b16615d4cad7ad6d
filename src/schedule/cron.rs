// src/schedule/cron.rs
//! Five-field cron expressions: `MIN HOUR DOM MON DOW`.
//!
//! Each field accepts `*`, `N`, `a-b`, `*/n`, `a-b/n`, `a/n` and comma lists. Months and
//! weekdays also accept three-letter names; weekday 7 is Sunday. Descriptors
//! `@hourly @daily @midnight @weekly @monthly @yearly @annually` are expanded.
//! When both day-of-month and day-of-week are restricted, a day matches if either
//! does (classic cron rule).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};

use crate::error::ConfigError;

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAYS: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// Search horizon for `next_after`; covers leap-day-only schedules.
const MAX_SEARCH_DAYS: i64 = 366 * 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expr: String,
    minutes: u64,
    hours: u32,
    days_of_month: u32,
    months: u16,
    days_of_week: u8,
    dom_restricted: bool,
    dow_restricted: bool,
}

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    /// First value the names map to (`jan` = 1, `sun` = 0).
    names_base: u32,
}

const MINUTE: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59, names: &[], names_base: 0 };
const HOUR: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23, names: &[], names_base: 0 };
const DOM: FieldSpec = FieldSpec { name: "day-of-month", min: 1, max: 31, names: &[], names_base: 0 };
const MONTH: FieldSpec = FieldSpec { name: "month", min: 1, max: 12, names: &MONTHS, names_base: 1 };
// 7 is accepted and folded onto 0 (Sunday).
const DOW: FieldSpec = FieldSpec { name: "day-of-week", min: 0, max: 7, names: &WEEKDAYS, names_base: 0 };

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self, ConfigError> {
        let err = |reason: String| ConfigError::Cron {
            expr: expr.to_string(),
            reason,
        };

        let trimmed = expr.trim();
        let expanded = match trimmed.to_ascii_lowercase().as_str() {
            "@hourly" => "0 * * * *",
            "@daily" | "@midnight" => "0 0 * * *",
            "@weekly" => "0 0 * * 0",
            "@monthly" => "0 0 1 * *",
            "@yearly" | "@annually" => "0 0 1 1 *",
            d if d.starts_with('@') => return Err(err(format!("unsupported descriptor `{d}`"))),
            _ => trimmed,
        };

        let parts: Vec<&str> = expanded.split_whitespace().collect();
        let [min, hour, dom, mon, dow] = parts.as_slice() else {
            return Err(err(format!(
                "expected 5 fields (MIN HOUR DOM MON DOW), got {}",
                parts.len()
            )));
        };

        let mut days_of_week = parse_field(dow, &DOW).map_err(&err)?;
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week | 1) & !(1 << 7);
        }

        Ok(Self {
            expr: trimmed.to_string(),
            minutes: parse_field(min, &MINUTE).map_err(&err)?,
            hours: parse_field(hour, &HOUR).map_err(&err)? as u32,
            days_of_month: parse_field(dom, &DOM).map_err(&err)? as u32,
            months: parse_field(mon, &MONTH).map_err(&err)? as u16,
            days_of_week: days_of_week as u8,
            dom_restricted: !dom.starts_with('*'),
            dow_restricted: !dow.starts_with('*'),
        })
    }

    pub fn expression(&self) -> &str {
        &self.expr
    }

    /// Does the minute containing `at` fire?
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        self.minutes & (1 << at.minute()) != 0
            && self.hours & (1 << at.hour()) != 0
            && self.day_matches(at.date_naive())
    }

    fn day_matches(&self, d: NaiveDate) -> bool {
        if self.months & (1 << d.month()) == 0 {
            return false;
        }
        let dom = self.days_of_month & (1 << d.day()) != 0;
        let dow = self.days_of_week & (1 << d.weekday().num_days_from_sunday()) != 0;
        if self.dom_restricted && self.dow_restricted {
            dom || dow
        } else {
            dom && dow
        }
    }

    /// First firing minute strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = truncate_to_minute(after) + Duration::minutes(1);
        let mut day = start.date_naive();
        let last_day = day + Duration::days(MAX_SEARCH_DAYS);

        while day <= last_day {
            if self.day_matches(day) {
                let (from_h, from_m) = if day == start.date_naive() {
                    (start.hour(), start.minute())
                } else {
                    (0, 0)
                };
                for h in from_h..24 {
                    if self.hours & (1 << h) == 0 {
                        continue;
                    }
                    let first_minute = if h == from_h { from_m } else { 0 };
                    for m in first_minute..60 {
                        if self.minutes & (1 << m) != 0 {
                            let t = NaiveTime::from_hms_opt(h, m, 0)?;
                            return Some(Utc.from_utc_datetime(&day.and_time(t)));
                        }
                    }
                }
            }
            day = day.succ_opt()?;
        }
        None
    }
}

impl FromStr for CronSchedule {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

/// Start of the minute containing `t`.
pub fn truncate_to_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    t.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}

/// Parse one field into a bitmask (bit N set = value N fires).
fn parse_field(field: &str, spec: &FieldSpec) -> Result<u64, String> {
    let mut mask = 0u64;
    for part in field.split(',') {
        if part.is_empty() {
            return Err(format!("{}: empty list element", spec.name));
        }
        let (range, step) = match part.split_once('/') {
            Some((r, s)) => {
                let step: u32 = s
                    .parse()
                    .map_err(|_| format!("{}: bad step `{s}`", spec.name))?;
                if step == 0 {
                    return Err(format!("{}: step must be positive", spec.name));
                }
                (r, Some(step))
            }
            None => (part, None),
        };

        let (lo, hi) = if range == "*" {
            (spec.min, spec.max)
        } else if let Some((a, b)) = range.split_once('-') {
            (value(a, spec)?, value(b, spec)?)
        } else {
            let v = value(range, spec)?;
            // `a/n` runs from a to the field maximum
            (v, if step.is_some() { spec.max } else { v })
        };
        if lo > hi {
            return Err(format!("{}: range {lo}-{hi} is backwards", spec.name));
        }

        let mut v = lo;
        while v <= hi {
            mask |= 1 << v;
            v += step.unwrap_or(1);
        }
    }
    Ok(mask)
}

fn value(raw: &str, spec: &FieldSpec) -> Result<u32, String> {
    let lower = raw.to_ascii_lowercase();
    if let Some(pos) = spec.names.iter().position(|n| *n == lower) {
        return Ok(pos as u32 + spec.names_base);
    }
    let v: u32 = raw
        .parse()
        .map_err(|_| format!("{}: bad value `{raw}`", spec.name))?;
    if v < spec.min || v > spec.max {
        return Err(format!(
            "{}: {v} out of range {}-{}",
            spec.name, spec.min, spec.max
        ));
    }
    Ok(v)
}
