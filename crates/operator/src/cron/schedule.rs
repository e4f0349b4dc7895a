//! Six-field cron expressions.
//!
//! Fields are, in order: second, minute, hour, day-of-month, month and
//! day-of-week. Every field accepts `*`, single values, ranges (`a-b`),
//! lists (`a,b`) and steps (`*/n`, `a-b/n`, `a/n`). Day-of-week counts from
//! zero (Sunday) to six (Saturday); month and weekday names are accepted too.
//!
//! Besides the six-field form a handful of descriptors are understood:
//! `@yearly`, `@annually`, `@monthly`, `@weekly`, `@daily`, `@midnight`,
//! `@hourly` and the one-shot `@date YYYY-MM-DD HH:MM:SS`.

use std::fmt;

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Timelike,
};
use thiserror::Error;

/// How far ahead `next_after` searches before giving up on an expression
/// that can never match (e.g. February 30th).
const SEARCH_HORIZON_YEARS: i32 = 5;

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const MONTH_NAMES: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const WEEKDAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Expression,
    Second,
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
}

impl Field {
    const ORDER: [Field; 6] = [
        Field::Second,
        Field::Minute,
        Field::Hour,
        Field::DayOfMonth,
        Field::Month,
        Field::DayOfWeek,
    ];

    fn bounds(self) -> (u32, u32) {
        match self {
            Field::Second | Field::Minute => (0, 59),
            Field::Hour => (0, 23),
            Field::DayOfMonth => (1, 31),
            Field::Month => (1, 12),
            Field::DayOfWeek => (0, 6),
            Field::Expression => (0, 0),
        }
    }

    fn named_value(self, token: &str) -> Option<u32> {
        let upper = token.to_ascii_uppercase();
        match self {
            Field::Month => MONTH_NAMES
                .iter()
                .position(|name| *name == upper)
                .map(|idx| idx as u32 + 1),
            Field::DayOfWeek => WEEKDAY_NAMES
                .iter()
                .position(|name| *name == upper)
                .map(|idx| idx as u32),
            _ => None,
        }
    }

    fn allows_question_mark(self) -> bool {
        matches!(self, Field::DayOfMonth | Field::DayOfWeek)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Expression => write!(f, "expression"),
            Field::Second => write!(f, "second"),
            Field::Minute => write!(f, "minute"),
            Field::Hour => write!(f, "hour"),
            Field::DayOfMonth => write!(f, "day-of-month"),
            Field::Month => write!(f, "month"),
            Field::DayOfWeek => write!(f, "day-of-week"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field} field in '{expr}': {reason}")]
pub struct ParseError {
    pub field: Field,
    pub expr: String,
    pub reason: String,
}

impl ParseError {
    fn new(field: Field, expr: &str, reason: impl Into<String>) -> Self {
        Self {
            field,
            expr: expr.to_string(),
            reason: reason.into(),
        }
    }
}

/// A parsed schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    Cron(CronSpec),
    /// Fires a single time at the given wall-clock instant.
    Once(NaiveDateTime),
}

/// Bit sets of the allowed values of every field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSpec {
    seconds: u64,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    any_day_of_month: bool,
    any_day_of_week: bool,
}

impl Schedule {
    pub fn parse(expr: &str) -> Result<Self, ParseError> {
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Err(ParseError::new(Field::Expression, expr, "empty expression"));
        }

        if let Some(descriptor) = trimmed.strip_prefix('@') {
            return Self::parse_descriptor(expr, descriptor);
        }

        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        if fields.len() != Field::ORDER.len() {
            return Err(ParseError::new(
                Field::Expression,
                expr,
                format!("expected 6 fields, found {}", fields.len()),
            ));
        }

        let mut bits = [0u64; 6];
        let mut stars = [false; 6];
        for (idx, (field, token)) in Field::ORDER.iter().zip(fields.iter()).enumerate() {
            let (set, star) = parse_field(expr, *field, token)?;
            bits[idx] = set;
            stars[idx] = star;
        }

        Ok(Schedule::Cron(CronSpec {
            seconds: bits[0],
            minutes: bits[1],
            hours: bits[2],
            days_of_month: bits[3],
            months: bits[4],
            days_of_week: bits[5],
            any_day_of_month: stars[3],
            any_day_of_week: stars[5],
        }))
    }

    fn parse_descriptor(expr: &str, descriptor: &str) -> Result<Self, ParseError> {
        if let Some(date) = descriptor.strip_prefix("date ") {
            let at = NaiveDateTime::parse_from_str(date.trim(), DATE_FORMAT).map_err(|e| {
                ParseError::new(Field::Expression, expr, format!("invalid @date: {}", e))
            })?;
            return Ok(Schedule::Once(at));
        }

        let equivalent = match descriptor {
            "yearly" | "annually" => "0 0 0 1 1 *",
            "monthly" => "0 0 0 1 * *",
            "weekly" => "0 0 0 * * 0",
            "daily" | "midnight" => "0 0 0 * * *",
            "hourly" => "0 0 * * * *",
            other => {
                return Err(ParseError::new(
                    Field::Expression,
                    expr,
                    format!("unrecognized descriptor @{}", other),
                ))
            }
        };
        Self::parse(equivalent)
    }

    /// Whether this schedule fires at most once.
    pub fn is_one_shot(&self) -> bool {
        matches!(self, Schedule::Once(_))
    }

    /// The first fire time strictly after `after`, evaluated in `after`'s
    /// time zone.
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        match self {
            Schedule::Cron(spec) => spec.next_after(after),
            Schedule::Once(at) => match after.timezone().from_local_datetime(at) {
                LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) if dt > *after => {
                    Some(dt)
                }
                _ => None,
            },
        }
    }
}

impl CronSpec {
    fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = after.timezone();
        let mut t = after.naive_local().with_nanosecond(0)? + Duration::seconds(1);
        let last_year = t.year() + SEARCH_HORIZON_YEARS;

        while t.year() <= last_year {
            if !contains(self.months, t.month()) {
                t = first_of_next_month(t.date())?;
                continue;
            }
            if !self.day_matches(t.date()) {
                t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !contains(self.hours, t.hour()) {
                t = t.date().and_hms_opt(t.hour(), 0, 0)? + Duration::hours(1);
                continue;
            }
            if !contains(self.minutes, t.minute()) {
                t = t.date().and_hms_opt(t.hour(), t.minute(), 0)? + Duration::minutes(1);
                continue;
            }
            if !contains(self.seconds, t.second()) {
                t += Duration::seconds(1);
                continue;
            }

            // Wall-clock times skipped by a DST transition do not exist.
            match tz.from_local_datetime(&t) {
                LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) if dt > *after => {
                    return Some(dt)
                }
                _ => t += Duration::seconds(1),
            }
        }
        None
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = contains(self.days_of_month, date.day());
        let dow = contains(self.days_of_week, date.weekday().num_days_from_sunday());
        if self.any_day_of_month || self.any_day_of_week {
            dom && dow
        } else {
            dom || dow
        }
    }
}

fn contains(set: u64, value: u32) -> bool {
    set & (1u64 << value) != 0
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDateTime> {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)
}

/// Parses one field into a bit set. The flag reports whether the field was
/// an unrestricted `*`/`?`, which changes how the two day fields combine.
fn parse_field(expr: &str, field: Field, token: &str) -> Result<(u64, bool), ParseError> {
    let (min, max) = field.bounds();
    let mut set = 0u64;
    let mut star = false;

    for part in token.split(',') {
        if part.is_empty() {
            return Err(ParseError::new(field, expr, "empty list element"));
        }

        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| {
                    ParseError::new(field, expr, format!("invalid step '{}'", step))
                })?;
                if step == 0 {
                    return Err(ParseError::new(field, expr, "step must be positive"));
                }
                if step > max {
                    return Err(ParseError::new(
                        field,
                        expr,
                        format!("step {} exceeds maximum {}", step, max),
                    ));
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (start, end, is_star) = if range == "*" || range == "?" {
            if range == "?" && !field.allows_question_mark() {
                return Err(ParseError::new(field, expr, "'?' is only allowed in day fields"));
            }
            (min, max, true)
        } else if let Some((low, high)) = range.split_once('-') {
            (value(expr, field, low)?, value(expr, field, high)?, false)
        } else {
            let single = value(expr, field, range)?;
            // "a/n" means "a-max/n".
            (single, if step.is_some() { max } else { single }, false)
        };

        if start < min || end > max {
            return Err(ParseError::new(
                field,
                expr,
                format!("'{}' is out of range {}-{}", part, min, max),
            ));
        }
        if start > end {
            return Err(ParseError::new(
                field,
                expr,
                format!("range start {} is beyond end {}", start, end),
            ));
        }

        let step = step.unwrap_or(1);
        if is_star && step == 1 {
            star = true;
        }
        let mut v = start;
        while v <= end {
            set |= 1u64 << v;
            match v.checked_add(step) {
                Some(next) => v = next,
                None => break,
            }
        }
    }

    Ok((set, star))
}

fn value(expr: &str, field: Field, token: &str) -> Result<u32, ParseError> {
    token
        .parse::<u32>()
        .ok()
        .or_else(|| field.named_value(token))
        .ok_or_else(|| ParseError::new(field, expr, format!("invalid value '{}'", token)))
}
