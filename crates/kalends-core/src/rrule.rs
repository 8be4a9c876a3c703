//! iCalendar RECUR value type (RFC 5545 §3.3.10, §3.8.5.3).
//!
//! [`Recur`] is the declarative recurrence pattern; expansion lives in the
//! `kalends-recur` crate. Patterns are immutable once built and evaluation
//! never mutates them.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::datetime::CalDateTime;
use crate::error::{RecurError, RecurResult};

/// Recurrence frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Frequency {
    Secondly,
    Minutely,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    /// Returns the RRULE token.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Secondly => "SECONDLY",
            Self::Minutely => "MINUTELY",
            Self::Hourly => "HOURLY",
            Self::Daily => "DAILY",
            Self::Weekly => "WEEKLY",
            Self::Monthly => "MONTHLY",
            Self::Yearly => "YEARLY",
        }
    }

    /// Parses a frequency token (case-insensitive).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.to_ascii_uppercase().as_str() {
            "SECONDLY" => Self::Secondly,
            "MINUTELY" => Self::Minutely,
            "HOURLY" => Self::Hourly,
            "DAILY" => Self::Daily,
            "WEEKLY" => Self::Weekly,
            "MONTHLY" => Self::Monthly,
            "YEARLY" => Self::Yearly,
            _ => return None,
        })
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Day of the week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Weekday {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl Weekday {
    /// Returns the two-letter abbreviation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sunday => "SU",
            Self::Monday => "MO",
            Self::Tuesday => "TU",
            Self::Wednesday => "WE",
            Self::Thursday => "TH",
            Self::Friday => "FR",
            Self::Saturday => "SA",
        }
    }

    /// Parses a two-letter abbreviation (case-insensitive).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.to_ascii_uppercase().as_str() {
            "SU" => Self::Sunday,
            "MO" => Self::Monday,
            "TU" => Self::Tuesday,
            "WE" => Self::Wednesday,
            "TH" => Self::Thursday,
            "FR" => Self::Friday,
            "SA" => Self::Saturday,
            _ => return None,
        })
    }

    /// Converts to the chrono weekday.
    #[must_use]
    pub const fn to_chrono(self) -> chrono::Weekday {
        match self {
            Self::Sunday => chrono::Weekday::Sun,
            Self::Monday => chrono::Weekday::Mon,
            Self::Tuesday => chrono::Weekday::Tue,
            Self::Wednesday => chrono::Weekday::Wed,
            Self::Thursday => chrono::Weekday::Thu,
            Self::Friday => chrono::Weekday::Fri,
            Self::Saturday => chrono::Weekday::Sat,
        }
    }

    /// Converts from the chrono weekday.
    #[must_use]
    pub const fn from_chrono(wd: chrono::Weekday) -> Self {
        match wd {
            chrono::Weekday::Sun => Self::Sunday,
            chrono::Weekday::Mon => Self::Monday,
            chrono::Weekday::Tue => Self::Tuesday,
            chrono::Weekday::Wed => Self::Wednesday,
            chrono::Weekday::Thu => Self::Thursday,
            chrono::Weekday::Fri => Self::Friday,
            chrono::Weekday::Sat => Self::Saturday,
        }
    }

    /// Matches a calendar date's weekday.
    #[must_use]
    pub fn matches(self, date: NaiveDate) -> bool {
        chrono::Datelike::weekday(&date) == self.to_chrono()
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Weekday with an optional ordinal, as used in BYDAY.
///
/// `MO` is every Monday; `1MO` the first Monday of the month or year;
/// `-1FR` the last Friday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WeekdayNum {
    /// Optional ordinal (±1..=53; zero is invalid).
    pub ordinal: Option<i8>,
    /// The day of the week.
    pub weekday: Weekday,
}

impl WeekdayNum {
    /// Every occurrence of the weekday.
    #[must_use]
    pub const fn every(weekday: Weekday) -> Self {
        Self {
            ordinal: None,
            weekday,
        }
    }

    /// The nth occurrence of the weekday within the period (negative counts
    /// from the end).
    #[must_use]
    pub const fn nth(ordinal: i8, weekday: Weekday) -> Self {
        Self {
            ordinal: Some(ordinal),
            weekday,
        }
    }

    fn parse(s: &str) -> Option<Self> {
        let split = s.len().checked_sub(2)?;
        let (ord, day) = s.split_at(split);
        let weekday = Weekday::parse(day)?;
        if ord.is_empty() {
            Some(Self::every(weekday))
        } else {
            Some(Self::nth(ord.parse().ok()?, weekday))
        }
    }
}

impl fmt::Display for WeekdayNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(n) = self.ordinal {
            write!(f, "{n}")?;
        }
        write!(f, "{}", self.weekday)
    }
}

/// UNTIL bound: a date (inclusive through end of day) or a date-time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Until {
    Date(NaiveDate),
    DateTime(CalDateTime),
}

impl fmt::Display for Until {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Date(d) => write!(f, "{}", d.format("%Y%m%d")),
            Self::DateTime(dt) => write!(f, "{dt}"),
        }
    }
}

/// Recurrence pattern (RFC 5545 §3.3.10).
///
/// Frequency is required; interval defaults to 1; COUNT and UNTIL are
/// mutually exclusive; the by-rule lists are empty when unset. A pattern
/// with neither COUNT nor UNTIL is unbounded, and evaluation of it must be
/// lazy and window-bounded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Recur {
    /// Recurrence frequency.
    pub freq: Frequency,
    /// Interval between period instances (≥ 1).
    pub interval: u32,
    /// Week start day (default Monday).
    pub wkst: Weekday,
    /// Occurrence count bound (mutually exclusive with `until`).
    pub count: Option<u32>,
    /// End bound, inclusive (mutually exclusive with `count`).
    pub until: Option<Until>,
    /// By-second list (0-60, 60 for a leap second).
    pub by_second: Vec<u8>,
    /// By-minute list (0-59).
    pub by_minute: Vec<u8>,
    /// By-hour list (0-23).
    pub by_hour: Vec<u8>,
    /// By-day list with optional ordinals.
    pub by_day: Vec<WeekdayNum>,
    /// By-month-day list (±1..=31).
    pub by_month_day: Vec<i8>,
    /// By-year-day list (±1..=366).
    pub by_year_day: Vec<i16>,
    /// By-week-number list (±1..=53), weeks per WKST.
    pub by_week_no: Vec<i8>,
    /// By-month list (1-12).
    pub by_month: Vec<u8>,
    /// Ordinal selection over each period instance's candidate set
    /// (±1..=366), applied after every other by-rule.
    pub by_set_pos: Vec<i16>,
}

impl Recur {
    /// Creates a pattern with the given frequency and defaults for the rest.
    #[must_use]
    pub fn new(freq: Frequency) -> Self {
        Self {
            freq,
            interval: 1,
            wkst: Weekday::Monday,
            count: None,
            until: None,
            by_second: Vec::new(),
            by_minute: Vec::new(),
            by_hour: Vec::new(),
            by_day: Vec::new(),
            by_month_day: Vec::new(),
            by_year_day: Vec::new(),
            by_week_no: Vec::new(),
            by_month: Vec::new(),
            by_set_pos: Vec::new(),
        }
    }

    /// Daily pattern.
    #[must_use]
    pub fn daily() -> Self {
        Self::new(Frequency::Daily)
    }

    /// Weekly pattern.
    #[must_use]
    pub fn weekly() -> Self {
        Self::new(Frequency::Weekly)
    }

    /// Monthly pattern.
    #[must_use]
    pub fn monthly() -> Self {
        Self::new(Frequency::Monthly)
    }

    /// Yearly pattern.
    #[must_use]
    pub fn yearly() -> Self {
        Self::new(Frequency::Yearly)
    }

    /// Sets the interval.
    #[must_use]
    pub fn with_interval(mut self, interval: u32) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the count bound, clearing any until bound.
    #[must_use]
    pub fn with_count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self.until = None;
        self
    }

    /// Sets an until date bound, clearing any count bound.
    #[must_use]
    pub fn with_until_date(mut self, date: NaiveDate) -> Self {
        self.until = Some(Until::Date(date));
        self.count = None;
        self
    }

    /// Sets an until date-time bound, clearing any count bound.
    #[must_use]
    pub fn with_until(mut self, datetime: CalDateTime) -> Self {
        self.until = Some(Until::DateTime(datetime));
        self.count = None;
        self
    }

    /// Sets the week start day.
    #[must_use]
    pub fn with_wkst(mut self, wkst: Weekday) -> Self {
        self.wkst = wkst;
        self
    }

    /// Sets the by-day list.
    #[must_use]
    pub fn with_by_day(mut self, days: Vec<WeekdayNum>) -> Self {
        self.by_day = days;
        self
    }

    /// Sets the by-month-day list.
    #[must_use]
    pub fn with_by_month_day(mut self, days: Vec<i8>) -> Self {
        self.by_month_day = days;
        self
    }

    /// Sets the by-year-day list.
    #[must_use]
    pub fn with_by_year_day(mut self, days: Vec<i16>) -> Self {
        self.by_year_day = days;
        self
    }

    /// Sets the by-week-number list.
    #[must_use]
    pub fn with_by_week_no(mut self, weeks: Vec<i8>) -> Self {
        self.by_week_no = weeks;
        self
    }

    /// Sets the by-month list.
    #[must_use]
    pub fn with_by_month(mut self, months: Vec<u8>) -> Self {
        self.by_month = months;
        self
    }

    /// Sets the by-hour list.
    #[must_use]
    pub fn with_by_hour(mut self, hours: Vec<u8>) -> Self {
        self.by_hour = hours;
        self
    }

    /// Sets the by-minute list.
    #[must_use]
    pub fn with_by_minute(mut self, minutes: Vec<u8>) -> Self {
        self.by_minute = minutes;
        self
    }

    /// Sets the by-second list.
    #[must_use]
    pub fn with_by_second(mut self, seconds: Vec<u8>) -> Self {
        self.by_second = seconds;
        self
    }

    /// Sets the by-set-pos list.
    #[must_use]
    pub fn with_by_set_pos(mut self, positions: Vec<i16>) -> Self {
        self.by_set_pos = positions;
        self
    }

    /// Returns whether the pattern has neither COUNT nor UNTIL.
    #[must_use]
    pub const fn is_unbounded(&self) -> bool {
        self.count.is_none() && self.until.is_none()
    }

    /// Validates field ranges and mutual-exclusion constraints.
    ///
    /// ## Errors
    /// Returns [`RecurError::InvalidPattern`] for interval < 1, COUNT and
    /// UNTIL both set, COUNT = 0, or any by-rule token out of range.
    pub fn validate(&self) -> RecurResult<()> {
        let invalid = |reason: String| Err(RecurError::InvalidPattern(reason));

        if self.interval < 1 {
            return invalid(format!("INTERVAL must be >= 1, got {}", self.interval));
        }
        if self.count.is_some() && self.until.is_some() {
            return invalid("COUNT and UNTIL are mutually exclusive".to_string());
        }
        if self.count == Some(0) {
            return invalid("COUNT must be >= 1".to_string());
        }

        check_range("BYSECOND", &self.by_second, 0, 60)?;
        check_range("BYMINUTE", &self.by_minute, 0, 59)?;
        check_range("BYHOUR", &self.by_hour, 0, 23)?;
        check_range("BYMONTH", &self.by_month, 1, 12)?;
        check_signed("BYMONTHDAY", &self.by_month_day, 31)?;
        check_signed("BYYEARDAY", &self.by_year_day, 366)?;
        check_signed("BYWEEKNO", &self.by_week_no, 53)?;
        check_signed("BYSETPOS", &self.by_set_pos, 366)?;
        for day in &self.by_day {
            if let Some(ordinal) = day.ordinal
                && (ordinal == 0 || !(-53..=53).contains(&ordinal))
            {
                return invalid(format!("BYDAY ordinal out of range: {ordinal}"));
            }
        }

        Ok(())
    }
}

fn check_range(field: &str, values: &[u8], min: u8, max: u8) -> RecurResult<()> {
    for &value in values {
        if !(min..=max).contains(&value) {
            return Err(RecurError::InvalidPattern(format!(
                "{field} value out of range: {value}"
            )));
        }
    }
    Ok(())
}

fn check_signed<T>(field: &str, values: &[T], max: i32) -> RecurResult<()>
where
    T: Copy + Into<i32>,
{
    for &value in values {
        let value: i32 = value.into();
        if value == 0 || value.abs() > max {
            return Err(RecurError::InvalidPattern(format!(
                "{field} value out of range: {value}"
            )));
        }
    }
    Ok(())
}

impl fmt::Display for Recur {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = vec![format!("FREQ={}", self.freq)];

        if self.interval != 1 {
            parts.push(format!("INTERVAL={}", self.interval));
        }
        if let Some(ref until) = self.until {
            parts.push(format!("UNTIL={until}"));
        }
        if let Some(count) = self.count {
            parts.push(format!("COUNT={count}"));
        }
        if self.wkst != Weekday::Monday {
            parts.push(format!("WKST={}", self.wkst));
        }

        push_list(&mut parts, "BYSECOND", &self.by_second);
        push_list(&mut parts, "BYMINUTE", &self.by_minute);
        push_list(&mut parts, "BYHOUR", &self.by_hour);
        push_list(&mut parts, "BYDAY", &self.by_day);
        push_list(&mut parts, "BYMONTHDAY", &self.by_month_day);
        push_list(&mut parts, "BYYEARDAY", &self.by_year_day);
        push_list(&mut parts, "BYWEEKNO", &self.by_week_no);
        push_list(&mut parts, "BYMONTH", &self.by_month);
        push_list(&mut parts, "BYSETPOS", &self.by_set_pos);

        write!(f, "{}", parts.join(";"))
    }
}

fn push_list<T: ToString>(parts: &mut Vec<String>, name: &str, values: &[T]) {
    if !values.is_empty() {
        let joined: Vec<_> = values.iter().map(ToString::to_string).collect();
        parts.push(format!("{name}={}", joined.join(",")));
    }
}

impl FromStr for Recur {
    type Err = RecurError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s.strip_prefix("RRULE:").unwrap_or(s).trim();
        let mut freq = None;
        let mut recur = Self::new(Frequency::Daily);

        for part in body.split(';').filter(|p| !p.is_empty()) {
            let (name, value) = part.split_once('=').ok_or_else(|| {
                RecurError::InvalidPattern(format!("malformed rule part: {part}"))
            })?;
            let bad = || RecurError::InvalidPattern(format!("invalid {name} value: {value}"));

            match name.to_ascii_uppercase().as_str() {
                "FREQ" => freq = Some(Frequency::parse(value).ok_or_else(bad)?),
                "INTERVAL" => recur.interval = value.parse().map_err(|_e| bad())?,
                "COUNT" => recur.count = Some(value.parse().map_err(|_e| bad())?),
                "UNTIL" => recur.until = Some(parse_until(value).ok_or_else(bad)?),
                "WKST" => recur.wkst = Weekday::parse(value).ok_or_else(bad)?,
                "BYSECOND" => recur.by_second = parse_list(value).ok_or_else(bad)?,
                "BYMINUTE" => recur.by_minute = parse_list(value).ok_or_else(bad)?,
                "BYHOUR" => recur.by_hour = parse_list(value).ok_or_else(bad)?,
                "BYDAY" => {
                    recur.by_day = value
                        .split(',')
                        .map(WeekdayNum::parse)
                        .collect::<Option<_>>()
                        .ok_or_else(bad)?;
                }
                "BYMONTHDAY" => recur.by_month_day = parse_list(value).ok_or_else(bad)?,
                "BYYEARDAY" => recur.by_year_day = parse_list(value).ok_or_else(bad)?,
                "BYWEEKNO" => recur.by_week_no = parse_list(value).ok_or_else(bad)?,
                "BYMONTH" => recur.by_month = parse_list(value).ok_or_else(bad)?,
                "BYSETPOS" => recur.by_set_pos = parse_list(value).ok_or_else(bad)?,
                _ => {
                    return Err(RecurError::InvalidPattern(format!(
                        "unknown rule part: {name}"
                    )));
                }
            }
        }

        recur.freq =
            freq.ok_or_else(|| RecurError::InvalidPattern("missing FREQ".to_string()))?;
        recur.validate()?;
        Ok(recur)
    }
}

fn parse_list<T: FromStr>(value: &str) -> Option<Vec<T>> {
    value.split(',').map(|v| v.parse().ok()).collect()
}

fn parse_until(value: &str) -> Option<Until> {
    if value.len() == 8 {
        return NaiveDate::parse_from_str(value, "%Y%m%d").ok().map(Until::Date);
    }
    let (body, utc) = match value.strip_suffix(['Z', 'z']) {
        Some(body) => (body, true),
        None => (value, false),
    };
    let naive = chrono::NaiveDateTime::parse_from_str(body, "%Y%m%dT%H%M%S").ok()?;
    let form = if utc {
        crate::datetime::TimeForm::Utc
    } else {
        crate::datetime::TimeForm::Floating
    };
    Some(Until::DateTime(CalDateTime::from_naive(naive, form)))
}
