//! iCalendar DATE and DATE-TIME value types (RFC 5545 §3.3.4, §3.3.5).
//!
//! [`CalDateTime`] is the zoned-instant abstraction the recurrence engine is
//! built on: a wall-clock calendar value in one of three forms (floating,
//! UTC, zoned), with calendar-unit arithmetic that shifts the wall clock
//! first and re-resolves the zone offset afterwards. That ordering is what
//! keeps "every day at 09:00" at 09:00 across a DST transition.

use std::cmp::Ordering;
use std::fmt;

use chrono::{
    DateTime, Datelike, Duration as ChronoDuration, LocalResult, NaiveDate, NaiveDateTime,
    NaiveTime, TimeZone, Timelike, Utc,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{RecurError, RecurResult};
use crate::zone::ZoneResolver;

/// Form of a DATE-TIME value (RFC 5545 §3.3.5).
///
/// The three forms are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeForm {
    /// Floating time: the same wall-clock time in any zone. Carries no
    /// offset; it is interpreted against a reference zone only when compared
    /// or converted.
    Floating,
    /// UTC time (`Z` suffix).
    Utc,
    /// Local time with a TZID reference.
    Zoned(String),
}

/// Calendar unit for wall-clock arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

/// Granularity for [`CalDateTime::truncate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Second,
    Minute,
    Hour,
    Day,
}

/// A point in calendar time: date, optional time-of-day, and form.
///
/// Immutable once constructed; arithmetic and conversion produce new values.
/// A value without a time-of-day is a DATE (all-day) value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CalDateTime {
    date: NaiveDate,
    time: Option<NaiveTime>,
    form: TimeForm,
}

impl CalDateTime {
    /// Creates a value from raw parts.
    #[must_use]
    pub const fn new(date: NaiveDate, time: Option<NaiveTime>, form: TimeForm) -> Self {
        Self { date, time, form }
    }

    /// Creates a value from a wall-clock datetime and a form.
    #[must_use]
    pub fn from_naive(naive: NaiveDateTime, form: TimeForm) -> Self {
        Self {
            date: naive.date(),
            time: Some(naive.time()),
            form,
        }
    }

    /// Creates a date-only (all-day) value.
    #[must_use]
    pub const fn from_date(date: NaiveDate, form: TimeForm) -> Self {
        Self {
            date,
            time: None,
            form,
        }
    }

    /// Creates a floating DATE-TIME.
    ///
    /// ## Errors
    /// Returns [`RecurError::InvalidDate`] if the components do not name a
    /// real calendar date or time.
    pub fn floating(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> RecurResult<Self> {
        Ok(Self::from_naive(
            make_naive(year, month, day, hour, minute, second)?,
            TimeForm::Floating,
        ))
    }

    /// Creates a UTC DATE-TIME.
    ///
    /// ## Errors
    /// Returns [`RecurError::InvalidDate`] if the components do not name a
    /// real calendar date or time.
    pub fn utc(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> RecurResult<Self> {
        Ok(Self::from_naive(
            make_naive(year, month, day, hour, minute, second)?,
            TimeForm::Utc,
        ))
    }

    /// Creates a zoned DATE-TIME.
    ///
    /// The TZID is not resolved here; resolution happens on conversion.
    ///
    /// ## Errors
    /// Returns [`RecurError::InvalidDate`] if the components do not name a
    /// real calendar date or time.
    pub fn zoned(
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        minute: u32,
        second: u32,
        tzid: impl Into<String>,
    ) -> RecurResult<Self> {
        Ok(Self::from_naive(
            make_naive(year, month, day, hour, minute, second)?,
            TimeForm::Zoned(tzid.into()),
        ))
    }

    /// The calendar date.
    #[must_use]
    pub const fn date(&self) -> NaiveDate {
        self.date
    }

    /// The time-of-day, if this is not a date-only value.
    #[must_use]
    pub const fn time(&self) -> Option<NaiveTime> {
        self.time
    }

    /// The form of this value.
    #[must_use]
    pub const fn form(&self) -> &TimeForm {
        &self.form
    }

    /// Returns whether this value carries a time-of-day.
    #[must_use]
    pub const fn has_time(&self) -> bool {
        self.time.is_some()
    }

    /// Returns whether this is a UTC value.
    #[must_use]
    pub fn is_utc(&self) -> bool {
        matches!(self.form, TimeForm::Utc)
    }

    /// Returns whether this is a floating value.
    #[must_use]
    pub fn is_floating(&self) -> bool {
        matches!(self.form, TimeForm::Floating)
    }

    /// The TZID for zoned values.
    #[must_use]
    pub fn tzid(&self) -> Option<&str> {
        match &self.form {
            TimeForm::Zoned(tzid) => Some(tzid),
            TimeForm::Floating | TimeForm::Utc => None,
        }
    }

    /// The wall-clock representation; date-only values read as midnight.
    #[must_use]
    pub fn naive(&self) -> NaiveDateTime {
        self.date.and_time(self.time.unwrap_or(NaiveTime::MIN))
    }

    /// Adds calendar units on the wall-clock representation.
    ///
    /// Day and coarser units move the calendar first; the zone offset is
    /// re-derived only when the value is converted to an absolute instant.
    /// The elapsed real duration may therefore differ from `amount` across a
    /// DST transition, which is the required calendar behavior. Adding a
    /// sub-day unit to a date-only value promotes it to a datetime at
    /// midnight plus the amount.
    ///
    /// ## Errors
    /// Returns [`RecurError::InvalidDate`] if the result falls outside the
    /// representable calendar range.
    pub fn add(&self, unit: DateUnit, amount: i64) -> RecurResult<Self> {
        let overflow = || RecurError::InvalidDate(format!("{self} + {amount} {unit:?} overflows"));

        match unit {
            DateUnit::Second | DateUnit::Minute | DateUnit::Hour => {
                let delta = match unit {
                    DateUnit::Second => ChronoDuration::seconds(amount),
                    DateUnit::Minute => ChronoDuration::minutes(amount),
                    _ => ChronoDuration::hours(amount),
                };
                let shifted = self.naive().checked_add_signed(delta).ok_or_else(overflow)?;
                Ok(Self::from_naive(shifted, self.form.clone()))
            }
            DateUnit::Day | DateUnit::Week => {
                let days = if unit == DateUnit::Week { amount * 7 } else { amount };
                let date = self
                    .date
                    .checked_add_signed(ChronoDuration::days(days))
                    .ok_or_else(overflow)?;
                Ok(Self {
                    date,
                    time: self.time,
                    form: self.form.clone(),
                })
            }
            DateUnit::Month => {
                let months = i32::try_from(amount).map_err(|_e| overflow())?;
                Ok(Self {
                    date: shift_months(self.date, months).ok_or_else(overflow)?,
                    time: self.time,
                    form: self.form.clone(),
                })
            }
            DateUnit::Year => {
                let years = i32::try_from(amount).map_err(|_e| overflow())?;
                let year = self.date.year().checked_add(years).ok_or_else(overflow)?;
                let day = self.date.day().min(days_in_month(year, self.date.month()));
                Ok(Self {
                    date: NaiveDate::from_ymd_opt(year, self.date.month(), day)
                        .ok_or_else(overflow)?,
                    time: self.time,
                    form: self.form.clone(),
                })
            }
        }
    }

    /// Midnight on this value's date, same form.
    #[must_use]
    pub fn start_of_day(&self) -> Self {
        Self {
            date: self.date,
            time: Some(NaiveTime::MIN),
            form: self.form.clone(),
        }
    }

    /// The last representable second of this value's date, same form.
    #[must_use]
    pub fn end_of_day(&self) -> Self {
        Self {
            date: self.date,
            time: NaiveTime::from_hms_opt(23, 59, 59),
            form: self.form.clone(),
        }
    }

    /// Truncates fields finer than the granularity. Date-only values are
    /// unchanged.
    #[must_use]
    pub fn truncate(&self, granularity: Granularity) -> Self {
        let time = self.time.map(|t| match granularity {
            Granularity::Second => t,
            Granularity::Minute => t.with_second(0).unwrap_or(t),
            Granularity::Hour => NaiveTime::from_hms_opt(t.hour(), 0, 0).unwrap_or(t),
            Granularity::Day => NaiveTime::MIN,
        });
        Self {
            date: self.date,
            time,
            form: self.form.clone(),
        }
    }

    /// Resolves this value to an absolute UTC instant.
    ///
    /// Floating values are interpreted in the resolver's system default
    /// zone. A wall time inside a spring-forward gap resolves leniently by
    /// shifting forward one hour; the repeated fall-back hour takes the
    /// earlier offset (RFC 5545 §3.3.5).
    ///
    /// ## Errors
    /// Returns [`RecurError::UnknownZone`] if a zoned value's TZID does not
    /// resolve.
    pub fn as_utc(&self, resolver: &dyn ZoneResolver) -> RecurResult<DateTime<Utc>> {
        match &self.form {
            TimeForm::Utc => Ok(Utc.from_utc_datetime(&self.naive())),
            TimeForm::Zoned(tzid) => Ok(local_to_utc(resolver.resolve(tzid)?, self.naive())),
            TimeForm::Floating => Ok(local_to_utc(resolver.system_default(), self.naive())),
        }
    }

    /// Converts to the given zone, preserving the absolute instant.
    ///
    /// Date-only values keep only the converted date and stay date-only.
    ///
    /// ## Errors
    /// Returns [`RecurError::UnknownZone`] if either TZID fails to resolve.
    pub fn to_zone(&self, tzid: &str, resolver: &dyn ZoneResolver) -> RecurResult<Self> {
        let tz = resolver.resolve(tzid)?;
        let local = self.as_utc(resolver)?.with_timezone(&tz).naive_local();
        Ok(Self {
            date: local.date(),
            time: self.time.map(|_| local.time()),
            form: TimeForm::Zoned(tzid.to_string()),
        })
    }

    /// Converts to the given zone, falling back to the system default zone
    /// when the TZID is unknown.
    ///
    /// ## Errors
    /// Returns [`RecurError::UnknownZone`] only if this value's own TZID
    /// fails to resolve.
    pub fn to_zone_or_local(&self, tzid: &str, resolver: &dyn ZoneResolver) -> RecurResult<Self> {
        let tz = resolver.resolve_or_default(tzid);
        let local = self.as_utc(resolver)?.with_timezone(&tz).naive_local();
        Ok(Self {
            date: local.date(),
            time: self.time.map(|_| local.time()),
            form: TimeForm::Zoned(tz.name().to_string()),
        })
    }

    /// Converts to UTC form, preserving the absolute instant.
    ///
    /// ## Errors
    /// Returns [`RecurError::UnknownZone`] if a zoned TZID fails to resolve.
    pub fn to_utc_form(&self, resolver: &dyn ZoneResolver) -> RecurResult<Self> {
        let utc = self.as_utc(resolver)?.naive_utc();
        Ok(Self {
            date: utc.date(),
            time: self.time.map(|_| utc.time()),
            form: TimeForm::Utc,
        })
    }

    /// Reconciles this value with a reference value's zone before
    /// evaluation.
    ///
    /// The asymmetry here is deliberate and load-bearing: a zoned reference
    /// converts this value to its named zone, but a UTC reference converts
    /// to UTC form, never to a named zone. A floating reference associates
    /// this value with the resolver's system default zone.
    ///
    /// ## Errors
    /// Returns [`RecurError::UnknownZone`] if a TZID fails to resolve.
    pub fn matched_to(&self, reference: &Self, resolver: &dyn ZoneResolver) -> RecurResult<Self> {
        match &reference.form {
            TimeForm::Zoned(ref_tzid) => {
                if self
                    .tzid()
                    .is_some_and(|tzid| tzid.eq_ignore_ascii_case(ref_tzid))
                {
                    Ok(self.clone())
                } else {
                    self.to_zone(ref_tzid, resolver)
                }
            }
            TimeForm::Utc => self.to_utc_form(resolver),
            TimeForm::Floating => self.to_zone(resolver.system_default().name(), resolver),
        }
    }

    /// Compares two values as absolute instants, interpreting floating
    /// values against the caller-supplied reference zone.
    ///
    /// Floating values are only comparable to zoned ones through such a
    /// reference; this is the one place the engine interprets them.
    ///
    /// ## Errors
    /// Returns [`RecurError::UnknownZone`] if a zoned TZID fails to resolve.
    pub fn compare_in(
        &self,
        other: &Self,
        reference: Tz,
        resolver: &dyn ZoneResolver,
    ) -> RecurResult<Ordering> {
        let resolve = |value: &Self| -> RecurResult<DateTime<Utc>> {
            if value.is_floating() {
                Ok(local_to_utc(reference, value.naive()))
            } else {
                value.as_utc(resolver)
            }
        };
        Ok(resolve(self)?.cmp(&resolve(other)?))
    }
}

impl fmt::Display for CalDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.date.format("%Y%m%d"))?;
        if let Some(time) = self.time {
            write!(f, "T{}", time.format("%H%M%S"))?;
        }
        if self.is_utc() {
            write!(f, "Z")?;
        }
        Ok(())
    }
}

/// Converts a wall time in a zone to UTC, leniently.
///
/// Spring-forward gap: shift forward one hour. Fall-back fold: earlier
/// offset.
#[must_use]
pub fn local_to_utc(tz: Tz, local: NaiveDateTime) -> DateTime<Utc> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
        LocalResult::None => {
            let shifted = local + ChronoDuration::hours(1);
            match tz.from_local_datetime(&shifted) {
                LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
                // Gaps are at most a handful of hours; treat the wall time as UTC
                // if the zone data is that pathological.
                LocalResult::None => Utc.from_utc_datetime(&local),
            }
        }
    }
}

/// Returns the number of days in a month.
#[must_use]
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    next.and_then(|d| d.pred_opt()).map_or(31, |d| d.day())
}

/// Shifts a date by whole months, clamping the day to the target month's
/// length (Jan 31 + 1 month = Feb 28/29).
#[must_use]
pub fn shift_months(date: NaiveDate, months: i32) -> Option<NaiveDate> {
    let zero_based = i64::from(date.year()) * 12 + i64::from(date.month0()) + i64::from(months);
    let year = i32::try_from(zero_based.div_euclid(12)).ok()?;
    let month = u32::try_from(zero_based.rem_euclid(12)).ok()? + 1;
    let day = date.day().min(days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day)
}

fn make_naive(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
) -> RecurResult<NaiveDateTime> {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, second))
        .ok_or_else(|| {
            RecurError::InvalidDate(format!(
                "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone::TzdbResolver;

    #[test]
    fn display_forms() {
        let dt = CalDateTime::utc(2026, 1, 23, 12, 0, 0).expect("valid");
        assert_eq!(dt.to_string(), "20260123T120000Z");

        let dt = CalDateTime::floating(2026, 1, 23, 12, 0, 0).expect("valid");
        assert_eq!(dt.to_string(), "20260123T120000");

        let date = NaiveDate::from_ymd_opt(2026, 1, 23).expect("valid");
        let dt = CalDateTime::from_date(date, TimeForm::Floating);
        assert_eq!(dt.to_string(), "20260123");
    }

    #[test]
    fn invalid_components_rejected() {
        assert!(CalDateTime::utc(2026, 2, 30, 0, 0, 0).is_err());
        assert!(CalDateTime::utc(2026, 1, 1, 24, 0, 0).is_err());
    }

    #[test]
    fn add_months_clamps() {
        let dt = CalDateTime::utc(2024, 1, 31, 9, 0, 0).expect("valid");
        let next = dt.add(DateUnit::Month, 1).expect("valid");
        assert_eq!(next.to_string(), "20240229T090000Z");
    }

    #[test]
    fn add_years_clamps_leap_day() {
        let dt = CalDateTime::utc(2024, 2, 29, 9, 0, 0).expect("valid");
        let next = dt.add(DateUnit::Year, 1).expect("valid");
        assert_eq!(next.to_string(), "20250228T090000Z");
    }

    #[test]
    fn add_day_keeps_wall_time_across_dst() {
        // US spring-forward 2024-03-10: 09:00 local stays 09:00 local, so the
        // elapsed real time is 23 hours.
        let resolver = TzdbResolver::new();
        let dt = CalDateTime::zoned(2024, 3, 9, 9, 0, 0, "America/New_York").expect("valid");
        let next = dt.add(DateUnit::Day, 1).expect("valid");

        assert_eq!(next.naive().time(), NaiveTime::from_hms_opt(9, 0, 0).expect("valid"));
        let elapsed = next.as_utc(&resolver).expect("resolves")
            - dt.as_utc(&resolver).expect("resolves");
        assert_eq!(elapsed, ChronoDuration::hours(23));
    }

    #[test]
    fn add_sub_day_promotes_date_only() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid");
        let dt = CalDateTime::from_date(date, TimeForm::Floating);
        let shifted = dt.add(DateUnit::Hour, 9).expect("valid");
        assert!(shifted.has_time());
        assert_eq!(shifted.to_string(), "20240101T090000");
    }

    #[test]
    fn truncate_granularities() {
        let dt = CalDateTime::utc(2024, 5, 6, 12, 34, 56).expect("valid");
        assert_eq!(dt.truncate(Granularity::Minute).to_string(), "20240506T123400Z");
        assert_eq!(dt.truncate(Granularity::Hour).to_string(), "20240506T120000Z");
        assert_eq!(dt.truncate(Granularity::Day).to_string(), "20240506T000000Z");
    }

    #[test]
    fn start_and_end_of_day() {
        let dt = CalDateTime::utc(2024, 5, 6, 12, 34, 56).expect("valid");
        assert_eq!(dt.start_of_day().to_string(), "20240506T000000Z");
        assert_eq!(dt.end_of_day().to_string(), "20240506T235959Z");
    }

    #[test]
    fn to_zone_round_trip() {
        let resolver = TzdbResolver::new();
        let dt = CalDateTime::utc(2024, 1, 15, 15, 0, 0).expect("valid");

        let ny = dt.to_zone("America/New_York", &resolver).expect("resolves");
        assert_eq!(ny.naive().time(), NaiveTime::from_hms_opt(10, 0, 0).expect("valid"));
        assert_eq!(ny.tzid(), Some("America/New_York"));

        let back = ny.to_utc_form(&resolver).expect("resolves");
        assert_eq!(back, dt);
    }

    #[test]
    fn spring_forward_gap_is_lenient() {
        let resolver = TzdbResolver::new();
        // 02:30 does not exist on 2024-03-10 in New York.
        let dt = CalDateTime::zoned(2024, 3, 10, 2, 30, 0, "America/New_York").expect("valid");
        let utc = dt.as_utc(&resolver).expect("resolves");
        assert_eq!(utc, Utc.with_ymd_and_hms(2024, 3, 10, 7, 30, 0).single().expect("valid"));
    }

    #[test]
    fn matched_to_preserves_utc_asymmetry() {
        let resolver = TzdbResolver::new();
        let zoned = CalDateTime::zoned(2024, 1, 15, 10, 0, 0, "America/New_York").expect("valid");
        let utc_ref = CalDateTime::utc(2024, 1, 15, 0, 0, 0).expect("valid");
        let zoned_ref =
            CalDateTime::zoned(2024, 1, 15, 0, 0, 0, "Europe/Berlin").expect("valid");

        // UTC reference converts to UTC form, never to a named zone.
        let matched = zoned.matched_to(&utc_ref, &resolver).expect("resolves");
        assert!(matched.is_utc());
        assert_eq!(matched.to_string(), "20240115T150000Z");

        // Zoned reference converts to its named zone.
        let matched = zoned.matched_to(&zoned_ref, &resolver).expect("resolves");
        assert_eq!(matched.tzid(), Some("Europe/Berlin"));
        assert_eq!(matched.naive().time(), NaiveTime::from_hms_opt(16, 0, 0).expect("valid"));
    }

    #[test]
    fn compare_in_interprets_floating() {
        let resolver = TzdbResolver::new();
        let floating = CalDateTime::floating(2024, 1, 15, 10, 0, 0).expect("valid");
        let utc = CalDateTime::utc(2024, 1, 15, 14, 0, 0).expect("valid");

        // 10:00 New York is 15:00 UTC, after 14:00 UTC.
        let ord = floating
            .compare_in(&utc, Tz::America__New_York, &resolver)
            .expect("resolves");
        assert_eq!(ord, Ordering::Greater);

        // 10:00 UTC-as-reference is before 14:00 UTC.
        let ord = floating
            .compare_in(&utc, Tz::UTC, &resolver)
            .expect("resolves");
        assert_eq!(ord, Ordering::Less);
    }

    #[test]
    fn shift_months_across_years() {
        let date = NaiveDate::from_ymd_opt(2024, 11, 30).expect("valid");
        assert_eq!(
            shift_months(date, 3),
            NaiveDate::from_ymd_opt(2025, 2, 28)
        );
        assert_eq!(
            shift_months(date, -11),
            NaiveDate::from_ymd_opt(2023, 12, 30)
        );
    }
}
