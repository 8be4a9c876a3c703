//! iCalendar PERIOD value type (RFC 5545 §3.3.9).

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::datetime::{CalDateTime, DateUnit};
use crate::duration::IcalDuration;
use crate::error::{RecurError, RecurResult};

/// How a period's extent is expressed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeriodEnd {
    /// Explicit end instant.
    Instant(CalDateTime),
    /// Duration from the start.
    Duration(IcalDuration),
}

/// An interval: a start instant and either an end instant or a duration.
///
/// The two extents are mutually derivable. Zero-length periods are valid and
/// represent point-in-time components.
///
/// Periods order by start, ties broken by extent (shorter first), giving a
/// deterministic total order. The ordering compares wall-clock values;
/// reconcile forms with [`CalDateTime::matched_to`] before sorting values
/// from different zones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
    start: CalDateTime,
    end: PeriodEnd,
}

impl Period {
    /// Creates a period from explicit start and end.
    ///
    /// ## Errors
    /// Returns [`RecurError::InvalidDate`] if the end precedes the start.
    pub fn from_start_end(start: CalDateTime, end: CalDateTime) -> RecurResult<Self> {
        if end.naive() < start.naive() {
            return Err(RecurError::InvalidDate(format!(
                "period end {end} precedes start {start}"
            )));
        }
        Ok(Self {
            start,
            end: PeriodEnd::Instant(end),
        })
    }

    /// Creates a period from a start and a non-negative duration.
    ///
    /// ## Errors
    /// Returns [`RecurError::InvalidDate`] if the duration is negative.
    pub fn from_start_duration(start: CalDateTime, duration: IcalDuration) -> RecurResult<Self> {
        if duration.as_seconds() < 0 {
            return Err(RecurError::InvalidDate(format!(
                "negative period duration {duration}"
            )));
        }
        Ok(Self {
            start,
            end: PeriodEnd::Duration(duration),
        })
    }

    /// Creates a zero-length period at an instant.
    #[must_use]
    pub const fn point(start: CalDateTime) -> Self {
        Self {
            start,
            end: PeriodEnd::Duration(IcalDuration::ZERO),
        }
    }

    /// The start instant.
    #[must_use]
    pub const fn start(&self) -> &CalDateTime {
        &self.start
    }

    /// The end as given (instant or duration).
    #[must_use]
    pub const fn end(&self) -> &PeriodEnd {
        &self.end
    }

    /// The end instant, derived from the duration where necessary.
    ///
    /// A duration's week/day part shifts the wall clock (nominal days); the
    /// time part is added as seconds.
    ///
    /// ## Errors
    /// Returns [`RecurError::InvalidDate`] if the derived end overflows the
    /// calendar range.
    pub fn effective_end(&self) -> RecurResult<CalDateTime> {
        match &self.end {
            PeriodEnd::Instant(end) => Ok(end.clone()),
            PeriodEnd::Duration(duration) => {
                let days = i64::from(duration.weeks) * 7 + i64::from(duration.days);
                let seconds = i64::from(duration.hours) * 3600
                    + i64::from(duration.minutes) * 60
                    + i64::from(duration.seconds);
                self.start
                    .add(DateUnit::Day, days)?
                    .add(DateUnit::Second, seconds)
            }
        }
    }

    /// The wall-clock extent in seconds.
    #[must_use]
    pub fn wall_duration_seconds(&self) -> i64 {
        match &self.end {
            PeriodEnd::Instant(end) => (end.naive() - self.start.naive()).num_seconds(),
            PeriodEnd::Duration(duration) => duration.as_seconds(),
        }
    }

    /// Returns whether the instant falls inside `[start, end)`.
    ///
    /// Zero-length periods contain exactly their start instant.
    #[must_use]
    pub fn contains(&self, instant: &CalDateTime) -> bool {
        let t = instant.naive();
        let start = self.start.naive();
        if self.wall_duration_seconds() == 0 {
            return t == start;
        }
        let end = start + chrono::Duration::seconds(self.wall_duration_seconds());
        t >= start && t < end
    }

    /// Returns whether two periods share any instant.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        let a_start = self.start.naive();
        let a_end = a_start + chrono::Duration::seconds(self.wall_duration_seconds());
        let b_start = other.start.naive();
        let b_end = b_start + chrono::Duration::seconds(other.wall_duration_seconds());
        a_start < b_end && b_start < a_end
    }
}

impl PartialOrd for Period {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Period {
    fn cmp(&self, other: &Self) -> Ordering {
        self.start
            .naive()
            .cmp(&other.start.naive())
            .then_with(|| self.wall_duration_seconds().cmp(&other.wall_duration_seconds()))
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.end {
            PeriodEnd::Instant(end) => write!(f, "{}/{end}", self.start),
            PeriodEnd::Duration(duration) => write!(f, "{}/{duration}", self.start),
        }
    }
}
