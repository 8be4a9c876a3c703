//! iCalendar DURATION value type (RFC 5545 §3.3.6).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RecurError;

/// Duration value (RFC 5545 §3.3.6).
///
/// Either week-based (`P2W`) or day/time-based (`P1DT2H30M`). iCalendar
/// durations have no year/month designators because months have variable
/// lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct IcalDuration {
    /// Whether this duration is negative.
    pub negative: bool,
    /// Number of weeks (mutually exclusive with the other components).
    pub weeks: u32,
    /// Number of days.
    pub days: u32,
    /// Number of hours.
    pub hours: u32,
    /// Number of minutes.
    pub minutes: u32,
    /// Number of seconds.
    pub seconds: u32,
}

impl IcalDuration {
    /// The zero duration (`P0D`).
    pub const ZERO: Self = Self {
        negative: false,
        weeks: 0,
        days: 0,
        hours: 0,
        minutes: 0,
        seconds: 0,
    };

    /// Creates a week-based duration.
    #[must_use]
    pub const fn weeks(weeks: u32) -> Self {
        Self {
            weeks,
            ..Self::ZERO
        }
    }

    /// Creates a duration from days.
    #[must_use]
    pub const fn days(days: u32) -> Self {
        Self { days, ..Self::ZERO }
    }

    /// Creates a duration from hours.
    #[must_use]
    pub const fn hours(hours: u32) -> Self {
        Self {
            hours,
            ..Self::ZERO
        }
    }

    /// Creates a duration from minutes.
    #[must_use]
    pub const fn minutes(minutes: u32) -> Self {
        Self {
            minutes,
            ..Self::ZERO
        }
    }

    /// Creates a duration from seconds.
    #[must_use]
    pub const fn seconds(seconds: u32) -> Self {
        Self {
            seconds,
            ..Self::ZERO
        }
    }

    /// Adds an hours component.
    #[must_use]
    pub const fn and_hours(mut self, hours: u32) -> Self {
        self.hours = hours;
        self
    }

    /// Adds a minutes component.
    #[must_use]
    pub const fn and_minutes(mut self, minutes: u32) -> Self {
        self.minutes = minutes;
        self
    }

    /// Adds a seconds component.
    #[must_use]
    pub const fn and_seconds(mut self, seconds: u32) -> Self {
        self.seconds = seconds;
        self
    }

    /// Negates this duration.
    #[must_use]
    pub const fn negate(mut self) -> Self {
        self.negative = !self.negative;
        self
    }

    /// Returns whether every component is zero.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.weeks == 0 && self.days == 0 && self.hours == 0 && self.minutes == 0 && self.seconds == 0
    }

    /// Returns the total duration in seconds.
    #[must_use]
    #[expect(clippy::cast_lossless, reason = "i64::from is not const")]
    pub const fn as_seconds(&self) -> i64 {
        let total = (self.weeks as i64 * 7 * 24 * 3600)
            + (self.days as i64 * 24 * 3600)
            + (self.hours as i64 * 3600)
            + (self.minutes as i64 * 60)
            + (self.seconds as i64);

        if self.negative { -total } else { total }
    }

    /// Converts to a `chrono` duration.
    #[must_use]
    pub fn to_chrono(self) -> chrono::Duration {
        chrono::Duration::seconds(self.as_seconds())
    }
}

impl fmt::Display for IcalDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            write!(f, "-")?;
        }
        write!(f, "P")?;

        if self.weeks > 0 {
            return write!(f, "{}W", self.weeks);
        }

        if self.days > 0 {
            write!(f, "{}D", self.days)?;
        }
        if self.hours > 0 || self.minutes > 0 || self.seconds > 0 {
            write!(f, "T")?;
            if self.hours > 0 {
                write!(f, "{}H", self.hours)?;
            }
            if self.minutes > 0 {
                write!(f, "{}M", self.minutes)?;
            }
            if self.seconds > 0 {
                write!(f, "{}S", self.seconds)?;
            }
        } else if self.days == 0 {
            write!(f, "0D")?;
        }
        Ok(())
    }
}

impl FromStr for IcalDuration {
    type Err = RecurError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RecurError::InvalidPattern(format!("invalid duration: {s}"));

        let (negative, rest) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };
        let rest = rest.strip_prefix('P').ok_or_else(invalid)?;

        let mut duration = Self {
            negative,
            ..Self::ZERO
        };
        let mut in_time = false;
        let mut digits = String::new();

        for ch in rest.chars() {
            match ch {
                '0'..='9' => digits.push(ch),
                'T' | 't' if digits.is_empty() => in_time = true,
                designator => {
                    let value: u32 = digits.parse().map_err(|_e| invalid())?;
                    digits.clear();
                    match (designator.to_ascii_uppercase(), in_time) {
                        ('W', false) => duration.weeks = value,
                        ('D', false) => duration.days = value,
                        ('H', true) => duration.hours = value,
                        ('M', true) => duration.minutes = value,
                        ('S', true) => duration.seconds = value,
                        _ => return Err(invalid()),
                    }
                }
            }
        }

        if !digits.is_empty() {
            return Err(invalid());
        }
        Ok(duration)
    }
}
