//! Value types for the kalends calendaring library.
//!
//! This crate holds the RFC 5545 value model the recurrence engine is built
//! on: the zoned-instant abstraction, durations, periods, recurrence
//! patterns, time zone resolution, and the shared error taxonomy. Expansion
//! lives in `kalends-recur`.

pub mod datetime;
pub mod duration;
pub mod error;
pub mod period;
pub mod rrule;
pub mod zone;

pub use datetime::{CalDateTime, DateUnit, Granularity, TimeForm};
pub use duration::IcalDuration;
pub use error::{RecurError, RecurResult};
pub use period::{Period, PeriodEnd};
pub use rrule::{Frequency, Recur, Until, Weekday, WeekdayNum};
pub use zone::{TzdbResolver, ZoneResolver};
