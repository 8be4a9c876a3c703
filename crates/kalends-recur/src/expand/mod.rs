//! Recurrence expansion: rule iteration, occurrence merging, alarm
//! resolution, and the materialized-occurrence cache.

pub mod alarm;
pub mod cache;
pub mod evaluator;
pub mod rrule_iter;

pub use alarm::{alarm_occurrences, resolve_alarm_occurrences, AlarmOccurrence, AlarmOccurrenceIter};
pub use cache::OccurrenceCache;
pub use evaluator::{evaluate, OccurrenceIter};
pub use rrule_iter::RecurIter;
