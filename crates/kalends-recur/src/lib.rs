//! Recurrence evaluation for iCalendar components (RFC 5545 §3.3.10,
//! §3.8.5).
//!
//! Builds on [`kalends_core`]'s value types: a [`Calendar`] arena holds
//! recurring [`Component`]s, [`evaluate`] streams their occurrences over a
//! half-open window, [`resolve_alarm_occurrences`] derives alarm fire
//! times, and [`OccurrenceCache`] memoizes materialized results.

pub mod component;
pub mod expand;

pub use component::{
    Alarm, AlarmRepeat, Calendar, Component, ComponentHandle, ComponentKind, Recurrable, Trigger,
    TriggerRelation,
};
pub use expand::{
    alarm_occurrences, evaluate, resolve_alarm_occurrences, AlarmOccurrence, AlarmOccurrenceIter,
    OccurrenceCache, OccurrenceIter, RecurIter,
};
