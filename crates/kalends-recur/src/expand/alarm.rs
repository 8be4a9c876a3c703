//! Alarm fire-time resolution (RFC 5545 §3.6.6, §3.8.6.3).
//!
//! A relative trigger fires against every occurrence of its component, at
//! the occurrence start (or effective end) plus the trigger offset, with
//! optional repeat fan-out. An absolute trigger ignores occurrences and
//! fires exactly once.

use std::cmp::Ordering;
use std::collections::VecDeque;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use uuid::Uuid;

use kalends_core::{
    CalDateTime, DateUnit, IcalDuration, Period, RecurResult, ZoneResolver,
};

use crate::component::{Alarm, Component, ComponentHandle, Trigger, TriggerRelation};
use crate::expand::evaluator::{evaluate, OccurrenceIter};

/// One resolved alarm fire.
///
/// Carries the fire period and references to the owning component and
/// alarm, never the objects themselves. Ordered by period, then component,
/// then alarm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmOccurrence {
    /// When the alarm fires.
    pub period: Period,
    /// Owning component, as an arena handle.
    pub component: ComponentHandle,
    /// Firing alarm.
    pub alarm_uid: Uuid,
}

impl Ord for AlarmOccurrence {
    fn cmp(&self, other: &Self) -> Ordering {
        self.period
            .cmp(&other.period)
            .then_with(|| self.component.cmp(&other.component))
            .then_with(|| self.alarm_uid.cmp(&other.alarm_uid))
    }
}

impl PartialOrd for AlarmOccurrence {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Lazy stream of one alarm's fires within a window.
///
/// Fires are yielded per generating occurrence; when an occurrence's repeat
/// tail extends past the next occurrence the stream is locally out of
/// order. [`resolve_alarm_occurrences`] sorts the collected result.
pub struct AlarmOccurrenceIter<'r> {
    occurrences: Option<OccurrenceIter<'r>>,
    resolver: &'r dyn ZoneResolver,
    component: ComponentHandle,
    alarm_uid: Uuid,
    trigger: Trigger,
    repeat: Option<(u32, IcalDuration)>,
    range_start: Option<DateTime<Utc>>,
    range_end: Option<DateTime<Utc>>,
    buffer: VecDeque<AlarmOccurrence>,
    absolute_emitted: bool,
    done: bool,
}

/// Builds the fire stream for one alarm of a component.
///
/// `handle` tags the output; the component itself provides the seed,
/// duration, and recurrence fields. For a relative trigger that fires
/// before its occurrence the evaluation window is widened so occurrences
/// just past `range_end` still contribute in-window fires.
///
/// ## Errors
/// Propagates evaluation errors ([`kalends_core::RecurError::InvalidPattern`],
/// [`kalends_core::RecurError::UnboundedQuery`],
/// [`kalends_core::RecurError::UnknownZone`]).
pub fn alarm_occurrences<'r>(
    component: &Component,
    handle: ComponentHandle,
    alarm: &Alarm,
    range_start: Option<DateTime<Utc>>,
    range_end: Option<DateTime<Utc>>,
    resolver: &'r dyn ZoneResolver,
) -> RecurResult<AlarmOccurrenceIter<'r>> {
    let occurrences = match &alarm.trigger {
        Trigger::Absolute(_) => None,
        Trigger::Relative { offset, related } => {
            let mut shift = offset.as_seconds();
            if *related == TriggerRelation::End {
                shift += component
                    .duration
                    .map_or(0, |duration| duration.as_seconds());
            }
            // Fires earlier than their occurrence pull occurrences from
            // beyond the window's upper bound into scope.
            let eval_end = range_end.map(|end| end + ChronoDuration::seconds(-shift.min(0)));
            Some(evaluate(component, None, eval_end, resolver)?)
        }
    };

    Ok(AlarmOccurrenceIter {
        occurrences,
        resolver,
        component: handle,
        alarm_uid: alarm.uid,
        trigger: alarm.trigger.clone(),
        repeat: alarm.repeat.as_ref().map(|r| (r.count, r.interval)),
        range_start,
        range_end,
        buffer: VecDeque::new(),
        absolute_emitted: false,
        done: false,
    })
}

/// Resolves every alarm of a component over `[range_start, range_end)`,
/// sorted by period, then component, then alarm.
///
/// This is the eager convenience entry point: each alarm expands through
/// the lazy [`alarm_occurrences`] iterator, but the cross-alarm sort needs
/// the full set, so the fires are buffered before being returned. Callers
/// that want one alarm's fires as they come should use
/// [`alarm_occurrences`] directly.
///
/// ## Errors
/// Propagates evaluation errors; the first mid-stream error aborts.
#[tracing::instrument(skip_all, fields(uid = %component.uid))]
pub fn resolve_alarm_occurrences(
    component: &Component,
    handle: ComponentHandle,
    range_start: Option<DateTime<Utc>>,
    range_end: Option<DateTime<Utc>>,
    resolver: &dyn ZoneResolver,
) -> RecurResult<Vec<AlarmOccurrence>> {
    let mut out = Vec::new();
    for alarm in &component.alarms {
        let iter = alarm_occurrences(component, handle, alarm, range_start, range_end, resolver)?;
        for fire in iter {
            out.push(fire?);
        }
    }
    out.sort();
    Ok(out)
}

impl AlarmOccurrenceIter<'_> {
    fn in_window(&self, key: DateTime<Utc>) -> bool {
        !self.range_start.is_some_and(|start| key < start)
            && !self.range_end.is_some_and(|end| key >= end)
    }

    fn push_fire(&mut self, fire: CalDateTime) -> RecurResult<()> {
        let key = fire.as_utc(self.resolver)?;
        if self.in_window(key) {
            self.buffer.push_back(AlarmOccurrence {
                period: Period::point(fire),
                component: self.component,
                alarm_uid: self.alarm_uid,
            });
        }
        Ok(())
    }

    /// All fires one occurrence generates: the base plus the repeat tail.
    fn fan_out(&mut self, occurrence: &Period) -> RecurResult<()> {
        let Trigger::Relative { offset, related } = self.trigger.clone() else {
            return Ok(());
        };
        let anchor = match related {
            TriggerRelation::Start => occurrence.start().clone(),
            TriggerRelation::End => occurrence.effective_end()?,
        };
        let base = add_duration(&anchor, offset)?;
        self.push_fire(base.clone())?;

        if let Some((count, interval)) = self.repeat {
            let mut fire = base;
            for _ in 0..count {
                fire = add_duration(&fire, interval)?;
                self.push_fire(fire.clone())?;
            }
        }
        Ok(())
    }
}

impl Iterator for AlarmOccurrenceIter<'_> {
    type Item = RecurResult<AlarmOccurrence>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if let Some(fire) = self.buffer.pop_front() {
                return Some(Ok(fire));
            }

            match &mut self.occurrences {
                None => {
                    // Absolute trigger: a single fire, independent of
                    // occurrences.
                    if self.absolute_emitted {
                        self.done = true;
                        return None;
                    }
                    self.absolute_emitted = true;
                    let Trigger::Absolute(at) = self.trigger.clone() else {
                        self.done = true;
                        return None;
                    };
                    if let Err(err) = self.push_fire(at) {
                        self.done = true;
                        return Some(Err(err));
                    }
                }
                Some(occurrences) => match occurrences.next() {
                    None => {
                        self.done = true;
                        return None;
                    }
                    Some(Err(err)) => {
                        self.done = true;
                        return Some(Err(err));
                    }
                    Some(Ok(occurrence)) => {
                        if let Err(err) = self.fan_out(&occurrence) {
                            self.done = true;
                            return Some(Err(err));
                        }
                    }
                },
            }
        }
    }
}

/// Adds a signed iCalendar duration on the wall clock.
///
/// Week/day parts are nominal (a day across a DST transition stays at the
/// same wall time); the time part is exact seconds.
fn add_duration(dt: &CalDateTime, duration: IcalDuration) -> RecurResult<CalDateTime> {
    let sign: i64 = if duration.negative { -1 } else { 1 };
    let days = i64::from(duration.weeks) * 7 + i64::from(duration.days);
    let seconds = i64::from(duration.hours) * 3600
        + i64::from(duration.minutes) * 60
        + i64::from(duration.seconds);
    dt.add(DateUnit::Day, sign * days)?
        .add(DateUnit::Second, sign * seconds)
}
