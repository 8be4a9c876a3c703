//! Occurrence evaluation for a recurrable component.
//!
//! [`evaluate`] merges every RRULE sequence with the literal RDATE periods
//! into one lazy, chronologically ordered stream, then subtracts EXRULE and
//! EXDATE exceptions by absolute instant. Each yielded occurrence is a
//! [`Period`] built from the occurrence start and the component's duration.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use kalends_core::{CalDateTime, IcalDuration, Period, RecurResult, ZoneResolver};

use crate::component::Recurrable;
use crate::expand::rrule_iter::RecurIter;

/// One merge source: a lazy rule expansion or a pre-sorted literal list.
enum Source {
    Rule(RecurIter),
    Fixed(std::vec::IntoIter<Period>),
}

struct SourceState {
    source: Source,
    pending: Option<(DateTime<Utc>, Period)>,
}

/// Lazy, ordered stream of a component's occurrences within a window.
///
/// Duplicate starts across sources collapse to the first-seen period.
/// Instants named by an exception are withheld. The stream is restartable
/// by calling [`evaluate`] again with the same inputs.
pub struct OccurrenceIter<'r> {
    resolver: &'r dyn ZoneResolver,
    sources: Vec<SourceState>,
    exceptions: HashSet<DateTime<Utc>>,
    duration: Option<IcalDuration>,
    range_start: Option<DateTime<Utc>>,
    range_end: Option<DateTime<Utc>>,
    last: Option<DateTime<Utc>>,
    done: bool,
}

// The zone resolver is opaque; describe the merge state instead.
impl std::fmt::Debug for OccurrenceIter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OccurrenceIter")
            .field("sources", &self.sources.len())
            .field("exceptions", &self.exceptions.len())
            .field("duration", &self.duration)
            .field("range_start", &self.range_start)
            .field("range_end", &self.range_end)
            .field("last", &self.last)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

/// Builds the occurrence stream for `component` over `[range_start, range_end)`.
///
/// `None` bounds leave that side of the window open. A component with
/// neither rules nor rdates yields exactly its seed. COUNT-bearing rules
/// count from the seed, so a lower bound filters output without shifting
/// which instants exist.
///
/// ## Errors
/// [`kalends_core::RecurError::InvalidPattern`] if any rrule or exrule is
/// invalid, [`kalends_core::RecurError::UnboundedQuery`] if any of them is
/// unbounded while `range_end` is `None`, and
/// [`kalends_core::RecurError::UnknownZone`] if a referenced zone does not
/// resolve.
#[tracing::instrument(skip_all, fields(uid = %component.uid()))]
pub fn evaluate<'r>(
    component: &impl Recurrable,
    range_start: Option<DateTime<Utc>>,
    range_end: Option<DateTime<Utc>>,
    resolver: &'r dyn ZoneResolver,
) -> RecurResult<OccurrenceIter<'r>> {
    let seed = component.seed();
    let duration = component.occurrence_duration();

    // Exceptions are materialized up front: the set is bounded by the same
    // window (or the exrules' own COUNT/UNTIL) and instant comparison needs
    // random access.
    let mut exceptions = HashSet::new();
    for exrule in component.exrules() {
        for instant in RecurIter::new(exrule, seed, range_end, resolver)? {
            exceptions.insert(instant?.as_utc(resolver)?);
        }
    }
    for exdate in component.exdates() {
        exceptions.insert(exdate.as_utc(resolver)?);
    }

    let mut sources = Vec::with_capacity(component.rrules().len() + 1);
    for rrule in component.rrules() {
        sources.push(SourceState {
            source: Source::Rule(RecurIter::new(rrule, seed, range_end, resolver)?),
            pending: None,
        });
    }

    if component.rdates().is_empty() && component.rrules().is_empty() {
        let period = occurrence_period(seed.clone(), duration)?;
        sources.push(SourceState {
            source: Source::Fixed(vec![period].into_iter()),
            pending: None,
        });
    } else if !component.rdates().is_empty() {
        let mut keyed: Vec<(DateTime<Utc>, Period)> = component
            .rdates()
            .iter()
            .map(|p| Ok((p.start().as_utc(resolver)?, p.clone())))
            .collect::<RecurResult<_>>()?;
        keyed.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        sources.push(SourceState {
            source: Source::Fixed(keyed.into_iter().map(|(_, p)| p).collect::<Vec<_>>().into_iter()),
            pending: None,
        });
    }

    let mut iter = OccurrenceIter {
        resolver,
        sources,
        exceptions,
        duration,
        range_start,
        range_end,
        last: None,
        done: false,
    };
    for i in 0..iter.sources.len() {
        iter.fill(i)?;
    }
    Ok(iter)
}

fn occurrence_period(start: CalDateTime, duration: Option<IcalDuration>) -> RecurResult<Period> {
    match duration {
        Some(duration) => Period::from_start_duration(start, duration),
        None => Ok(Period::point(start)),
    }
}

impl OccurrenceIter<'_> {
    /// Pulls the next in-window item of source `i` into its pending slot.
    fn fill(&mut self, i: usize) -> RecurResult<()> {
        let state = &mut self.sources[i];
        state.pending = match &mut state.source {
            Source::Rule(iter) => match iter.next() {
                None => None,
                Some(start) => {
                    let start = start?;
                    let key = start.as_utc(self.resolver)?;
                    Some((key, occurrence_period(start, self.duration)?))
                }
            },
            Source::Fixed(periods) => match periods.next() {
                Some(period) => {
                    let key = period.start().as_utc(self.resolver)?;
                    // Sorted source: the first out-of-window item ends it.
                    if self.range_end.is_some_and(|end| key >= end) {
                        None
                    } else {
                        Some((key, period))
                    }
                }
                None => None,
            },
        };
        Ok(())
    }

    fn min_source(&self) -> Option<usize> {
        self.sources
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.pending.as_ref().map(|(key, _)| (i, *key)))
            .min_by_key(|&(_, key)| key)
            .map(|(i, _)| i)
    }
}

impl Iterator for OccurrenceIter<'_> {
    type Item = RecurResult<Period>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            let Some(i) = self.min_source() else {
                self.done = true;
                return None;
            };
            let Some((key, period)) = self.sources[i].pending.take() else {
                self.done = true;
                return None;
            };
            if let Err(err) = self.fill(i) {
                self.done = true;
                return Some(Err(err));
            }

            if self.last == Some(key) {
                continue;
            }
            self.last = Some(key);
            if self.exceptions.contains(&key) {
                continue;
            }
            if self.range_start.is_some_and(|start| key < start) {
                continue;
            }
            return Some(Ok(period));
        }
    }
}
