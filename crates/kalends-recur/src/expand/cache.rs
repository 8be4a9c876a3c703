//! Materialized-occurrence cache.
//!
//! [`OccurrenceCache`] memoizes evaluation results per (component uid,
//! window). A cached window that encloses a query answers it by filtering;
//! a query reaching past a cached boundary recomputes the wider window and
//! replaces the entry, so a cache hit is never a silently truncated result.
//!
//! The cache is an explicit object the caller constructs and passes around.
//! Recomputation happens outside the lock; two threads racing on the same
//! uid may both evaluate, and the later write wins with an identical value.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use kalends_core::{Period, RecurResult, ZoneResolver};

use crate::component::Recurrable;
use crate::expand::evaluator::evaluate;

struct Entry {
    range_start: Option<DateTime<Utc>>,
    range_end: Option<DateTime<Utc>>,
    occurrences: Vec<(DateTime<Utc>, Period)>,
}

impl Entry {
    /// Whether this entry's window contains the queried window.
    ///
    /// `None` bounds are open; an open cached bound encloses anything, an
    /// open queried bound needs an open cached bound.
    fn encloses(&self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> bool {
        let start_ok = match (self.range_start, start) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(cached), Some(queried)) => cached <= queried,
        };
        let end_ok = match (self.range_end, end) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(cached), Some(queried)) => cached >= queried,
        };
        start_ok && end_ok
    }

    fn select(&self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Vec<Period> {
        self.occurrences
            .iter()
            .filter(|(key, _)| {
                !start.is_some_and(|s| *key < s) && !end.is_some_and(|e| *key >= e)
            })
            .map(|(_, period)| period.clone())
            .collect()
    }
}

/// Shared cache of materialized occurrence lists, keyed by component uid.
#[derive(Default)]
pub struct OccurrenceCache {
    entries: RwLock<HashMap<Uuid, Entry>>,
}

impl OccurrenceCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the component's occurrences over `[range_start, range_end)`.
    ///
    /// Serves from cache when the cached window encloses the query;
    /// otherwise evaluates the queried window and replaces the entry.
    ///
    /// ## Errors
    /// Propagates [`evaluate`] errors; a failed evaluation leaves the
    /// previous entry untouched.
    pub fn occurrences(
        &self,
        component: &impl Recurrable,
        range_start: Option<DateTime<Utc>>,
        range_end: Option<DateTime<Utc>>,
        resolver: &dyn ZoneResolver,
    ) -> RecurResult<Vec<Period>> {
        let uid = component.uid();

        if let Ok(entries) = self.entries.read()
            && let Some(entry) = entries.get(&uid)
            && entry.encloses(range_start, range_end)
        {
            tracing::trace!(%uid, "occurrence cache hit");
            return Ok(entry.select(range_start, range_end));
        }

        tracing::trace!(%uid, "occurrence cache miss, evaluating");
        let mut occurrences = Vec::new();
        for period in evaluate(component, range_start, range_end, resolver)? {
            let period = period?;
            let key = period.start().as_utc(resolver)?;
            occurrences.push((key, period));
        }
        let result = occurrences.iter().map(|(_, p)| p.clone()).collect();

        if let Ok(mut entries) = self.entries.write() {
            entries.insert(
                uid,
                Entry {
                    range_start,
                    range_end,
                    occurrences,
                },
            );
        }
        Ok(result)
    }

    /// Drops the cached entry for a component.
    ///
    /// Callers mutating recurrence-relevant fields invoke this so no stale
    /// occurrence list survives ([`crate::component::Calendar::update`]
    /// does it automatically).
    pub fn invalidate(&self, uid: Uuid) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(&uid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Component, ComponentKind};
    use kalends_core::{CalDateTime, Recur, TzdbResolver};

    fn component() -> Component {
        Component::new(
            ComponentKind::Event,
            CalDateTime::utc(2024, 1, 1, 9, 0, 0).expect("valid"),
        )
        .with_rrule(Recur::daily().with_count(10))
    }

    fn utc_day(d: u32) -> DateTime<Utc> {
        let resolver = TzdbResolver::new();
        CalDateTime::utc(2024, 1, d, 0, 0, 0)
            .expect("valid")
            .as_utc(&resolver)
            .expect("utc")
    }

    #[test]
    fn repeated_queries_are_idempotent() {
        let resolver = TzdbResolver::new();
        let cache = OccurrenceCache::new();
        let component = component();

        let first = cache
            .occurrences(&component, None, None, &resolver)
            .expect("valid");
        let second = cache
            .occurrences(&component, None, None, &resolver)
            .expect("valid");
        assert_eq!(first, second);
        assert_eq!(first.len(), 10);
    }

    #[test]
    fn narrower_query_served_from_wider_entry() {
        let resolver = TzdbResolver::new();
        let cache = OccurrenceCache::new();
        let component = component();

        let wide = cache
            .occurrences(&component, Some(utc_day(1)), Some(utc_day(11)), &resolver)
            .expect("valid");
        assert_eq!(wide.len(), 10);

        let narrow = cache
            .occurrences(&component, Some(utc_day(3)), Some(utc_day(6)), &resolver)
            .expect("valid");
        assert_eq!(narrow.len(), 3);
        assert_eq!(narrow[0].start().to_string(), "20240103T090000Z");
    }

    #[test]
    fn wider_query_recomputes() {
        let resolver = TzdbResolver::new();
        let cache = OccurrenceCache::new();
        let component = component();

        let narrow = cache
            .occurrences(&component, Some(utc_day(3)), Some(utc_day(6)), &resolver)
            .expect("valid");
        assert_eq!(narrow.len(), 3);

        // Extends past the cached upper bound; a filtered answer would be
        // truncated.
        let wide = cache
            .occurrences(&component, Some(utc_day(1)), Some(utc_day(11)), &resolver)
            .expect("valid");
        assert_eq!(wide.len(), 10);
    }

    #[test]
    fn invalidate_forces_fresh_evaluation() {
        let resolver = TzdbResolver::new();
        let cache = OccurrenceCache::new();
        let mut component = component();

        let before = cache
            .occurrences(&component, None, None, &resolver)
            .expect("valid");
        assert_eq!(before.len(), 10);

        component.rrules = vec![Recur::daily().with_count(4)];
        cache.invalidate(component.uid);
        let after = cache
            .occurrences(&component, None, None, &resolver)
            .expect("valid");
        assert_eq!(after.len(), 4);
    }

    #[test]
    fn failed_evaluation_surfaces_error() {
        let resolver = TzdbResolver::new();
        let cache = OccurrenceCache::new();
        let mut component = component();

        cache
            .occurrences(&component, None, None, &resolver)
            .expect("valid");

        component.rrules.push(Recur::daily());
        cache.invalidate(component.uid);
        cache
            .occurrences(&component, None, None, &resolver)
            .expect_err("unbounded");
    }
}
