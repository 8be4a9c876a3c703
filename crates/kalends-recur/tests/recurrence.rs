//! End-to-end recurrence scenarios through the public API.
//!
//! Exercises rule expansion, occurrence merging, exceptions, zone-aware
//! evaluation across DST transitions, alarm resolution, and the occurrence
//! cache, the way a calendar store would drive them.

use chrono::{DateTime, NaiveTime, Utc};

use kalends_core::{
    CalDateTime, IcalDuration, Period, Recur, RecurError, RecurResult, TzdbResolver, Weekday,
    WeekdayNum,
};
use kalends_recur::{
    evaluate, resolve_alarm_occurrences, Alarm, Calendar, Component, ComponentKind,
    OccurrenceCache, Trigger,
};

fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> CalDateTime {
    CalDateTime::utc(y, m, d, h, min, 0).expect("valid datetime")
}

fn instant(dt: &CalDateTime) -> DateTime<Utc> {
    dt.as_utc(&TzdbResolver::new()).expect("resolves")
}

fn starts(component: &Component, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Vec<String> {
    let resolver = TzdbResolver::new();
    evaluate(component, from, to, &resolver)
        .expect("evaluation starts")
        .map(|r| r.expect("no mid-stream error").start().to_string())
        .collect()
}

/// COUNT yields exactly N strictly increasing instants, window or not.
#[test_log::test]
fn count_yields_exact_instants() {
    let component = Component::new(ComponentKind::Event, utc(2024, 1, 1, 9, 0))
        .with_rrule(Recur::daily().with_count(7));
    let result = starts(&component, None, None);
    assert_eq!(result.len(), 7);
    let mut sorted = result.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(result, sorted);
}

/// Every instant of an UNTIL-bounded rule is at or before the bound.
#[test_log::test]
fn until_bounds_the_sequence_inclusively() {
    let until = utc(2024, 1, 10, 9, 0);
    let component = Component::new(ComponentKind::Event, utc(2024, 1, 1, 9, 0))
        .with_rrule(Recur::daily().with_until(until.clone()));
    let result = starts(&component, None, None);
    assert_eq!(result.len(), 10);
    assert_eq!(result.last().expect("nonempty"), "20240110T090000Z");
}

/// An unbounded rule with an open-ended window is refused, never capped.
#[test_log::test]
fn unbounded_rule_with_open_window_is_an_error() {
    let resolver = TzdbResolver::new();
    let component =
        Component::new(ComponentKind::Event, utc(2024, 1, 1, 9, 0)).with_rrule(Recur::daily());
    let err = evaluate(&component, None, None, &resolver).expect_err("must refuse");
    assert!(matches!(err, RecurError::UnboundedQuery));

    // The same rule with an upper bound evaluates fine.
    let to = instant(&utc(2024, 1, 5, 0, 0));
    let ok = starts(&component, None, Some(to));
    assert_eq!(ok.len(), 4);
}

/// Every-other-week Tuesdays stay anchored across a month boundary.
#[test_log::test]
fn biweekly_tuesdays() {
    let component = Component::new(ComponentKind::Event, utc(2024, 1, 2, 10, 0)).with_rrule(
        Recur::weekly()
            .with_interval(2)
            .with_by_day(vec![WeekdayNum::every(Weekday::Tuesday)])
            .with_count(5),
    );
    assert_eq!(
        starts(&component, None, None),
        vec![
            "20240102T100000Z",
            "20240116T100000Z",
            "20240130T100000Z",
            "20240213T100000Z",
            "20240227T100000Z"
        ]
    );
}

/// A monthly last-day rule starts at the first matching day, not the seed.
#[test_log::test]
fn monthly_last_day_ignores_non_matching_seed() {
    let component = Component::new(ComponentKind::Event, utc(2024, 1, 15, 9, 0))
        .with_rrule(Recur::monthly().with_by_month_day(vec![-1]).with_count(3));
    assert_eq!(
        starts(&component, None, None),
        vec!["20240131T090000Z", "20240229T090000Z", "20240331T090000Z"]
    );
}

/// A zoned daily event keeps its 09:00 wall time across spring-forward.
#[test_log::test]
fn dst_spring_forward_keeps_wall_time() {
    let resolver = TzdbResolver::new();
    let seed = CalDateTime::zoned(2024, 3, 8, 9, 0, 0, "America/New_York").expect("valid");
    let component =
        Component::new(ComponentKind::Event, seed).with_rrule(Recur::daily().with_count(4));

    let periods: Vec<Period> = evaluate(&component, None, None, &resolver)
        .expect("evaluation starts")
        .collect::<RecurResult<_>>()
        .expect("no error");
    for period in &periods {
        assert_eq!(
            period.start().naive().time(),
            NaiveTime::from_hms_opt(9, 0, 0).expect("valid")
        );
        assert_eq!(period.start().tzid(), Some("America/New_York"));
    }

    // Mar 9 -> Mar 10 crosses the gap: 23 elapsed hours, not 24.
    let elapsed = periods[2].start().as_utc(&resolver).expect("utc")
        - periods[1].start().as_utc(&resolver).expect("utc");
    assert_eq!(elapsed, chrono::Duration::hours(23));
}

/// The same wall-time stability holds across fall-back.
#[test_log::test]
fn dst_fall_back_keeps_wall_time() {
    let resolver = TzdbResolver::new();
    let seed = CalDateTime::zoned(2024, 11, 2, 9, 0, 0, "America/New_York").expect("valid");
    let component =
        Component::new(ComponentKind::Event, seed).with_rrule(Recur::daily().with_count(3));

    let periods: Vec<Period> = evaluate(&component, None, None, &resolver)
        .expect("evaluation starts")
        .collect::<RecurResult<_>>()
        .expect("no error");
    for period in &periods {
        assert_eq!(
            period.start().naive().time(),
            NaiveTime::from_hms_opt(9, 0, 0).expect("valid")
        );
    }

    // Nov 2 -> Nov 3 crosses fall-back: 25 elapsed hours.
    let elapsed = periods[1].start().as_utc(&resolver).expect("utc")
        - periods[0].start().as_utc(&resolver).expect("utc");
    assert_eq!(elapsed, chrono::Duration::hours(25));
}

/// Exceptions remove instants without renumbering the survivors.
#[test_log::test]
fn exdate_removes_without_renumbering() {
    let component = Component::new(ComponentKind::Event, utc(2024, 1, 1, 9, 0))
        .with_rrule(Recur::daily().with_count(5))
        .with_exdate(utc(2024, 1, 3, 9, 0));
    assert_eq!(
        starts(&component, None, None),
        vec![
            "20240101T090000Z",
            "20240102T090000Z",
            "20240104T090000Z",
            "20240105T090000Z"
        ]
    );
}

/// RDATE periods merge into the rule stream in chronological order.
#[test_log::test]
fn rdates_merge_chronologically() {
    let component = Component::new(ComponentKind::Event, utc(2024, 1, 1, 9, 0))
        .with_rrule(Recur::daily().with_count(2))
        .with_rdate(Period::point(utc(2024, 1, 1, 15, 0)));
    assert_eq!(
        starts(&component, None, None),
        vec!["20240101T090000Z", "20240101T150000Z", "20240102T090000Z"]
    );
}

/// Splitting a window in two loses and duplicates nothing.
#[test_log::test]
fn window_halves_union_to_the_whole() {
    let component = Component::new(ComponentKind::Event, utc(2024, 1, 1, 9, 0)).with_rrule(
        Recur::daily()
            .with_by_hour(vec![9, 18])
            .with_count(12),
    );
    let a = instant(&utc(2024, 1, 1, 0, 0));
    let b = instant(&utc(2024, 1, 4, 0, 0));
    let c = instant(&utc(2024, 1, 8, 0, 0));

    let whole = starts(&component, Some(a), Some(c));
    let mut split = starts(&component, Some(a), Some(b));
    split.extend(starts(&component, Some(b), Some(c)));
    assert_eq!(whole, split);
    assert!(!whole.is_empty());
}

/// A -PT15M alarm with repeats fires around each occurrence.
#[test_log::test]
fn alarm_fires_before_each_occurrence() {
    let resolver = TzdbResolver::new();
    let alarm = Alarm::new(Trigger::before_start(IcalDuration::minutes(15)))
        .with_repeat(1, IcalDuration::minutes(5));
    let component = Component::new(ComponentKind::Event, utc(2024, 1, 1, 9, 0))
        .with_rrule(Recur::daily().with_count(2))
        .with_alarm(alarm);
    let mut calendar = Calendar::new();
    let handle = calendar.insert(component);

    let fires = resolve_alarm_occurrences(
        calendar.get(handle).expect("present"),
        handle,
        None,
        None,
        &resolver,
    )
    .expect("resolves");
    let times: Vec<String> = fires.iter().map(|f| f.period.start().to_string()).collect();
    assert_eq!(
        times,
        vec![
            "20240101T084500Z",
            "20240101T085000Z",
            "20240102T084500Z",
            "20240102T085000Z"
        ]
    );
}

/// The cache answers repeated and narrower queries identically to a fresh
/// evaluation, and mutation through the arena invalidates it.
#[test_log::test]
fn cache_agrees_with_fresh_evaluation() {
    let resolver = TzdbResolver::new();
    let cache = OccurrenceCache::new();
    let component = Component::new(ComponentKind::Event, utc(2024, 1, 1, 9, 0))
        .with_rrule(Recur::daily().with_count(10));
    let mut calendar = Calendar::new();
    let handle = calendar.insert(component);

    let from = instant(&utc(2024, 1, 1, 0, 0));
    let to = instant(&utc(2024, 1, 20, 0, 0));
    let fresh: Vec<Period> = evaluate(
        calendar.get(handle).expect("present"),
        Some(from),
        Some(to),
        &resolver,
    )
    .expect("evaluation starts")
    .collect::<RecurResult<_>>()
    .expect("no error");

    let cached = cache
        .occurrences(calendar.get(handle).expect("present"), Some(from), Some(to), &resolver)
        .expect("cache answers");
    assert_eq!(fresh, cached);

    let narrower_to = instant(&utc(2024, 1, 5, 0, 0));
    let narrower = cache
        .occurrences(
            calendar.get(handle).expect("present"),
            Some(from),
            Some(narrower_to),
            &resolver,
        )
        .expect("cache answers");
    assert_eq!(narrower.len(), 4);

    // Mutating through the arena drops the entry.
    let changed = calendar.update(handle, &cache, |component| {
        component.rrules = vec![Recur::daily().with_count(2)];
    });
    assert!(changed);
    let after = cache
        .occurrences(calendar.get(handle).expect("present"), Some(from), Some(to), &resolver)
        .expect("cache answers");
    assert_eq!(after.len(), 2);
}

/// A floating seed evaluates in the resolver's default zone.
#[test_log::test]
fn floating_seed_uses_default_zone() {
    let resolver = TzdbResolver::with_default(chrono_tz::Tz::Europe__Berlin);
    let seed = CalDateTime::floating(2024, 6, 1, 9, 0, 0).expect("valid");
    let component =
        Component::new(ComponentKind::Event, seed).with_rrule(Recur::daily().with_count(1));

    let periods: Vec<Period> = evaluate(&component, None, None, &resolver)
        .expect("evaluation starts")
        .collect::<RecurResult<_>>()
        .expect("no error");
    // 09:00 Berlin in June is 07:00Z.
    assert_eq!(
        periods[0].start().as_utc(&resolver).expect("utc"),
        instant(&utc(2024, 6, 1, 7, 0))
    );
}
