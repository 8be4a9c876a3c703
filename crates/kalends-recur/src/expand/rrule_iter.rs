//! Lazy RRULE expansion (RFC 5545 §3.3.10).
//!
//! [`RecurIter`] is a pull-based iterator over the instants one recurrence
//! pattern produces from a seed. State is plain data (period-instance
//! counter, per-instance candidate buffer, remaining count), so iteration is
//! restartable by constructing a fresh iterator.
//!
//! Per period instance the by-rules act per the RFC 5545 expand/limit table:
//! coarser rules expand candidate dates within the instance, finer rules
//! filter, BYHOUR/BYMINUTE/BYSECOND refine dates into time-of-day instants,
//! and BYSETPOS selects ordinal positions from the instance's sorted
//! candidate list last of all.

use std::collections::VecDeque;

use chrono::{
    DateTime, Datelike, Duration as ChronoDuration, NaiveDate, NaiveDateTime, NaiveTime, Timelike,
    Utc,
};
use chrono_tz::Tz;

use kalends_core::datetime::{days_in_month, local_to_utc};
use kalends_core::{
    CalDateTime, Frequency, Recur, RecurError, RecurResult, TimeForm, Until, Weekday, WeekdayNum,
    ZoneResolver,
};

/// Hard cap on scanned period instances.
///
/// Prevents infinite loops from patterns that can never produce a candidate.
const MAX_INSTANCES: u64 = 100_000;

/// Consecutive empty period instances tolerated before giving up.
///
/// Must exceed the longest gap a valid pattern can produce. The sparsest
/// case is a daily rule matching only leap days: 2,920 empty days when a
/// century year skips the leap day (2096-02-29 to 2104-02-29). Anything
/// still empty after this many instances can never match.
const MAX_EMPTY_INSTANCES: u32 = 4000;

/// Lazy iterator over the instants of one (pattern, seed) pair.
///
/// Yields chronologically non-decreasing, deduplicated instants in the
/// seed's form, bounded by COUNT, UNTIL, and the query window's upper bound,
/// whichever is tightest. Candidates before the seed are never yielded.
#[derive(Debug)]
pub struct RecurIter {
    recur: Recur,
    seed: NaiveDateTime,
    form: TimeForm,
    date_only: bool,
    tz: Tz,
    until_utc: Option<DateTime<Utc>>,
    range_end: Option<DateTime<Utc>>,
    remaining: Option<u32>,
    instance: u64,
    buffer: VecDeque<NaiveDateTime>,
    last: Option<NaiveDateTime>,
    empty_streak: u32,
    done: bool,
}

impl RecurIter {
    /// Builds an iterator for a pattern anchored at a seed.
    ///
    /// `range_end` is the exclusive upper bound of the query window; for a
    /// pattern with neither COUNT nor UNTIL it is mandatory.
    ///
    /// ## Errors
    /// Returns [`RecurError::InvalidPattern`] for an invalid pattern,
    /// [`RecurError::UnboundedQuery`] for an unbounded pattern without
    /// `range_end`, and [`RecurError::UnknownZone`] if the seed's TZID does
    /// not resolve.
    pub fn new(
        recur: &Recur,
        seed: &CalDateTime,
        range_end: Option<DateTime<Utc>>,
        resolver: &dyn ZoneResolver,
    ) -> RecurResult<Self> {
        recur.validate()?;
        if recur.is_unbounded() && range_end.is_none() {
            return Err(RecurError::UnboundedQuery);
        }

        let tz = match seed.form() {
            TimeForm::Utc => Tz::UTC,
            TimeForm::Zoned(tzid) => resolver.resolve(tzid)?,
            TimeForm::Floating => resolver.system_default(),
        };

        let until_utc = match &recur.until {
            // A date-form UNTIL is inclusive through the end of that day in
            // the seed's zone.
            Some(Until::Date(date)) => date
                .and_hms_opt(23, 59, 59)
                .map(|naive| local_to_utc(tz, naive)),
            Some(Until::DateTime(dt)) => Some(match dt.form() {
                TimeForm::Floating => local_to_utc(tz, dt.naive()),
                TimeForm::Utc | TimeForm::Zoned(_) => dt.as_utc(resolver)?,
            }),
            None => None,
        };

        Ok(Self {
            recur: recur.clone(),
            seed: seed.naive(),
            form: seed.form().clone(),
            date_only: !seed.has_time()
                && recur.by_hour.is_empty()
                && recur.by_minute.is_empty()
                && recur.by_second.is_empty(),
            tz,
            until_utc,
            range_end,
            remaining: recur.count,
            instance: 0,
            buffer: VecDeque::new(),
            last: None,
            empty_streak: 0,
            done: false,
        })
    }

    /// Tightest absolute upper bound, if any.
    fn hard_limit(&self) -> Option<DateTime<Utc>> {
        match (self.until_utc, self.range_end) {
            (Some(until), Some(end)) => Some(until.min(end)),
            (bound, None) | (None, bound) => bound,
        }
    }

    /// Refills the candidate buffer from the next period instance.
    ///
    /// Returns false when iteration should stop instead.
    fn refill(&mut self) -> RecurResult<bool> {
        if self.instance >= MAX_INSTANCES || self.empty_streak > MAX_EMPTY_INSTANCES {
            tracing::debug!(
                instance = self.instance,
                empty_streak = self.empty_streak,
                "rule expansion hit the lookahead bound without producing candidates"
            );
            return Ok(false);
        }

        let n = self.instance;
        self.instance += 1;

        let Some(floor) = self.instance_floor(n) else {
            return Err(RecurError::InvalidDate(format!(
                "recurrence instance {n} overflows the calendar range"
            )));
        };
        if let Some(limit) = self.hard_limit()
            && local_to_utc(self.tz, floor) > limit
        {
            return Ok(false);
        }

        let mut candidates = self.instance_candidates(n);
        candidates.sort_unstable();
        candidates.dedup();
        let candidates = apply_set_pos(&self.recur.by_set_pos, candidates);

        tracing::trace!(instance = n, count = candidates.len(), "expanded period instance");
        if candidates.is_empty() {
            self.empty_streak += 1;
        } else {
            self.empty_streak = 0;
        }
        self.buffer = candidates.into();
        Ok(true)
    }

    /// Earliest wall-clock instant any candidate of instance `n` can have.
    fn instance_floor(&self, n: u64) -> Option<NaiveDateTime> {
        let step = i64::try_from(n).ok()?.checked_mul(i64::from(self.recur.interval))?;
        match self.recur.freq {
            Frequency::Secondly => self.seed.checked_add_signed(ChronoDuration::seconds(step)),
            Frequency::Minutely => self.seed.checked_add_signed(ChronoDuration::minutes(step)),
            Frequency::Hourly => self.seed.checked_add_signed(ChronoDuration::hours(step)),
            Frequency::Daily => {
                let date = self.seed.date().checked_add_signed(ChronoDuration::days(step))?;
                Some(date.and_time(NaiveTime::MIN))
            }
            Frequency::Weekly => {
                let start = self.week_start(n)?;
                Some(start.and_time(NaiveTime::MIN))
            }
            Frequency::Monthly => {
                let (year, month) = self.instance_month(n)?;
                Some(NaiveDate::from_ymd_opt(year, month, 1)?.and_time(NaiveTime::MIN))
            }
            Frequency::Yearly => {
                let year = self.instance_year(n)?;
                Some(NaiveDate::from_ymd_opt(year, 1, 1)?.and_time(NaiveTime::MIN))
            }
        }
    }

    /// Start of the WKST-aligned week for weekly instance `n`.
    fn week_start(&self, n: u64) -> Option<NaiveDate> {
        let seed_date = self.seed.date();
        let back = i64::from(
            seed_date
                .weekday()
                .days_since(self.recur.wkst.to_chrono()),
        );
        let step = i64::try_from(n).ok()?.checked_mul(i64::from(self.recur.interval) * 7)?;
        seed_date.checked_add_signed(ChronoDuration::days(step - back))
    }

    /// (year, month) for monthly instance `n`, without day clamping.
    fn instance_month(&self, n: u64) -> Option<(i32, u32)> {
        let step = i64::try_from(n).ok()?.checked_mul(i64::from(self.recur.interval))?;
        let zero_based =
            i64::from(self.seed.date().year()) * 12 + i64::from(self.seed.date().month0()) + step;
        let year = i32::try_from(zero_based.div_euclid(12)).ok()?;
        let month = u32::try_from(zero_based.rem_euclid(12)).ok()? + 1;
        Some((year, month))
    }

    /// Year for yearly instance `n`.
    fn instance_year(&self, n: u64) -> Option<i32> {
        let step = i32::try_from(n.checked_mul(u64::from(self.recur.interval))?).ok()?;
        self.seed.date().year().checked_add(step)
    }

    /// All candidates of period instance `n`, unsorted.
    fn instance_candidates(&self, n: u64) -> Vec<NaiveDateTime> {
        match self.recur.freq {
            Frequency::Yearly => {
                let Some(year) = self.instance_year(n) else {
                    return Vec::new();
                };
                self.cross_times(self.year_dates(year))
            }
            Frequency::Monthly => {
                let Some((year, month)) = self.instance_month(n) else {
                    return Vec::new();
                };
                self.cross_times(self.month_dates(year, month))
            }
            Frequency::Weekly => {
                let Some(start) = self.week_start(n) else {
                    return Vec::new();
                };
                self.cross_times(self.week_dates(start))
            }
            Frequency::Daily => match self.instance_floor(n) {
                Some(floor) if self.date_passes(floor.date()) => {
                    self.cross_times(vec![floor.date()])
                }
                _ => Vec::new(),
            },
            Frequency::Hourly | Frequency::Minutely | Frequency::Secondly => self
                .instance_floor(n)
                .map(|ts| self.sub_day_candidates(ts))
                .unwrap_or_default(),
        }
    }

    /// Candidate dates of a yearly instance.
    fn year_dates(&self, year: i32) -> Vec<NaiveDate> {
        let r = &self.recur;

        if !r.by_year_day.is_empty() {
            return r
                .by_year_day
                .iter()
                .filter_map(|&yd| resolve_year_day(year, yd))
                .filter(|&d| self.month_passes(d) && self.weekday_passes_in_year(d))
                .collect();
        }

        if !r.by_week_no.is_empty() {
            let mut dates = Vec::new();
            for &wn in &r.by_week_no {
                let Some(start) = resolve_week_start(year, wn, r.wkst) else {
                    continue;
                };
                if r.by_day.is_empty() {
                    let offset = i64::from(
                        self.seed
                            .date()
                            .weekday()
                            .days_since(r.wkst.to_chrono()),
                    );
                    dates.extend(start.checked_add_signed(ChronoDuration::days(offset)));
                } else {
                    for offset in 0..7 {
                        let Some(date) = start.checked_add_signed(ChronoDuration::days(offset))
                        else {
                            continue;
                        };
                        if r.by_day.iter().any(|wdn| wdn.weekday.matches(date)) {
                            dates.push(date);
                        }
                    }
                }
            }
            dates.retain(|&d| self.month_passes(d));
            return dates;
        }

        if !r.by_month_day.is_empty() {
            let months: Vec<u32> = if r.by_month.is_empty() {
                (1..=12).collect()
            } else {
                r.by_month.iter().map(|&m| u32::from(m)).collect()
            };
            let mut dates = Vec::new();
            for month in months {
                for &md in &r.by_month_day {
                    if let Some(date) = resolve_month_day(year, month, md)
                        && self.weekday_passes_in_month(date)
                    {
                        dates.push(date);
                    }
                }
            }
            return dates;
        }

        if !r.by_day.is_empty() {
            if r.by_month.is_empty() {
                return r
                    .by_day
                    .iter()
                    .flat_map(|wdn| expand_weekday_in_year(year, *wdn))
                    .collect();
            }
            return r
                .by_month
                .iter()
                .flat_map(|&m| {
                    r.by_day
                        .iter()
                        .flat_map(move |wdn| expand_weekday_in_month(year, u32::from(m), *wdn))
                })
                .collect();
        }

        if !r.by_month.is_empty() {
            return r
                .by_month
                .iter()
                .filter_map(|&m| {
                    NaiveDate::from_ymd_opt(year, u32::from(m), self.seed.date().day())
                })
                .collect();
        }

        // No date-expanding by-rule: the seed's own month and day.
        NaiveDate::from_ymd_opt(year, self.seed.date().month(), self.seed.date().day())
            .into_iter()
            .collect()
    }

    /// Candidate dates of a monthly instance.
    fn month_dates(&self, year: i32, month: u32) -> Vec<NaiveDate> {
        let r = &self.recur;

        if !r.by_month.is_empty() && !r.by_month.contains(&month_as_u8(month)) {
            return Vec::new();
        }

        if !r.by_month_day.is_empty() {
            return r
                .by_month_day
                .iter()
                .filter_map(|&md| resolve_month_day(year, month, md))
                .filter(|&d| self.weekday_passes_in_month(d))
                .collect();
        }

        if !r.by_day.is_empty() {
            return r
                .by_day
                .iter()
                .flat_map(|wdn| expand_weekday_in_month(year, month, *wdn))
                .collect();
        }

        // Months too short for the seed's day produce no candidate (a
        // monthly day-31 rule skips February rather than clamping).
        NaiveDate::from_ymd_opt(year, month, self.seed.date().day())
            .into_iter()
            .collect()
    }

    /// Candidate dates of a weekly instance.
    fn week_dates(&self, start: NaiveDate) -> Vec<NaiveDate> {
        let r = &self.recur;
        let mut dates = Vec::new();

        if r.by_day.is_empty() {
            let offset = i64::from(
                self.seed
                    .date()
                    .weekday()
                    .days_since(r.wkst.to_chrono()),
            );
            dates.extend(start.checked_add_signed(ChronoDuration::days(offset)));
        } else {
            for offset in 0..7 {
                let Some(date) = start.checked_add_signed(ChronoDuration::days(offset)) else {
                    continue;
                };
                // Ordinals are meaningless within a week; match the weekday.
                if r.by_day.iter().any(|wdn| wdn.weekday.matches(date)) {
                    dates.push(date);
                }
            }
        }

        dates.retain(|&d| self.month_passes(d));
        dates
    }

    /// Date-level limit rules for DAILY and finer frequencies.
    fn date_passes(&self, date: NaiveDate) -> bool {
        let r = &self.recur;
        self.month_passes(date)
            && (r.by_month_day.is_empty() || month_day_matches(&r.by_month_day, date))
            && (r.by_year_day.is_empty() || year_day_matches(&r.by_year_day, date))
            && (r.by_day.is_empty() || self.weekday_passes_in_month(date))
    }

    fn month_passes(&self, date: NaiveDate) -> bool {
        self.recur.by_month.is_empty() || self.recur.by_month.contains(&month_as_u8(date.month()))
    }

    /// BYDAY as a limit, ordinals interpreted within the month.
    fn weekday_passes_in_month(&self, date: NaiveDate) -> bool {
        self.recur.by_day.is_empty()
            || self.recur.by_day.iter().any(|wdn| match wdn.ordinal {
                None => wdn.weekday.matches(date),
                Some(ordinal) => {
                    nth_weekday_in_month(date.year(), date.month(), wdn.weekday, ordinal)
                        == Some(date)
                }
            })
    }

    /// BYDAY as a limit, ordinals interpreted within the year.
    fn weekday_passes_in_year(&self, date: NaiveDate) -> bool {
        self.recur.by_day.is_empty()
            || self.recur.by_day.iter().any(|wdn| match wdn.ordinal {
                None => wdn.weekday.matches(date),
                Some(_) => expand_weekday_in_year(date.year(), *wdn).contains(&date),
            })
    }

    /// Time-of-day expansion for DAILY and coarser frequencies.
    fn cross_times(&self, dates: Vec<NaiveDate>) -> Vec<NaiveDateTime> {
        let r = &self.recur;
        let seed_time = self.seed.time();

        let hours: Vec<u32> = expand_or(&r.by_hour, seed_time.hour());
        let minutes: Vec<u32> = expand_or(&r.by_minute, seed_time.minute());
        let seconds: Vec<u32> = expand_or(&r.by_second, seed_time.second());

        let mut out = Vec::with_capacity(dates.len() * hours.len() * minutes.len() * seconds.len());
        for date in dates {
            for &h in &hours {
                for &m in &minutes {
                    for &s in &seconds {
                        if let Some(time) = NaiveTime::from_hms_opt(h, m, s) {
                            out.push(date.and_time(time));
                        }
                    }
                }
            }
        }
        out
    }

    /// Candidates for an HOURLY/MINUTELY/SECONDLY instance anchor.
    fn sub_day_candidates(&self, ts: NaiveDateTime) -> Vec<NaiveDateTime> {
        let r = &self.recur;
        if !self.date_passes(ts.date()) {
            return Vec::new();
        }
        if !r.by_hour.is_empty() && !r.by_hour.contains(&field_as_u8(ts.hour())) {
            return Vec::new();
        }

        match r.freq {
            Frequency::Hourly => {
                let minutes = expand_or(&r.by_minute, ts.minute());
                let seconds = expand_or(&r.by_second, ts.second());
                let mut out = Vec::new();
                for &m in &minutes {
                    for &s in &seconds {
                        if let Some(time) = NaiveTime::from_hms_opt(ts.hour(), m, s) {
                            out.push(ts.date().and_time(time));
                        }
                    }
                }
                out
            }
            Frequency::Minutely => {
                if !r.by_minute.is_empty() && !r.by_minute.contains(&field_as_u8(ts.minute())) {
                    return Vec::new();
                }
                expand_or(&r.by_second, ts.second())
                    .into_iter()
                    .filter_map(|s| NaiveTime::from_hms_opt(ts.hour(), ts.minute(), s))
                    .map(|time| ts.date().and_time(time))
                    .collect()
            }
            _ => {
                let second_ok =
                    r.by_second.is_empty() || r.by_second.contains(&field_as_u8(ts.second()));
                let minute_ok =
                    r.by_minute.is_empty() || r.by_minute.contains(&field_as_u8(ts.minute()));
                if second_ok && minute_ok { vec![ts] } else { Vec::new() }
            }
        }
    }
}

impl Iterator for RecurIter {
    type Item = RecurResult<CalDateTime>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if self.remaining == Some(0) {
                self.done = true;
                return None;
            }

            if let Some(candidate) = self.buffer.pop_front() {
                if self.last == Some(candidate) || candidate < self.seed {
                    continue;
                }

                let candidate_utc = local_to_utc(self.tz, candidate);
                if let Some(until) = self.until_utc
                    && candidate_utc > until
                {
                    self.done = true;
                    return None;
                }
                if let Some(end) = self.range_end
                    && candidate_utc >= end
                {
                    self.done = true;
                    return None;
                }

                if let Some(remaining) = &mut self.remaining {
                    *remaining -= 1;
                }
                self.last = Some(candidate);
                let value = if self.date_only {
                    CalDateTime::from_date(candidate.date(), self.form.clone())
                } else {
                    CalDateTime::from_naive(candidate, self.form.clone())
                };
                return Some(Ok(value));
            }

            match self.refill() {
                Ok(true) => {}
                Ok(false) => {
                    self.done = true;
                    return None;
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

/// BYSETPOS selection over one instance's sorted candidate list.
fn apply_set_pos(positions: &[i16], candidates: Vec<NaiveDateTime>) -> Vec<NaiveDateTime> {
    if positions.is_empty() || candidates.is_empty() {
        return candidates;
    }

    let len = i32::try_from(candidates.len()).unwrap_or(i32::MAX);
    let mut selected: Vec<NaiveDateTime> = positions
        .iter()
        .filter_map(|&pos| {
            let idx = if pos > 0 { i32::from(pos) - 1 } else { len + i32::from(pos) };
            usize::try_from(idx).ok().and_then(|i| candidates.get(i).copied())
        })
        .collect();
    selected.sort_unstable();
    selected.dedup();
    selected
}

fn expand_or(values: &[u8], fallback: u32) -> Vec<u32> {
    if values.is_empty() {
        vec![fallback]
    } else {
        let mut out: Vec<u32> = values.iter().map(|&v| u32::from(v)).collect();
        out.sort_unstable();
        out
    }
}

fn month_as_u8(month: u32) -> u8 {
    u8::try_from(month).unwrap_or(u8::MAX)
}

fn field_as_u8(value: u32) -> u8 {
    u8::try_from(value).unwrap_or(u8::MAX)
}

/// Resolves a BYMONTHDAY token within a month; negative counts from the end.
fn resolve_month_day(year: i32, month: u32, md: i8) -> Option<NaiveDate> {
    let last = i32::try_from(days_in_month(year, month)).ok()?;
    let day = if md > 0 { i32::from(md) } else { last + i32::from(md) + 1 };
    if day < 1 || day > last {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, u32::try_from(day).ok()?)
}

/// Resolves a BYYEARDAY token within a year; negative counts from the end.
fn resolve_year_day(year: i32, yd: i16) -> Option<NaiveDate> {
    let last = if NaiveDate::from_ymd_opt(year, 2, 29).is_some() { 366 } else { 365 };
    let ordinal = if yd > 0 { i32::from(yd) } else { last + i32::from(yd) + 1 };
    if ordinal < 1 || ordinal > last {
        return None;
    }
    NaiveDate::from_yo_opt(year, u32::try_from(ordinal).ok()?)
}

fn month_day_matches(tokens: &[i8], date: NaiveDate) -> bool {
    tokens
        .iter()
        .any(|&md| resolve_month_day(date.year(), date.month(), md) == Some(date))
}

fn year_day_matches(tokens: &[i16], date: NaiveDate) -> bool {
    tokens.iter().any(|&yd| resolve_year_day(date.year(), yd) == Some(date))
}

/// All dates a BYDAY token names within a month.
fn expand_weekday_in_month(year: i32, month: u32, wdn: WeekdayNum) -> Vec<NaiveDate> {
    match wdn.ordinal {
        Some(ordinal) => nth_weekday_in_month(year, month, wdn.weekday, ordinal)
            .into_iter()
            .collect(),
        None => {
            let last = days_in_month(year, month);
            (1..=last)
                .filter_map(|day| NaiveDate::from_ymd_opt(year, month, day))
                .filter(|&d| wdn.weekday.matches(d))
                .collect()
        }
    }
}

/// The nth weekday of a month; negative counts from the end.
fn nth_weekday_in_month(year: i32, month: u32, weekday: Weekday, ordinal: i8) -> Option<NaiveDate> {
    let last = days_in_month(year, month);
    let matching: Vec<NaiveDate> = (1..=last)
        .filter_map(|day| NaiveDate::from_ymd_opt(year, month, day))
        .filter(|&d| weekday.matches(d))
        .collect();
    pick_ordinal(&matching, ordinal)
}

/// All dates a BYDAY token names within a year.
fn expand_weekday_in_year(year: i32, wdn: WeekdayNum) -> Vec<NaiveDate> {
    let first = NaiveDate::from_ymd_opt(year, 1, 1);
    let Some(first) = first else {
        return Vec::new();
    };
    let offset = (7 + wdn.weekday.to_chrono().num_days_from_sunday()
        - first.weekday().num_days_from_sunday())
        % 7;
    let mut matching = Vec::new();
    let mut date = first + ChronoDuration::days(i64::from(offset));
    while date.year() == year {
        matching.push(date);
        date += ChronoDuration::days(7);
    }

    match wdn.ordinal {
        Some(ordinal) => pick_ordinal(&matching, ordinal).into_iter().collect(),
        None => matching,
    }
}

fn pick_ordinal(matching: &[NaiveDate], ordinal: i8) -> Option<NaiveDate> {
    if ordinal > 0 {
        matching.get(usize::try_from(ordinal).ok()? - 1).copied()
    } else {
        let back = usize::try_from(-i16::from(ordinal)).ok()?;
        matching.len().checked_sub(back).and_then(|i| matching.get(i).copied())
    }
}

/// Start date of a BYWEEKNO week; negative counts from the year's last week.
///
/// Week 1 is the first WKST-aligned week containing at least four days of
/// the year (the ISO 8601 rule generalized to an arbitrary week start).
fn resolve_week_start(year: i32, week_no: i8, wkst: Weekday) -> Option<NaiveDate> {
    let weeks = weeks_in_year(year, wkst)?;
    let week = if week_no > 0 {
        i32::from(week_no)
    } else {
        weeks + i32::from(week_no) + 1
    };
    if week < 1 || week > weeks {
        return None;
    }
    first_week_start(year, wkst)?
        .checked_add_signed(ChronoDuration::days(i64::from(week - 1) * 7))
}

fn first_week_start(year: i32, wkst: Weekday) -> Option<NaiveDate> {
    let jan1 = NaiveDate::from_ymd_opt(year, 1, 1)?;
    let back = i64::from(jan1.weekday().days_since(wkst.to_chrono()));
    let aligned = jan1.checked_sub_signed(ChronoDuration::days(back))?;
    // The week counts as week 1 only if at least four of its days are in
    // this year.
    if back <= 3 {
        Some(aligned)
    } else {
        aligned.checked_add_signed(ChronoDuration::days(7))
    }
}

fn weeks_in_year(year: i32, wkst: Weekday) -> Option<i32> {
    let this = first_week_start(year, wkst)?;
    let next = first_week_start(year + 1, wkst)?;
    i32::try_from((next - this).num_days() / 7).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kalends_core::TzdbResolver;

    fn collect(iter: RecurIter) -> Vec<String> {
        iter.map(|r| r.expect("no mid-sequence error").to_string())
            .collect()
    }

    fn seed_utc(y: i32, m: u32, d: u32, h: u32) -> CalDateTime {
        CalDateTime::utc(y, m, d, h, 0, 0).expect("valid")
    }

    #[test]
    fn daily_count() {
        let resolver = TzdbResolver::new();
        let iter = RecurIter::new(
            &Recur::daily().with_count(3),
            &seed_utc(2024, 1, 1, 10),
            None,
            &resolver,
        )
        .expect("valid");
        assert_eq!(
            collect(iter),
            vec!["20240101T100000Z", "20240102T100000Z", "20240103T100000Z"]
        );
    }

    #[test]
    fn weekly_interval_by_day() {
        // Seed on a Tuesday, every-other-week Tuesdays.
        let resolver = TzdbResolver::new();
        let recur = Recur::weekly()
            .with_interval(2)
            .with_by_day(vec![WeekdayNum::every(Weekday::Tuesday)])
            .with_count(3);
        let iter =
            RecurIter::new(&recur, &seed_utc(2024, 1, 2, 10), None, &resolver).expect("valid");
        assert_eq!(
            collect(iter),
            vec!["20240102T100000Z", "20240116T100000Z", "20240130T100000Z"]
        );
    }

    #[test]
    fn weekly_by_day_skips_pre_seed_days() {
        // Seed on a Wednesday; the Monday of the seed week is not emitted.
        let resolver = TzdbResolver::new();
        let recur = Recur::weekly()
            .with_by_day(vec![
                WeekdayNum::every(Weekday::Monday),
                WeekdayNum::every(Weekday::Friday),
            ])
            .with_count(3);
        let iter =
            RecurIter::new(&recur, &seed_utc(2024, 1, 3, 9), None, &resolver).expect("valid");
        assert_eq!(
            collect(iter),
            vec!["20240105T090000Z", "20240108T090000Z", "20240112T090000Z"]
        );
    }

    #[test]
    fn monthly_last_day() {
        let resolver = TzdbResolver::new();
        let recur = Recur::monthly().with_by_month_day(vec![-1]).with_count(3);
        let iter =
            RecurIter::new(&recur, &seed_utc(2024, 1, 15, 0), None, &resolver).expect("valid");
        assert_eq!(
            collect(iter),
            vec!["20240131T000000Z", "20240229T000000Z", "20240331T000000Z"]
        );
    }

    #[test]
    fn monthly_day_31_skips_short_months() {
        let resolver = TzdbResolver::new();
        let recur = Recur::monthly().with_count(4);
        let iter =
            RecurIter::new(&recur, &seed_utc(2024, 1, 31, 12), None, &resolver).expect("valid");
        assert_eq!(
            collect(iter),
            vec![
                "20240131T120000Z",
                "20240331T120000Z",
                "20240531T120000Z",
                "20240731T120000Z"
            ]
        );
    }

    #[test]
    fn monthly_nth_weekday() {
        // Second Tuesday of each month.
        let resolver = TzdbResolver::new();
        let recur = Recur::monthly()
            .with_by_day(vec![WeekdayNum::nth(2, Weekday::Tuesday)])
            .with_count(3);
        let iter =
            RecurIter::new(&recur, &seed_utc(2024, 1, 1, 9), None, &resolver).expect("valid");
        assert_eq!(
            collect(iter),
            vec!["20240109T090000Z", "20240213T090000Z", "20240312T090000Z"]
        );
    }

    #[test]
    fn monthly_last_weekday_via_set_pos() {
        // Last weekday of the month.
        let resolver = TzdbResolver::new();
        let recur = Recur::monthly()
            .with_by_day(vec![
                WeekdayNum::every(Weekday::Monday),
                WeekdayNum::every(Weekday::Tuesday),
                WeekdayNum::every(Weekday::Wednesday),
                WeekdayNum::every(Weekday::Thursday),
                WeekdayNum::every(Weekday::Friday),
            ])
            .with_by_set_pos(vec![-1])
            .with_count(2);
        let iter =
            RecurIter::new(&recur, &seed_utc(2024, 1, 1, 17), None, &resolver).expect("valid");
        assert_eq!(collect(iter), vec!["20240131T170000Z", "20240229T170000Z"]);
    }

    #[test]
    fn yearly_by_month() {
        let resolver = TzdbResolver::new();
        let recur = Recur::yearly().with_by_month(vec![3, 6]).with_count(4);
        let iter =
            RecurIter::new(&recur, &seed_utc(2024, 1, 10, 8), None, &resolver).expect("valid");
        assert_eq!(
            collect(iter),
            vec![
                "20240310T080000Z",
                "20240610T080000Z",
                "20250310T080000Z",
                "20250610T080000Z"
            ]
        );
    }

    #[test]
    fn yearly_by_week_no() {
        // ISO week 20 of 2024 starts Monday 2024-05-13; the seed weekday
        // (Wednesday) selects the day within the week.
        let resolver = TzdbResolver::new();
        let recur = Recur::yearly().with_by_week_no(vec![20]).with_count(2);
        let iter =
            RecurIter::new(&recur, &seed_utc(2024, 1, 3, 9), None, &resolver).expect("valid");
        assert_eq!(collect(iter), vec!["20240515T090000Z", "20250514T090000Z"]);
    }

    #[test]
    fn yearly_by_year_day_negative() {
        let resolver = TzdbResolver::new();
        let recur = Recur::yearly().with_by_year_day(vec![-1]).with_count(2);
        let iter =
            RecurIter::new(&recur, &seed_utc(2024, 1, 1, 0), None, &resolver).expect("valid");
        assert_eq!(collect(iter), vec!["20241231T000000Z", "20251231T000000Z"]);
    }

    #[test]
    fn yearly_leap_day_skips_common_years() {
        let resolver = TzdbResolver::new();
        let recur = Recur::yearly().with_count(2);
        let iter =
            RecurIter::new(&recur, &seed_utc(2024, 2, 29, 12), None, &resolver).expect("valid");
        assert_eq!(collect(iter), vec!["20240229T120000Z", "20280229T120000Z"]);
    }

    #[test]
    fn sparse_daily_pattern_survives_long_empty_gaps() {
        // A daily rule filtered to leap days goes 1460 days between matches;
        // the empty-instance bound must not cut the sequence short.
        let resolver = TzdbResolver::new();
        let recur = Recur::daily()
            .with_by_month(vec![2])
            .with_by_month_day(vec![29])
            .with_count(2);
        let iter =
            RecurIter::new(&recur, &seed_utc(2024, 2, 29, 9), None, &resolver).expect("valid");
        assert_eq!(collect(iter), vec!["20240229T090000Z", "20280229T090000Z"]);
    }

    #[test]
    fn until_is_inclusive() {
        let resolver = TzdbResolver::new();
        let recur = Recur::daily()
            .with_until(CalDateTime::utc(2024, 1, 3, 10, 0, 0).expect("valid"));
        let iter =
            RecurIter::new(&recur, &seed_utc(2024, 1, 1, 10), None, &resolver).expect("valid");
        assert_eq!(
            collect(iter),
            vec!["20240101T100000Z", "20240102T100000Z", "20240103T100000Z"]
        );
    }

    #[test]
    fn by_hour_expansion() {
        let resolver = TzdbResolver::new();
        let recur = Recur::daily().with_by_hour(vec![9, 17]).with_count(4);
        let iter =
            RecurIter::new(&recur, &seed_utc(2024, 1, 1, 9), None, &resolver).expect("valid");
        assert_eq!(
            collect(iter),
            vec![
                "20240101T090000Z",
                "20240101T170000Z",
                "20240102T090000Z",
                "20240102T170000Z"
            ]
        );
    }

    #[test]
    fn hourly_with_by_minute() {
        let resolver = TzdbResolver::new();
        let recur = Recur::new(Frequency::Hourly)
            .with_by_minute(vec![0, 30])
            .with_count(4);
        let iter =
            RecurIter::new(&recur, &seed_utc(2024, 1, 1, 9), None, &resolver).expect("valid");
        assert_eq!(
            collect(iter),
            vec![
                "20240101T090000Z",
                "20240101T093000Z",
                "20240101T100000Z",
                "20240101T103000Z"
            ]
        );
    }

    #[test]
    fn unbounded_without_window_rejected() {
        let resolver = TzdbResolver::new();
        let err = RecurIter::new(&Recur::daily(), &seed_utc(2024, 1, 1, 0), None, &resolver)
            .expect_err("should fail");
        assert!(matches!(err, RecurError::UnboundedQuery));
    }

    #[test]
    fn invalid_pattern_rejected_at_construction() {
        let resolver = TzdbResolver::new();
        let err = RecurIter::new(
            &Recur::daily().with_interval(0).with_count(1),
            &seed_utc(2024, 1, 1, 0),
            None,
            &resolver,
        )
        .expect_err("should fail");
        assert!(matches!(err, RecurError::InvalidPattern(_)));
    }

    #[test]
    fn degenerate_pattern_terminates() {
        // April 31 never exists; the empty-instance bound must stop the scan.
        let resolver = TzdbResolver::new();
        let recur = Recur::yearly()
            .with_by_month(vec![4])
            .with_by_month_day(vec![31])
            .with_count(5);
        let iter =
            RecurIter::new(&recur, &seed_utc(2024, 1, 1, 0), None, &resolver).expect("valid");
        assert_eq!(collect(iter).len(), 0);
    }

    #[test]
    fn dst_daily_keeps_wall_time() {
        // Across the US spring-forward on 2024-03-10.
        let resolver = TzdbResolver::new();
        let seed = CalDateTime::zoned(2024, 3, 9, 9, 0, 0, "America/New_York").expect("valid");
        let recur = Recur::daily().with_count(3);
        let iter = RecurIter::new(&recur, &seed, None, &resolver).expect("valid");
        let times: Vec<_> = iter
            .map(|r| r.expect("no error").naive().time())
            .collect();
        assert_eq!(
            times,
            vec![NaiveTime::from_hms_opt(9, 0, 0).expect("valid"); 3]
        );
    }

    #[test]
    fn date_only_seed_yields_dates() {
        let resolver = TzdbResolver::new();
        let seed = CalDateTime::from_date(
            NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid"),
            TimeForm::Floating,
        );
        let iter = RecurIter::new(&Recur::daily().with_count(2), &seed, None, &resolver)
            .expect("valid");
        assert_eq!(collect(iter), vec!["20240101", "20240102"]);
    }

    #[test]
    fn restartable() {
        let resolver = TzdbResolver::new();
        let recur = Recur::daily().with_count(4);
        let seed = seed_utc(2024, 1, 1, 10);
        let first = collect(RecurIter::new(&recur, &seed, None, &resolver).expect("valid"));
        let second = collect(RecurIter::new(&recur, &seed, None, &resolver).expect("valid"));
        assert_eq!(first, second);
    }
}
