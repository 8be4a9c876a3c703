//! Calendar component model.
//!
//! A [`Calendar`] is an arena of components indexed by [`ComponentHandle`];
//! parent links are stored as indices, never as owning pointers, so the
//! parent/child graph stays acyclic in ownership terms. The evaluator does
//! not depend on concrete component kinds, only on the [`Recurrable`]
//! capability.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use kalends_core::{CalDateTime, IcalDuration, Period, Recur};

use crate::expand::OccurrenceCache;

/// Kind tag for recurring components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentKind {
    Event,
    Todo,
    Journal,
}

impl ComponentKind {
    /// Returns the iCalendar component name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Event => "VEVENT",
            Self::Todo => "VTODO",
            Self::Journal => "VJOURNAL",
        }
    }
}

/// Index of a component within its [`Calendar`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentHandle(usize);

/// What an alarm trigger is anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerRelation {
    /// Offset from the occurrence start (the default).
    Start,
    /// Offset from the occurrence's effective end.
    End,
}

/// Alarm trigger (RFC 5545 §3.8.6.3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Trigger {
    /// Signed offset relative to the occurrence start or end.
    Relative {
        offset: IcalDuration,
        related: TriggerRelation,
    },
    /// Absolute fire instant, independent of any occurrence.
    Absolute(CalDateTime),
}

impl Trigger {
    /// A trigger firing `offset` before the occurrence start.
    #[must_use]
    pub const fn before_start(offset: IcalDuration) -> Self {
        Self::Relative {
            offset: offset.negate(),
            related: TriggerRelation::Start,
        }
    }
}

/// REPEAT/DURATION pair: additional fires after the base trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlarmRepeat {
    /// Number of additional fires.
    pub count: u32,
    /// Spacing between fires.
    pub interval: IcalDuration,
}

/// Alarm attached to a component (VALARM).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alarm {
    /// Stable identity of this alarm.
    pub uid: Uuid,
    /// When the alarm fires relative to its component.
    pub trigger: Trigger,
    /// Optional repeat fan-out; RFC 5545 requires REPEAT and DURATION
    /// together or not at all.
    pub repeat: Option<AlarmRepeat>,
}

impl Alarm {
    /// Creates an alarm with a fresh uid.
    #[must_use]
    pub fn new(trigger: Trigger) -> Self {
        Self {
            uid: Uuid::new_v4(),
            trigger,
            repeat: None,
        }
    }

    /// Sets the repeat fan-out.
    #[must_use]
    pub const fn with_repeat(mut self, count: u32, interval: IcalDuration) -> Self {
        self.repeat = Some(AlarmRepeat { count, interval });
        self
    }
}

/// A recurring calendar component.
///
/// Carries the recurrence-relevant fields the evaluator consumes: the seed
/// instant (DTSTART), the occurrence extent, recurrence rules and dates,
/// and exception rules and dates. Mutate through [`Calendar::update`] so
/// cached occurrences are invalidated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    /// Stable identity (UID).
    pub uid: Uuid,
    /// Component kind tag.
    pub kind: ComponentKind,
    /// Human-readable summary.
    pub summary: Option<String>,
    /// Seed instant (DTSTART); anchor for every recurrence rule.
    pub start: CalDateTime,
    /// Extent of each occurrence (DTEND/DUE minus DTSTART, or DURATION).
    pub duration: Option<IcalDuration>,
    /// Recurrence rules (RRULE).
    pub rrules: Vec<Recur>,
    /// Literal recurrence periods (RDATE).
    pub rdates: Vec<Period>,
    /// Exception rules (EXRULE).
    pub exrules: Vec<Recur>,
    /// Literal exception instants (EXDATE).
    pub exdates: Vec<CalDateTime>,
    /// Attached alarms.
    pub alarms: Vec<Alarm>,
    parent: Option<ComponentHandle>,
}

impl Component {
    /// Creates a component with a fresh uid and no recurrence.
    #[must_use]
    pub fn new(kind: ComponentKind, start: CalDateTime) -> Self {
        Self {
            uid: Uuid::new_v4(),
            kind,
            summary: None,
            start,
            duration: None,
            rrules: Vec::new(),
            rdates: Vec::new(),
            exrules: Vec::new(),
            exdates: Vec::new(),
            alarms: Vec::new(),
            parent: None,
        }
    }

    /// Sets the summary.
    #[must_use]
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    /// Sets the occurrence extent.
    #[must_use]
    pub const fn with_duration(mut self, duration: IcalDuration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Adds a recurrence rule.
    #[must_use]
    pub fn with_rrule(mut self, rrule: Recur) -> Self {
        self.rrules.push(rrule);
        self
    }

    /// Adds a literal recurrence period.
    #[must_use]
    pub fn with_rdate(mut self, rdate: Period) -> Self {
        self.rdates.push(rdate);
        self
    }

    /// Adds an exception rule.
    #[must_use]
    pub fn with_exrule(mut self, exrule: Recur) -> Self {
        self.exrules.push(exrule);
        self
    }

    /// Adds a literal exception instant.
    #[must_use]
    pub fn with_exdate(mut self, exdate: CalDateTime) -> Self {
        self.exdates.push(exdate);
        self
    }

    /// Attaches an alarm.
    #[must_use]
    pub fn with_alarm(mut self, alarm: Alarm) -> Self {
        self.alarms.push(alarm);
        self
    }

    /// The parent component, if this is a child.
    #[must_use]
    pub const fn parent(&self) -> Option<ComponentHandle> {
        self.parent
    }
}

/// Read-only capability the evaluator depends on.
///
/// Events, to-dos, and journals all recur; the evaluator sees exactly this
/// surface and nothing kind-specific.
pub trait Recurrable {
    /// Stable identity, used as the cache key.
    fn uid(&self) -> Uuid;
    /// Seed instant anchoring the recurrence.
    fn seed(&self) -> &CalDateTime;
    /// Extent of each occurrence.
    fn occurrence_duration(&self) -> Option<IcalDuration>;
    /// Recurrence rules.
    fn rrules(&self) -> &[Recur];
    /// Literal recurrence periods.
    fn rdates(&self) -> &[Period];
    /// Exception rules.
    fn exrules(&self) -> &[Recur];
    /// Literal exception instants.
    fn exdates(&self) -> &[CalDateTime];
}

impl Recurrable for Component {
    fn uid(&self) -> Uuid {
        self.uid
    }

    fn seed(&self) -> &CalDateTime {
        &self.start
    }

    fn occurrence_duration(&self) -> Option<IcalDuration> {
        self.duration
    }

    fn rrules(&self) -> &[Recur] {
        &self.rrules
    }

    fn rdates(&self) -> &[Period] {
        &self.rdates
    }

    fn exrules(&self) -> &[Recur] {
        &self.exrules
    }

    fn exdates(&self) -> &[CalDateTime] {
        &self.exdates
    }
}

/// Arena of calendar components.
///
/// Owns every component; relationships are handles into the arena. Handles
/// stay valid for the life of the calendar (components are never removed,
/// only replaced in place).
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Calendar {
    components: Vec<Component>,
}

impl Calendar {
    /// Creates an empty calendar.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a top-level component.
    pub fn insert(&mut self, component: Component) -> ComponentHandle {
        let handle = ComponentHandle(self.components.len());
        self.components.push(component);
        handle
    }

    /// Inserts a component as a child of an existing one.
    pub fn insert_child(&mut self, parent: ComponentHandle, mut component: Component) -> ComponentHandle {
        component.parent = Some(parent);
        self.insert(component)
    }

    /// Looks up a component.
    #[must_use]
    pub fn get(&self, handle: ComponentHandle) -> Option<&Component> {
        self.components.get(handle.0)
    }

    /// Finds a component by UID.
    #[must_use]
    pub fn find_by_uid(&self, uid: Uuid) -> Option<(ComponentHandle, &Component)> {
        self.components
            .iter()
            .enumerate()
            .find(|(_, c)| c.uid == uid)
            .map(|(i, c)| (ComponentHandle(i), c))
    }

    /// Iterates over the direct children of a component.
    pub fn children(&self, parent: ComponentHandle) -> impl Iterator<Item = (ComponentHandle, &Component)> {
        self.components
            .iter()
            .enumerate()
            .filter(move |(_, c)| c.parent == Some(parent))
            .map(|(i, c)| (ComponentHandle(i), c))
    }

    /// Iterates over every component.
    pub fn components(&self) -> impl Iterator<Item = (ComponentHandle, &Component)> {
        self.components
            .iter()
            .enumerate()
            .map(|(i, c)| (ComponentHandle(i), c))
    }

    /// Mutates a component and invalidates its cached occurrences.
    ///
    /// This is the invalidation hook: any change to recurrence-relevant
    /// fields must go through here (or the caller must invalidate the cache
    /// itself), otherwise the cache would serve stale occurrence sets.
    pub fn update<F>(&mut self, handle: ComponentHandle, cache: &OccurrenceCache, mutate: F) -> bool
    where
        F: FnOnce(&mut Component),
    {
        let Some(component) = self.components.get_mut(handle.0) else {
            return false;
        };
        mutate(component);
        cache.invalidate(component.uid);
        true
    }
}
